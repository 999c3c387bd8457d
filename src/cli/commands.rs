//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Declarative CDK command-line interface
#[derive(Parser, Debug)]
#[command(name = "declarative-cdk")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Manifest file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Configuration file (JSON)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Inline config JSON
    #[arg(long, global = true)]
    pub config_json: Option<String>,

    /// State file (JSON)
    #[arg(short, long, global = true)]
    pub state: Option<PathBuf>,

    /// Inline state JSON
    #[arg(long, global = true)]
    pub state_json: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Emit DEBUG LOG messages, including the slice of every partition
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read records from streams
    Read {
        /// Streams to sync (comma-separated, empty = all)
        #[arg(long)]
        streams: Option<String>,

        /// Write the final state to this file
        #[arg(long)]
        state_out: Option<PathBuf>,
    },

    /// Validate the manifest
    Validate,

    /// List the manifest's streams
    Streams,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_command() {
        let cli = Cli::try_parse_from([
            "declarative-cdk",
            "read",
            "--manifest",
            "manifest.yaml",
            "--config-json",
            r#"{"api_key":"x"}"#,
            "--streams",
            "users,teams",
            "--state-out",
            "state.json",
        ])
        .unwrap();

        assert_eq!(cli.manifest, Some(PathBuf::from("manifest.yaml")));
        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Read { streams, state_out } = cli.command else {
            panic!("Expected read command");
        };
        assert_eq!(streams.as_deref(), Some("users,teams"));
        assert_eq!(state_out, Some(PathBuf::from("state.json")));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["declarative-cdk", "streams", "-m", "m.yaml", "-f", "pretty"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Streams));
        assert_eq!(cli.format, OutputFormat::Pretty);
    }

    #[test]
    fn test_parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["declarative-cdk"]).is_err());
    }
}
