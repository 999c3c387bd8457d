//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::engine::ConcurrentSource;
use crate::error::{Error, Result, ResultExt};
use crate::loader::{load_manifest, ComponentFactory, ManifestDefinition};
use crate::message::{InMemoryMessageRepository, Message};
use crate::state::StateManager;
use crate::types::{LogLevel, SyncMode};
use futures::StreamExt;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Read { streams, state_out } => {
                self.read(streams.as_deref(), state_out.as_deref()).await
            }
            Commands::Validate => self.validate(),
            Commands::Streams => self.streams(),
        }
    }

    /// Load the manifest
    fn load_manifest(&self) -> Result<ManifestDefinition> {
        let path = self
            .cli
            .manifest
            .as_ref()
            .ok_or_else(|| Error::config("Manifest file not specified (use -m flag)"))?;
        load_manifest(path)
    }

    /// Load configuration
    fn load_config(&self) -> Result<Value> {
        // Inline config takes precedence
        if let Some(json_str) = &self.cli.config_json {
            return serde_json::from_str(json_str)
                .map_err(|e| Error::config(format!("Invalid config JSON: {e}")));
        }

        if let Some(path) = &self.cli.config {
            let content = fs::read_to_string(path)
                .map_err(|e| Error::config(format!("Failed to read config file: {e}")))?;
            return serde_json::from_str(&content)
                .map_err(|e| Error::config(format!("Invalid config JSON: {e}")));
        }

        Ok(json!({}))
    }

    /// Load state
    fn load_state(&self) -> Result<StateManager> {
        // Inline state takes precedence
        if let Some(state_json) = &self.cli.state_json {
            StateManager::from_json(state_json)
        } else if let Some(path) = &self.cli.state {
            StateManager::from_file(path)
        } else {
            Ok(StateManager::in_memory())
        }
    }

    /// Read streams and print every message
    ///
    /// The final state is written to `state_out` even when the read fails,
    /// so the checkpoints reached so far are kept.
    async fn read(&self, streams: Option<&str>, state_out: Option<&Path>) -> Result<()> {
        let manifest = self.load_manifest()?;
        let config = self.load_config()?;
        let state = self.load_state()?;

        let log_level = if self.cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };
        let repository = Arc::new(InMemoryMessageRepository::new(log_level));
        let factory = ComponentFactory::new(&manifest, config, repository)?;

        let mut selected = factory.create_streams()?;
        if let Some(filter) = streams {
            let wanted: Vec<&str> = filter.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
            if let Some(unknown) = wanted.iter().find(|w| manifest.stream(w).is_none()) {
                return Err(Error::config(format!("Unknown stream: {unknown}")));
            }
            selected.retain(|s| wanted.contains(&s.name()));
        }

        ConcurrentSource::apply_state(&selected, &state.snapshot().await)?;
        let source = factory.create_source()?;
        info!(
            streams = selected.len(),
            concurrency = source.concurrency(),
            "Reading manifest"
        );

        let mut messages = source.read(selected);
        let mut failure = None;
        while let Some(item) = messages.next().await {
            match item {
                Ok(message) => {
                    state.observe(&message).await;
                    self.output_message(&message)?;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(path) = state_out {
            state.save_to_file(path).await?;
        }
        match failure {
            Some(e) => {
                warn!(error = %e, "Read failed");
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Validate the manifest
    fn validate(&self) -> Result<()> {
        let manifest = self.load_manifest()?;

        self.output_message(&Message::log(
            LogLevel::Info,
            format!(
                "Manifest v{} is valid with {} streams",
                manifest.version,
                manifest.streams.len()
            ),
        ))
    }

    /// List stream names
    fn streams(&self) -> Result<()> {
        let manifest = self.load_manifest()?;

        let streams: Vec<Value> = manifest
            .streams
            .iter()
            .map(|s| {
                let modes = if s.incremental_sync.is_some() {
                    vec![SyncMode::FullRefresh, SyncMode::Incremental]
                } else {
                    vec![SyncMode::FullRefresh]
                };
                json!({
                    "name": s.name,
                    "primary_key": s.primary_key.fields(),
                    "supported_sync_modes": modes,
                })
            })
            .collect();

        self.output_value(&json!({
            "type": "STREAMS",
            "streams": streams,
        }))
    }

    fn output_message(&self, message: &Message) -> Result<()> {
        self.output_value(&serde_json::to_value(message).context("Failed to serialize message")?)
    }

    fn output_value(&self, value: &Value) -> Result<()> {
        let line = match self.cli.format {
            OutputFormat::Json => serde_json::to_string(value)?,
            OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
        };
        println!("{line}");
        Ok(())
    }
}
