//! Manifest parser
//!
//! Parses and validates manifests written in YAML or JSON.

use crate::error::{Error, Result};
use crate::loader::types::{ManifestDefinition, StreamDefinition};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Load a manifest from a YAML or JSON file
pub fn load_manifest(path: impl AsRef<Path>) -> Result<ManifestDefinition> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "Failed to read manifest file '{}': {}",
            path.display(),
            e
        ))
    })?;
    load_manifest_from_str(&content)
}

/// Load a manifest from a YAML or JSON string
pub fn load_manifest_from_str(yaml: &str) -> Result<ManifestDefinition> {
    let def: ManifestDefinition = serde_yaml::from_str(yaml)
        .map_err(|e| Error::config(format!("Failed to parse manifest: {e}")))?;

    validate_manifest(&def)?;
    Ok(def)
}

/// Validate a manifest definition
pub fn validate_manifest(def: &ManifestDefinition) -> Result<()> {
    if def.streams.is_empty() {
        return Err(Error::config("Manifest must have at least one stream"));
    }

    let stream_names: HashSet<_> = def.streams.iter().map(|s| s.name.as_str()).collect();
    if stream_names.len() != def.streams.len() {
        return Err(Error::config("Duplicate stream names found"));
    }

    for stream in &def.streams {
        validate_stream(stream)?;
        for parent in stream.parent_names() {
            if !stream_names.contains(parent) {
                return Err(Error::config(format!(
                    "Stream '{}' references unknown parent stream '{}'",
                    stream.name, parent
                )));
            }
        }
    }

    check_parent_cycles(def)
}

/// Validate a stream definition
fn validate_stream(stream: &StreamDefinition) -> Result<()> {
    if stream.name.is_empty() {
        return Err(Error::config("Stream name cannot be empty"));
    }

    if stream.retriever.requester.url_base.is_empty() {
        return Err(Error::config(format!(
            "Stream '{}' url_base cannot be empty",
            stream.name
        )));
    }

    if let Some(ref incremental) = stream.incremental_sync {
        if incremental.cursor_field.is_empty() {
            return Err(Error::config(format!(
                "Stream '{}' cursor_field cannot be empty",
                stream.name
            )));
        }
        if incremental.step.is_some() != incremental.cursor_granularity.is_some() {
            return Err(Error::config(format!(
                "Stream '{}' must declare step and cursor_granularity together",
                stream.name
            )));
        }
        if incremental.start_datetime.is_none()
            && (incremental.step.is_some() || incremental.end_datetime.is_some())
        {
            return Err(Error::config(format!(
                "Stream '{}' declares a datetime window without start_datetime",
                stream.name
            )));
        }
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Parent references must form a forest
fn check_parent_cycles(def: &ManifestDefinition) -> Result<()> {
    fn visit<'a>(
        name: &'a str,
        def: &'a ManifestDefinition,
        marks: &mut HashMap<&'a str, Visit>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => {
                return Err(Error::config(format!(
                    "Parent stream cycle through '{name}'"
                )))
            }
            None => {}
        }
        marks.insert(name, Visit::InProgress);
        if let Some(stream) = def.stream(name) {
            for parent in stream.parent_names() {
                visit(parent, def, marks)?;
            }
        }
        marks.insert(name, Visit::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for stream in &def.streams {
        visit(&stream.name, def, &mut marks)?;
    }
    Ok(())
}
