//! TOML helpers shared by the memory loaders

use hookline_core::address::{parse_address, parse_offset};
use hookline_core::{ConfigError, ConfigResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Parse a configuration file into a table
pub(crate) fn read_document(path: &Path) -> ConfigResult<toml::Table> {
    if !path.exists() {
        tracing::error!(path = %path.display(), "Config file not found");
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    content.parse::<toml::Table>().map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Entries of a `[section.<name>]` table or a `[[section]]` array
///
/// Table entries are named by their key. Array entries must carry a `name`
/// string. Entries that are not tables, lack a name or fail to deserialize are
/// skipped with a warning.
pub(crate) fn named_entries<T: DeserializeOwned>(
    document: &toml::Table,
    section: &str,
) -> Vec<(String, T)> {
    let mut entries = Vec::new();

    match document.get(section) {
        None => tracing::debug!(section, "No section in config file"),
        Some(toml::Value::Table(table)) => {
            for (name, value) in table {
                if !value.is_table() {
                    tracing::warn!(section, entry = %name, "Entry is not a table, skipping");
                    continue;
                }
                if let Some(entry) = deserialize_entry(section, name, value.clone()) {
                    entries.push((name.clone(), entry));
                }
            }
        }
        Some(toml::Value::Array(items)) => {
            for (index, value) in items.iter().enumerate() {
                let Some(name) = value.get("name").and_then(toml::Value::as_str) else {
                    tracing::warn!(section, index, "Array entry has no name, skipping");
                    continue;
                };
                if let Some(entry) = deserialize_entry(section, name, value.clone()) {
                    entries.push((name.to_string(), entry));
                }
            }
        }
        Some(other) => {
            tracing::warn!(section, kind = other.type_str(), "Section is neither a table nor an array");
        }
    }

    entries
}

fn deserialize_entry<T: DeserializeOwned>(section: &str, name: &str, value: toml::Value) -> Option<T> {
    match value.try_into() {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(section, entry = %name, error = %e, "Failed to parse entry, skipping");
            None
        }
    }
}

/// Address written as a string (`"0x1F40"`) or a plain integer
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum AddressValue {
    Text(String),
    Number(usize),
}

impl AddressValue {
    pub(crate) fn resolve(&self) -> ConfigResult<usize> {
        match self {
            Self::Text(text) => parse_address(text),
            Self::Number(value) => Ok(*value),
        }
    }
}

impl Default for AddressValue {
    fn default() -> Self {
        Self::Number(0)
    }
}

/// Signed offset written as a string (`"-0x10"`) or a plain integer
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OffsetValue {
    Text(String),
    Number(isize),
}

impl OffsetValue {
    pub(crate) fn resolve(&self) -> ConfigResult<isize> {
        match self {
            Self::Text(text) => parse_offset(text),
            Self::Number(value) => Ok(*value),
        }
    }
}
