//! Task metadata
//!
//! Loads the declarative task list (`tasks.toml`). Each entry names a
//! configuration file, the type tag of the loader that reads it, and the
//! tasks that must run after it:
//!
//! ```toml
//! [tasks.expand_table]
//! name = "Expand table"
//! type = "memory"
//! config_file = "tasks/expand_table.toml"
//! followBy = ["patch_refs"]
//!
//! [tasks.patch_refs]
//! name = "Patch references"
//! type = "patch"
//! config_file = "tasks/patch_refs.toml"
//! ```

use hookline_core::{ConfigError, ConfigResult, ConfigType};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// One declared unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Identifier of the `[tasks.<id>]` table
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Configuration file reference as written in the metadata
    pub config_file: String,
    /// `config_file` resolved against the metadata file's directory
    pub config_path: PathBuf,
    /// Type tag selecting the loader
    pub config_type: ConfigType,
    /// Keys of tasks that run after this one
    pub follow_by: Vec<String>,
    /// Key of the task whose hook address this task shares, when explicit
    pub address_from: Option<String>,
    /// Disabled entries are dropped at load time
    pub enabled: bool,
}

impl TaskInfo {
    /// Stable key derived from the configuration file reference
    pub fn key(&self) -> String {
        task_key_from_file(&self.config_file)
    }

    /// Whether any task is declared to run after this one
    pub fn has_follow_up_tasks(&self) -> bool {
        !self.follow_by.is_empty()
    }

    /// Whether the entry is usable
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.config_file.is_empty() && self.config_type != ConfigType::Unknown
    }
}

/// Derive a task key from a configuration file reference
///
/// The key is the final path segment with its extension removed:
/// `"tasks/expand_table.toml"` becomes `"expand_table"`.
pub fn task_key_from_file(config_file: &str) -> String {
    let segment = config_file
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(config_file);

    match segment.rfind('.') {
        Some(dot) if dot > 0 => segment[..dot].to_string(),
        _ => segment.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(key) if key.is_empty() => Vec::new(),
            OneOrMany::One(key) => vec![key],
            OneOrMany::Many(keys) => keys,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    name: String,

    #[serde(default)]
    description: String,

    #[serde(default)]
    config_file: String,

    #[serde(default, rename = "type")]
    config_type: ConfigType,

    #[serde(default, rename = "followBy")]
    follow_by: Option<OneOrMany>,

    #[serde(default, rename = "addressFrom")]
    address_from: Option<String>,

    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Reads task metadata files
pub struct TaskLoader;

impl TaskLoader {
    /// Load every enabled, valid task from a metadata file
    ///
    /// A missing `[tasks]` section yields an empty list. Invalid entries (no
    /// name, no configuration file, unknown type) and disabled entries are
    /// skipped with a log line.
    pub fn load_tasks(path: &Path) -> ConfigResult<Vec<TaskInfo>> {
        tracing::info!(path = %path.display(), "Loading tasks");

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::parse_tasks(&content, path, base_dir)
    }

    /// Parse metadata from a string; `base_dir` anchors relative config paths
    pub fn parse_tasks(content: &str, origin: &Path, base_dir: &Path) -> ConfigResult<Vec<TaskInfo>> {
        let document: toml::Table = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

        let Some(section) = document.get("tasks") else {
            tracing::warn!(path = %origin.display(), "No [tasks] section found");
            return Ok(Vec::new());
        };

        let toml::Value::Table(entries) = section else {
            return Err(ConfigError::InvalidFormat(format!(
                "'tasks' in {} must be a table",
                origin.display()
            )));
        };

        let mut tasks = Vec::with_capacity(entries.len());
        for (id, value) in entries {
            let raw: RawTask = match value.clone().try_into() {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(task = %id, error = %e, "Skipping malformed task entry");
                    continue;
                }
            };

            let task = TaskInfo {
                id: id.clone(),
                name: raw.name,
                description: raw.description,
                config_path: resolve_config_path(base_dir, &raw.config_file),
                config_file: raw.config_file,
                config_type: raw.config_type,
                follow_by: raw.follow_by.map(Vec::from).unwrap_or_default(),
                address_from: raw.address_from.filter(|key| !key.is_empty()),
                enabled: raw.enabled,
            };

            if !task.is_valid() {
                tracing::warn!(
                    task = %id,
                    config_type = %task.config_type,
                    "Skipping invalid task entry (needs name, config_file and a known type)"
                );
                continue;
            }

            if !task.enabled {
                tracing::debug!(task = %id, "Skipping disabled task");
                continue;
            }

            tracing::debug!(
                task = %id,
                key = %task.key(),
                config_type = %task.config_type,
                follow_by = ?task.follow_by,
                "Loaded task"
            );
            tasks.push(task);
        }

        tracing::info!(count = tasks.len(), "Loaded tasks");
        Ok(tasks)
    }
}

/// Resolve a configuration reference against the metadata directory
///
/// Absolute references are kept as they are, so loading does not depend on
/// the process working directory.
pub fn resolve_config_path(base_dir: &Path, config_file: &str) -> PathBuf {
    let path = Path::new(config_file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use hookline_core::ConfigErrorKind;
    use tempfile::TempDir;

    fn write_tasks(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("tasks.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_task_key_from_file() {
        assert_eq!(task_key_from_file("tasks/expand_table.toml"), "expand_table");
        assert_eq!(task_key_from_file("expand_table.toml"), "expand_table");
        assert_eq!(task_key_from_file("a\\b\\patch.cfg"), "patch");
        assert_eq!(task_key_from_file("noext"), "noext");
        assert_eq!(task_key_from_file("dir/.hidden"), ".hidden");
    }

    #[test]
    fn test_load_tasks_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = TaskLoader::load_tasks(&temp.path().join("tasks.toml")).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::FileNotFound);
    }

    #[test]
    fn test_load_tasks_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = write_tasks(temp.path(), "[tasks\nname = ");
        let err = TaskLoader::load_tasks(&path).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::ParseError);
    }

    #[test]
    fn test_load_tasks_without_section() {
        let temp = TempDir::new().unwrap();
        let path = write_tasks(temp.path(), "[metadata]\nversion = \"1.0.0\"\n");
        assert!(TaskLoader::load_tasks(&path).unwrap().is_empty());
    }

    #[test]
    fn test_load_tasks_section_not_table() {
        let temp = TempDir::new().unwrap();
        let path = write_tasks(temp.path(), "tasks = [1, 2]\n");
        let err = TaskLoader::load_tasks(&path).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::InvalidFormat);
    }

    #[test]
    fn test_load_tasks_fields() {
        let temp = TempDir::new().unwrap();
        let path = write_tasks(
            temp.path(),
            r#"
[tasks.expand]
name = "Expand"
description = "Grow the table"
type = "Memory"
config_file = "tasks/expand.toml"
followBy = "patch"

[tasks.patch]
name = "Patch"
type = "patch"
config_file = "tasks/patch.toml"
followBy = ["load", "other"]
addressFrom = "expand"
"#,
        );

        let tasks = TaskLoader::load_tasks(&path).unwrap();
        assert_eq!(tasks.len(), 2);

        let expand = &tasks[0];
        assert_eq!(expand.id, "expand");
        assert_eq!(expand.key(), "expand");
        assert_eq!(expand.config_type, ConfigType::Memory);
        assert_eq!(expand.follow_by, vec!["patch".to_string()]);
        assert_eq!(expand.config_path, temp.path().join("tasks/expand.toml"));
        assert!(expand.enabled);
        assert!(expand.address_from.is_none());

        let patch = &tasks[1];
        assert_eq!(patch.follow_by, vec!["load".to_string(), "other".to_string()]);
        assert_eq!(patch.address_from.as_deref(), Some("expand"));
    }

    #[test]
    fn test_disabled_and_invalid_tasks_are_skipped() {
        let temp = TempDir::new().unwrap();
        let path = write_tasks(
            temp.path(),
            r#"
[tasks.off]
name = "Off"
type = "memory"
config_file = "off.toml"
enabled = false

[tasks.noname]
type = "memory"
config_file = "noname.toml"

[tasks.weird]
name = "Weird"
type = "shader"
config_file = "weird.toml"

[tasks.ok]
name = "Ok"
type = "load"
config_file = "ok.toml"
"#,
        );

        let tasks = TaskLoader::load_tasks(&path).unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn test_absolute_config_path_is_kept() {
        let temp = TempDir::new().unwrap();
        let absolute = temp.path().join("elsewhere").join("abs.toml");
        let content = format!(
            "[tasks.abs]\nname = \"Abs\"\ntype = \"memory\"\nconfig_file = '{}'\n",
            absolute.display()
        );
        let path = write_tasks(temp.path(), &content);

        let tasks = TaskLoader::load_tasks(&path).unwrap();
        assert_eq!(tasks[0].config_path, absolute);
        assert_eq!(tasks[0].key(), "abs");
    }
}
