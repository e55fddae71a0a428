//! Runtime settings
//!
//! Read from `hookline.toml` next to the injected module. Every field has a
//! default so a missing file is not an error. Relative paths resolve against
//! the directory the settings file lives in.
//!
//! ```toml
//! tasksFile = "config/tasks.toml"
//! pluginDir = "plugins"
//! logLevel = "info"
//! ```

use crate::launch::LaunchFile;
use hookline_core::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name the agent looks for
pub const SETTINGS_FILE_NAME: &str = "hookline.toml";

/// Runtime settings of the injected module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Task metadata file
    #[serde(default = "default_tasks_file", rename = "tasksFile")]
    pub tasks_file: PathBuf,

    /// Directory scanned for plugin libraries
    #[serde(default = "default_plugin_dir", rename = "pluginDir")]
    pub plugin_dir: PathBuf,

    /// Root of per-plugin data directories
    #[serde(default = "default_data_dir", rename = "dataDir")]
    pub data_dir: PathBuf,

    /// Log file, appended to
    #[serde(default = "default_log_file", rename = "logFile")]
    pub log_file: PathBuf,

    /// Default log level when `RUST_LOG` is unset
    #[serde(default = "default_log_level", rename = "logLevel")]
    pub log_level: String,

    /// Delay before installing, letting the host finish starting up
    #[serde(default = "default_install_delay_ms", rename = "installDelayMs")]
    pub install_delay_ms: u64,

    /// How long uninstall waits for running task chains
    #[serde(default = "default_quiesce_timeout_ms", rename = "quiesceTimeoutMs")]
    pub quiesce_timeout_ms: u64,
}

fn default_tasks_file() -> PathBuf {
    PathBuf::from("config/tasks.toml")
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/hookline.log")
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_install_delay_ms() -> u64 {
    100
}

fn default_quiesce_timeout_ms() -> u64 {
    2000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tasks_file: default_tasks_file(),
            plugin_dir: default_plugin_dir(),
            data_dir: default_data_dir(),
            log_file: default_log_file(),
            log_level: default_log_level(),
            install_delay_ms: default_install_delay_ms(),
            quiesce_timeout_ms: default_quiesce_timeout_ms(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            let mut settings = Self::default();
            settings.resolve_relative_paths(base_dir);
            return Ok(settings);
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut settings: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.resolve_relative_paths(base_dir);
        Ok(settings)
    }

    /// Load `hookline.toml` from `dir`
    pub fn load_from_dir(dir: &Path) -> ConfigResult<Self> {
        Self::load(&dir.join(SETTINGS_FILE_NAME))
    }

    /// Apply the directory overrides written by the injector
    pub fn apply_launch(&mut self, launch: &LaunchFile) {
        if let Some(config_dir) = &launch.config_dir {
            let file_name = self
                .tasks_file
                .file_name()
                .map_or_else(|| PathBuf::from("tasks.toml"), PathBuf::from);
            self.tasks_file = config_dir.join(file_name);
            tracing::debug!(tasks_file = %self.tasks_file.display(), "Tasks file overridden by launch file");
        }
        if let Some(plugin_dir) = &launch.plugin_dir {
            self.plugin_dir.clone_from(plugin_dir);
            tracing::debug!(plugin_dir = %self.plugin_dir.display(), "Plugin directory overridden by launch file");
        }
    }

    /// Delay before installing hooks
    pub fn install_delay(&self) -> Duration {
        Duration::from_millis(self.install_delay_ms)
    }

    /// Bound on waiting for in-flight dispatches during uninstall
    pub fn quiesce_timeout(&self) -> Duration {
        Duration::from_millis(self.quiesce_timeout_ms)
    }

    fn resolve_relative_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.tasks_file,
            &mut self.plugin_dir,
            &mut self.data_dir,
            &mut self.log_file,
        ] {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use hookline_core::ConfigErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_resolved_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load_from_dir(temp.path()).unwrap();

        assert_eq!(settings.tasks_file, temp.path().join("config/tasks.toml"));
        assert_eq!(settings.plugin_dir, temp.path().join("plugins"));
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.install_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let absolute = temp.path().join("abs-plugins");
        fs::write(
            temp.path().join(SETTINGS_FILE_NAME),
            format!(
                "tasksFile = \"cfg/tasks.toml\"\nlogLevel = \"info\"\npluginDir = '{}'\n",
                absolute.display()
            ),
        )
        .unwrap();

        let settings = Settings::load_from_dir(temp.path()).unwrap();
        assert_eq!(settings.tasks_file, temp.path().join("cfg/tasks.toml"));
        assert_eq!(settings.plugin_dir, absolute);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.quiesce_timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(SETTINGS_FILE_NAME), "installDelayMs = \"soon\"").unwrap();

        let err = Settings::load_from_dir(temp.path()).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::ParseError);
    }

    #[test]
    fn test_apply_launch_overrides() {
        let mut settings = Settings::default();
        let launch = LaunchFile {
            process: "game.exe".into(),
            module: PathBuf::from("hookline_agent.dll"),
            config_dir: Some(PathBuf::from("/mods/config")),
            plugin_dir: Some(PathBuf::from("/mods/plugins")),
        };

        settings.apply_launch(&launch);
        assert_eq!(settings.tasks_file, PathBuf::from("/mods/config/tasks.toml"));
        assert_eq!(settings.plugin_dir, PathBuf::from("/mods/plugins"));
    }
}
