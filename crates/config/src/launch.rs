//! Launch side-channel file
//!
//! The injector cannot pass arguments to a module loaded into another
//! process, so it writes them to a small TOML file next to the module. The
//! agent reads the file at startup.

use hookline_core::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the side-channel file, placed next to the injected module
pub const LAUNCH_FILE_NAME: &str = "hookline-launch.toml";

/// Parameters handed from the injector to the injected module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Target process name
    pub process: String,

    /// Module that was injected
    pub module: PathBuf,

    /// Override for the directory holding tasks.toml
    #[serde(default, rename = "configDir", skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,

    /// Override for the plugin directory
    #[serde(default, rename = "pluginDir", skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,
}

impl LaunchFile {
    /// Write the file into `dir`, returning its path
    pub fn write(&self, dir: &Path) -> ConfigResult<PathBuf> {
        let path = dir.join(LAUNCH_FILE_NAME);
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidFormat(format!("cannot serialize launch file: {e}")))?;

        fs::write(&path, content).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "Wrote launch file");
        Ok(path)
    }

    /// Read the file from `dir`; `None` when the module was not started by the injector
    pub fn read(dir: &Path) -> ConfigResult<Option<Self>> {
        let path = dir.join(LAUNCH_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let launch = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Some(launch))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use hookline_core::ConfigErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let launch = LaunchFile {
            process: "ff8_en.exe".into(),
            module: temp.path().join("hookline_agent.dll"),
            config_dir: Some(temp.path().join("config")),
            plugin_dir: None,
        };

        let path = launch.write(temp.path()).unwrap();
        assert_eq!(path, temp.path().join(LAUNCH_FILE_NAME));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("configDir"));
        assert!(!content.contains("pluginDir"));

        assert_eq!(LaunchFile::read(temp.path()).unwrap(), Some(launch));
    }

    #[test]
    fn test_read_absent() {
        let temp = TempDir::new().unwrap();
        assert!(LaunchFile::read(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_read_malformed() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(LAUNCH_FILE_NAME), "process = 3").unwrap();
        let err = LaunchFile::read(temp.path()).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::ParseError);
    }
}
