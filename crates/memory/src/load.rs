//! Load an external binary next to a relocated region
//!
//! ```toml
//! [load.names]
//! binary = "data/names.bin"
//! offsetSecurity = "0x100"
//! readFromContext = "cards"
//! writeInContext = { enabled = true, name = "names" }
//! ```
//!
//! The loaded data is placed logically after the region named by
//! `readFromContext`: its recorded original address is that region's base
//! plus its original size plus `offsetSecurity`.

use crate::document::{AddressValue, named_entries, read_document};
use hookline_core::{
    ConfigBase, ConfigCommon, ConfigError, ConfigLoader, ConfigPtr, ConfigResult, ConfigType,
    MemoryRegion, ModContext, Task, TaskError, TaskResult, WriteContext,
};
use serde::Deserialize;
use std::any::Any;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration of one binary load
#[derive(Debug, Clone)]
pub struct LoadInMemoryConfig {
    /// Shared header
    pub common: ConfigCommon,
    /// File to load
    pub binary_path: PathBuf,
    /// Zero bytes appended after the data
    pub offset_security: usize,
}

impl LoadInMemoryConfig {
    /// Registry name of this configuration type
    pub const TYPE_NAME: &'static str = "LoadInMemoryConfig";

    /// Create a configuration without a binary
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            common: ConfigCommon::new(ConfigType::Load, key, name),
            binary_path: PathBuf::new(),
            offset_security: 0,
        }
    }
}

impl ConfigBase for LoadInMemoryConfig {
    fn common(&self) -> &ConfigCommon {
        &self.common
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_valid(&self) -> bool {
        self.common.is_valid() && !self.binary_path.as_os_str().is_empty()
    }

    fn debug_string(&self) -> String {
        format!(
            "{} {} binary={} offsetSecurity={:#x}",
            Self::TYPE_NAME,
            self.common.debug_string(),
            self.binary_path.display(),
            self.offset_security
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadEntry {
    binary: String,
    #[serde(default)]
    offset_security: AddressValue,
    #[serde(default)]
    description: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    write_in_context: WriteContext,
    #[serde(default)]
    read_from_context: String,
}

/// Reads `[load]` sections
///
/// Relative binary paths resolve against the directory of the file they are
/// declared in.
#[derive(Debug, Default)]
pub struct LoadInMemoryConfigLoader;

impl LoadInMemoryConfigLoader {
    fn build(
        entry: LoadEntry,
        task_name: &str,
        name: &str,
        base_dir: &Path,
    ) -> ConfigResult<LoadInMemoryConfig> {
        let mut config = LoadInMemoryConfig::new(format!("{task_name}_{name}"), name);
        let binary = PathBuf::from(&entry.binary);
        config.binary_path = if binary.is_relative() && !entry.binary.is_empty() {
            base_dir.join(binary)
        } else {
            binary
        };
        config.offset_security = entry.offset_security.resolve()?;
        config.common.description = entry.description;
        config.common.enabled = entry.enabled.unwrap_or(true);
        config.common.write_in_context = entry.write_in_context;
        config.common.read_from_context = entry.read_from_context;
        Ok(config)
    }
}

impl ConfigLoader for LoadInMemoryConfigLoader {
    fn supported_types(&self) -> &[ConfigType] {
        &[ConfigType::Load]
    }

    fn load_configs(
        &self,
        config_type: ConfigType,
        path: &Path,
        task_name: &str,
    ) -> ConfigResult<Vec<ConfigPtr>> {
        if config_type != ConfigType::Load {
            return Err(ConfigError::InvalidFormat(format!(
                "{} cannot load type '{config_type}'",
                self.name()
            )));
        }

        let document = read_document(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

        let mut configs: Vec<ConfigPtr> = Vec::new();
        for (name, entry) in named_entries::<LoadEntry>(&document, "load") {
            match Self::build(entry, task_name, &name, base_dir) {
                Ok(config) if config.is_valid() => {
                    tracing::debug!(config = %config.debug_string(), "Parsed load operation");
                    configs.push(Arc::new(config));
                }
                Ok(config) => {
                    tracing::warn!(config = %config.debug_string(), "Invalid load operation, skipping");
                }
                Err(e) => tracing::warn!(entry = %name, error = %e, "Failed to parse load operation"),
            }
        }

        tracing::info!(count = configs.len(), path = %path.display(), "Loaded load-in-memory configurations");
        Ok(configs)
    }

    fn name(&self) -> &str {
        "Load In Memory Operations Loader"
    }
}

/// Loads a binary into the shared context when its hook fires
pub struct LoadInMemoryTask {
    config: LoadInMemoryConfig,
    context: Arc<ModContext>,
}

impl LoadInMemoryTask {
    /// Build a task for `config`
    pub fn new(config: LoadInMemoryConfig, context: Arc<ModContext>) -> Self {
        Self { config, context }
    }

    fn read_binary(&self) -> TaskResult<Vec<u8>> {
        let path = &self.config.binary_path;
        let data = fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TaskError::FileNotFound { path: path.clone() },
            _ => TaskError::FileReadError {
                path: path.clone(),
                message: e.to_string(),
            },
        })?;

        if data.is_empty() {
            return Err(TaskError::FileReadError {
                path: path.clone(),
                message: "file is empty".into(),
            });
        }
        Ok(data)
    }
}

impl Task for LoadInMemoryTask {
    fn execute(&self) -> TaskResult {
        let config = &self.config;
        if !config.is_valid() {
            return Err(TaskError::InvalidConfig(config.debug_string()));
        }
        if !config.common.reads_from_context() {
            return Err(TaskError::InvalidConfig(format!(
                "'{}' needs readFromContext",
                config.common.key
            )));
        }

        let data = self.read_binary()?;

        let anchor_key = &config.common.read_from_context;
        let anchor = self.context.get::<MemoryRegion>(anchor_key).ok_or_else(|| {
            TaskError::InvalidAddress(format!("memory region '{anchor_key}' not in context"))
        })?;
        let original_address = anchor
            .base_address()
            .wrapping_add(anchor.original_size)
            .wrapping_add(config.offset_security);

        let total = data
            .len()
            .checked_add(config.offset_security)
            .ok_or(TaskError::MemoryAllocationFailed { size: usize::MAX })?;
        let description = if config.common.description.is_empty() {
            format!("Loaded binary data from {}", config.binary_path.display())
        } else {
            config.common.description.clone()
        };

        let region = MemoryRegion::zeroed(total, data.len(), original_address, description)?;
        region.write(0, &data)?;
        tracing::debug!(
            bytes = data.len(),
            preview = %region.hex_dump(0, 16),
            address = format_args!("{original_address:#x}"),
            "Loaded binary"
        );

        if config.common.writes_to_context() {
            let key = &config.common.write_in_context.name;
            tracing::info!(key = %key, region = %region.summary(), "Stored loaded binary");
            self.context.store(key.clone(), region);
        } else {
            tracing::warn!(key = %config.common.key, "Loaded binary is not written to the context");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "LoadInMemory"
    }

    fn description(&self) -> String {
        format!(
            "Load {} after region '{}'",
            self.config.binary_path.display(),
            self.config.common.read_from_context
        )
    }
}
