//! Copy a block of process memory into a larger buffer
//!
//! ```toml
//! [memory.card_table]
//! address = "0x1CFDC58"
//! copyAfter = "0x4A3F10"
//! originalSize = 1024
//! newSize = 4096
//! writeInContext = { enabled = true, name = "cards" }
//! ```
//!
//! The hook fires at `copyAfter`; the task copies `originalSize` bytes from
//! `address` into a zero-filled buffer of `newSize` bytes and publishes it as a
//! [`MemoryRegion`] in the shared context.

use crate::access::ProcessMemory;
use crate::document::{AddressValue, named_entries, read_document};
use hookline_core::{
    AddressTrigger, ConfigBase, ConfigCommon, ConfigError, ConfigLoader, ConfigPtr, ConfigResult,
    ConfigType, MemoryRegion, ModContext, Task, TaskError, TaskResult, WriteContext,
};
use serde::Deserialize;
use std::any::Any;
use std::path::Path;
use std::sync::Arc;

/// Configuration of one memory copy
#[derive(Debug, Clone)]
pub struct CopyMemoryConfig {
    /// Shared header
    pub common: ConfigCommon,
    /// Source address
    pub address: usize,
    /// Address the hook is installed at
    pub copy_after: usize,
    /// Bytes copied from `address`
    pub original_size: usize,
    /// Size of the new buffer
    pub new_size: usize,
}

impl CopyMemoryConfig {
    /// Registry name of this configuration type
    pub const TYPE_NAME: &'static str = "CopyMemoryConfig";

    /// Create an empty configuration
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            common: ConfigCommon::new(ConfigType::Memory, key, name),
            address: 0,
            copy_after: 0,
            original_size: 0,
            new_size: 0,
        }
    }

    /// Context key the copied region is published under
    pub fn context_key(&self) -> &str {
        if self.common.writes_to_context() {
            &self.common.write_in_context.name
        } else {
            &self.common.key
        }
    }
}

impl ConfigBase for CopyMemoryConfig {
    fn common(&self) -> &ConfigCommon {
        &self.common
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_address_trigger(&self) -> Option<&dyn AddressTrigger> {
        Some(self)
    }

    fn is_valid(&self) -> bool {
        self.common.is_valid()
            && self.address != 0
            && self.copy_after != 0
            && self.original_size > 0
            && self.new_size >= self.original_size
    }

    fn debug_string(&self) -> String {
        format!(
            "{} {} addr={:#x} copy_after={:#x} size={}->{}",
            Self::TYPE_NAME,
            self.common.debug_string(),
            self.address,
            self.copy_after,
            self.original_size,
            self.new_size
        )
    }
}

impl AddressTrigger for CopyMemoryConfig {
    fn hook_address(&self) -> usize {
        self.copy_after
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CopyMemoryEntry {
    address: AddressValue,
    copy_after: AddressValue,
    original_size: usize,
    new_size: usize,
    #[serde(default)]
    description: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    write_in_context: WriteContext,
    #[serde(default)]
    read_from_context: String,
}

impl CopyMemoryEntry {
    fn into_config(self, task_name: &str, name: &str) -> ConfigResult<CopyMemoryConfig> {
        let mut config = CopyMemoryConfig::new(format!("{task_name}_{name}"), name);
        config.address = self.address.resolve()?;
        config.copy_after = self.copy_after.resolve()?;
        config.original_size = self.original_size;
        config.new_size = self.new_size;
        config.common.description = self.description;
        config.common.enabled = self.enabled.unwrap_or(true);
        config.common.write_in_context = self.write_in_context;
        config.common.read_from_context = self.read_from_context;
        Ok(config)
    }
}

/// Reads `[memory]` sections
#[derive(Debug, Default)]
pub struct MemoryConfigLoader;

impl ConfigLoader for MemoryConfigLoader {
    fn supported_types(&self) -> &[ConfigType] {
        &[ConfigType::Memory]
    }

    fn load_configs(
        &self,
        config_type: ConfigType,
        path: &Path,
        task_name: &str,
    ) -> ConfigResult<Vec<ConfigPtr>> {
        if config_type != ConfigType::Memory {
            return Err(ConfigError::InvalidFormat(format!(
                "{} cannot load type '{config_type}'",
                self.name()
            )));
        }

        let document = read_document(path)?;
        let mut configs: Vec<ConfigPtr> = Vec::new();
        for (name, entry) in named_entries::<CopyMemoryEntry>(&document, "memory") {
            match entry.into_config(task_name, &name) {
                Ok(config) if config.is_valid() => {
                    tracing::debug!(config = %config.debug_string(), "Parsed memory operation");
                    configs.push(Arc::new(config));
                }
                Ok(config) => {
                    tracing::warn!(config = %config.debug_string(), "Invalid memory operation, skipping");
                }
                Err(e) => tracing::warn!(entry = %name, error = %e, "Failed to parse memory operation"),
            }
        }

        tracing::info!(count = configs.len(), path = %path.display(), "Loaded memory configurations");
        Ok(configs)
    }

    fn name(&self) -> &str {
        "Memory Operations Loader"
    }
}

/// Copies a memory block into the shared context when its hook fires
pub struct CopyMemoryTask {
    config: CopyMemoryConfig,
    memory: Arc<dyn ProcessMemory>,
    context: Arc<ModContext>,
}

impl CopyMemoryTask {
    /// Build a task for `config`
    pub fn new(
        config: CopyMemoryConfig,
        memory: Arc<dyn ProcessMemory>,
        context: Arc<ModContext>,
    ) -> Self {
        Self {
            config,
            memory,
            context,
        }
    }
}

impl Task for CopyMemoryTask {
    fn execute(&self) -> TaskResult {
        let config = &self.config;
        if !config.is_valid() {
            return Err(TaskError::InvalidConfig(config.debug_string()));
        }

        tracing::debug!(
            key = %config.common.key,
            source = format_args!("{:#x}", config.address),
            original_size = config.original_size,
            new_size = config.new_size,
            "Copying memory"
        );

        let region = MemoryRegion::zeroed(
            config.new_size,
            config.original_size,
            config.address,
            config.common.description.clone(),
        )?;
        let bytes = self.memory.read(config.address, config.original_size)?;
        region.write(0, &bytes)?;

        tracing::debug!(preview = %region.hex_dump(0, 16), "Copied content");
        tracing::info!(
            key = %config.context_key(),
            region = %region.summary(),
            base = format_args!("{:#x}", region.base_address()),
            "Stored memory region"
        );
        self.context.store(config.context_key(), region);
        Ok(())
    }

    fn name(&self) -> &str {
        "CopyMemory"
    }

    fn description(&self) -> String {
        format!(
            "Copy {} bytes from {:#x} into {} bytes for '{}'",
            self.config.original_size,
            self.config.address,
            self.config.new_size,
            self.config.common.key
        )
    }
}
