//! Rewrite instructions so they point into a relocated region
//!
//! ```toml
//! readFromContext = "cards"
//!
//! [patch."0x4B2C10"]
//! bytes = "8D 86 XX XX XX XX"
//! offset = "0x10"
//! ```
//!
//! Each entry is keyed by the instruction address. The first run of four
//! placeholder bytes (`XX`) is replaced with `region base + offset` in little
//! endian before the bytes are written over the instruction.

use crate::access::ProcessMemory;
use crate::document::{OffsetValue, read_document};
use hookline_core::address::{PLACEHOLDER_BYTE, parse_address, parse_bytes};
use hookline_core::{
    ConfigBase, ConfigCommon, ConfigError, ConfigLoader, ConfigPtr, ConfigResult, ConfigType,
    MemoryRegion, ModContext, Task, TaskError, TaskResult,
};
use serde::Deserialize;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PLACEHOLDER: [u8; 4] = [PLACEHOLDER_BYTE; 4];

/// One instruction rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPatch {
    /// Address of the instruction
    pub address: usize,
    /// Replacement bytes, with a four byte placeholder for the new address
    pub bytes: Vec<u8>,
    /// Offset into the relocated region
    pub offset: isize,
}

impl InstructionPatch {
    /// Non-null address and at least one byte
    pub fn is_valid(&self) -> bool {
        self.address != 0 && !self.bytes.is_empty()
    }

    /// The bytes with the first placeholder run replaced by `target`
    ///
    /// Returns `None` when the bytes hold no placeholder.
    pub fn resolve(&self, target: usize) -> Option<Vec<u8>> {
        let position = self
            .bytes
            .windows(PLACEHOLDER.len())
            .position(|window| window == PLACEHOLDER)?;

        // Patched operands are 32-bit displacements or immediates
        #[allow(clippy::cast_possible_truncation)]
        let operand = (target as u32).to_le_bytes();

        let mut bytes = self.bytes.clone();
        bytes[position..position + operand.len()].copy_from_slice(&operand);
        Some(bytes)
    }
}

/// All instruction rewrites of one patch file
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Shared header
    pub common: ConfigCommon,
    /// File the patches were read from
    pub source_file: PathBuf,
    /// Rewrites in file order
    pub instructions: Vec<InstructionPatch>,
}

impl PatchConfig {
    /// Registry name of this configuration type
    pub const TYPE_NAME: &'static str = "PatchConfig";

    /// Create a configuration without instructions
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            common: ConfigCommon::new(ConfigType::Patch, key, name),
            source_file: PathBuf::new(),
            instructions: Vec::new(),
        }
    }

    /// Context key of the region the patches point into
    pub fn region_key(&self) -> &str {
        if self.common.reads_from_context() {
            &self.common.read_from_context
        } else {
            &self.common.key
        }
    }
}

impl ConfigBase for PatchConfig {
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
        self.common.is_valid() && self.instructions.iter().all(InstructionPatch::is_valid)
    }

    fn debug_string(&self) -> String {
        format!(
            "{} {} instructions={} file={}",
            Self::TYPE_NAME,
            self.common.debug_string(),
            self.instructions.len(),
            self.source_file.display()
        )
    }
}

#[derive(Debug, Deserialize)]
struct PatchEntry {
    bytes: String,
    offset: OffsetValue,
}

fn parse_instruction(key: &str, value: &toml::Value) -> ConfigResult<InstructionPatch> {
    let entry: PatchEntry = value
        .clone()
        .try_into()
        .map_err(|e| ConfigError::InvalidFormat(format!("patch entry '{key}': {e}")))?;

    Ok(InstructionPatch {
        address: parse_address(key)?,
        bytes: parse_bytes(&entry.bytes)?,
        offset: entry.offset.resolve()?,
    })
}

/// Reads `[patch]` sections
#[derive(Debug, Default)]
pub struct PatchConfigLoader;

impl ConfigLoader for PatchConfigLoader {
    fn supported_types(&self) -> &[ConfigType] {
        &[ConfigType::Patch]
    }

    fn load_configs(
        &self,
        config_type: ConfigType,
        path: &Path,
        task_name: &str,
    ) -> ConfigResult<Vec<ConfigPtr>> {
        if config_type != ConfigType::Patch {
            return Err(ConfigError::InvalidFormat(format!(
                "{} cannot load type '{config_type}'",
                self.name()
            )));
        }

        let document = read_document(path)?;
        let Some(section) = document.get("patch") else {
            tracing::debug!(path = %path.display(), "No patch section in config file");
            return Ok(Vec::new());
        };
        let Some(table) = section.as_table() else {
            tracing::warn!(path = %path.display(), "Patch section is not a table");
            return Ok(Vec::new());
        };

        let mut config = PatchConfig::new(task_name, task_name);
        config.source_file = path.to_path_buf();
        if let Some(read) = document.get("readFromContext").and_then(toml::Value::as_str) {
            config.common.read_from_context = read.to_string();
        }
        if let Some(description) = document.get("description").and_then(toml::Value::as_str) {
            config.common.description = description.to_string();
        }

        for (key, value) in table {
            match parse_instruction(key, value) {
                Ok(instruction) if instruction.is_valid() => config.instructions.push(instruction),
                Ok(_) => tracing::warn!(instruction = %key, "Invalid patch instruction, skipping"),
                Err(e) => tracing::warn!(instruction = %key, error = %e, "Failed to parse patch instruction"),
            }
        }

        if config.instructions.is_empty() {
            tracing::warn!(path = %path.display(), "No valid instructions in patch section");
            return Ok(Vec::new());
        }

        tracing::info!(
            count = config.instructions.len(),
            path = %path.display(),
            "Loaded patch instructions"
        );
        Ok(vec![Arc::new(config)])
    }

    fn name(&self) -> &str {
        "Patch Operations Loader"
    }
}

/// Applies instruction patches when its hook fires
pub struct PatchMemoryTask {
    config: PatchConfig,
    memory: Arc<dyn ProcessMemory>,
    context: Arc<ModContext>,
}

impl PatchMemoryTask {
    /// Build a task for `config`
    pub fn new(config: PatchConfig, memory: Arc<dyn ProcessMemory>, context: Arc<ModContext>) -> Self {
        Self {
            config,
            memory,
            context,
        }
    }

    fn apply(&self, patch: &InstructionPatch, base: usize) -> TaskResult {
        let target = base.wrapping_add_signed(patch.offset);
        tracing::debug!(
            instruction = format_args!("{:#x}", patch.address),
            target = format_args!("{target:#x}"),
            offset = patch.offset,
            "Applying patch"
        );

        let bytes = patch.resolve(target).ok_or_else(|| {
            TaskError::PatchFailed(format!(
                "no placeholder in patch at {:#x}",
                patch.address
            ))
        })?;
        self.memory.write(patch.address, &bytes)
    }
}

impl Task for PatchMemoryTask {
    fn execute(&self) -> TaskResult {
        let config = &self.config;
        if !config.is_valid() {
            return Err(TaskError::InvalidConfig(config.debug_string()));
        }
        if config.instructions.is_empty() {
            tracing::warn!(key = %config.common.key, "No patches to apply");
            return Ok(());
        }

        let region_key = config.region_key();
        let region = self.context.get::<MemoryRegion>(region_key).ok_or_else(|| {
            TaskError::InvalidAddress(format!("memory region '{region_key}' not in context"))
        })?;
        let base = region.base_address();

        let mut applied = 0usize;
        for patch in &config.instructions {
            match self.apply(patch, base) {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!(
                    instruction = format_args!("{:#x}", patch.address),
                    error = %e,
                    "Failed to apply patch"
                ),
            }
        }

        tracing::info!(
            key = %config.common.key,
            applied,
            total = config.instructions.len(),
            "Applied patches"
        );
        if applied == 0 {
            return Err(TaskError::PatchFailed(format!(
                "none of {} patches applied for '{}'",
                config.instructions.len(),
                config.common.key
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "PatchMemory"
    }

    fn description(&self) -> String {
        format!(
            "Apply {} memory patches for '{}'",
            self.config.instructions.len(),
            self.config.common.key
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::access::tests::RecordingMemory;
    use hookline_core::TaskErrorKind;
    use std::fs;
    use tempfile::TempDir;

    fn instruction(address: usize, pattern: &str, offset: isize) -> InstructionPatch {
        InstructionPatch {
            address,
            bytes: parse_bytes(pattern).unwrap(),
            offset,
        }
    }

    #[test]
    fn test_resolve_replaces_first_placeholder() {
        let patch = instruction(0x10, "8D 86 XX XX XX XX XX XX XX XX", 0);
        let bytes = patch.resolve(0x1234_5678).unwrap();
        assert_eq!(
            bytes,
            vec![0x8D, 0x86, 0x78, 0x56, 0x34, 0x12, 0xFF, 0xFF, 0xFF, 0xFF]
        );

        assert!(instruction(0x10, "90 90", 0).resolve(1).is_none());
        assert!(instruction(0x10, "XX XX XX", 0).resolve(1).is_none());
    }

    #[test]
    fn test_loader_builds_one_config_per_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("relocate.toml");
        fs::write(
            &path,
            r#"
            readFromContext = "cards"

            [patch."0x4B2C10"]
            bytes = "8D 86 XX XX XX XX"
            offset = "0x10"

            [patch."0x4B2D00"]
            bytes = "A1 XX XX XX XX"
            offset = -4

            [patch."nowhere"]
            bytes = "90"
            offset = "0"

            [patch."0x4B2E00"]
            bytes = "zz"
            offset = "0"
            "#,
        )
        .unwrap();

        let configs = PatchConfigLoader
            .load_configs(ConfigType::Patch, &path, "relocate")
            .unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].key(), "relocate");

        let config = configs[0].as_any().downcast_ref::<PatchConfig>().unwrap();
        assert_eq!(config.region_key(), "cards");
        assert_eq!(config.instructions.len(), 2);
        assert_eq!(config.instructions[0].address, 0x004B_2C10);
        assert_eq!(config.instructions[0].offset, 0x10);
        assert_eq!(config.instructions[1].offset, -4);
    }

    #[test]
    fn test_loader_without_valid_instructions_yields_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.toml");
        fs::write(&path, "[patch.\"0x0\"]\nbytes = \"90\"\noffset = \"0\"\n").unwrap();

        let configs = PatchConfigLoader
            .load_configs(ConfigType::Patch, &path, "empty")
            .unwrap();
        assert!(configs.is_empty());
    }

    fn context_with_region(key: &str) -> (Arc<ModContext>, usize) {
        let context = Arc::new(ModContext::new());
        context.store(key, MemoryRegion::zeroed(0x40, 0x20, 0x1000, "cards").unwrap());
        let base = context.get::<MemoryRegion>(key).unwrap().base_address();
        (context, base)
    }

    #[test]
    fn test_task_writes_relocated_operands() {
        let (context, base) = context_with_region("cards");
        let mut config = PatchConfig::new("relocate", "relocate");
        config.common.read_from_context = "cards".into();
        config.instructions = vec![
            instruction(0x5000, "8D 86 XX XX XX XX", 0x10),
            instruction(0x6000, "A1 XX XX XX XX", 0),
        ];

        let memory = Arc::new(RecordingMemory::default());
        let task = PatchMemoryTask::new(config, memory.clone(), context);
        task.execute().unwrap();

        let writes = memory.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, 0x5000);
        #[allow(clippy::cast_possible_truncation)]
        let expected = ((base + 0x10) as u32).to_le_bytes();
        assert_eq!(&writes[0].1[2..], &expected);
    }

    #[test]
    fn test_task_succeeds_when_some_patches_apply() {
        let (context, _) = context_with_region("relocate");
        let mut config = PatchConfig::new("relocate", "relocate");
        config.instructions = vec![
            instruction(0x5000, "90 90", 0),
            instruction(0x6000, "A1 XX XX XX XX", 0),
        ];

        let memory = Arc::new(RecordingMemory::default());
        PatchMemoryTask::new(config, memory.clone(), context)
            .execute()
            .unwrap();
        assert_eq!(memory.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_task_fails_when_nothing_applies() {
        let (context, _) = context_with_region("relocate");
        let mut config = PatchConfig::new("relocate", "relocate");
        config.instructions = vec![instruction(0x6000, "A1 XX XX XX XX", 0)];

        let memory = Arc::new(RecordingMemory {
            fail_at: Some(0x6000),
            ..RecordingMemory::default()
        });
        let err = PatchMemoryTask::new(config, memory, context)
            .execute()
            .unwrap_err();
        assert_eq!(err.kind(), TaskErrorKind::PatchFailed);
    }

    #[test]
    fn test_task_needs_region() {
        let mut config = PatchConfig::new("relocate", "relocate");
        config.instructions = vec![instruction(0x6000, "A1 XX XX XX XX", 0)];
        let err = PatchMemoryTask::new(
            config,
            Arc::new(RecordingMemory::default()),
            Arc::new(ModContext::new()),
        )
        .execute()
        .unwrap_err();
        assert_eq!(err.kind(), TaskErrorKind::InvalidAddress);
    }

    #[test]
    fn test_empty_patch_list_succeeds() {
        let config = PatchConfig::new("relocate", "relocate");
        let task = PatchMemoryTask::new(
            config,
            Arc::new(RecordingMemory::default()),
            Arc::new(ModContext::new()),
        );
        task.execute().unwrap();
    }
}
