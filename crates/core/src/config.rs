//! Configuration objects and their type tags
//!
//! A configuration object is what a loader produces from one task file. It
//! carries a [`ConfigType`] tag used to route it to a task creator, and may
//! implement [`AddressTrigger`] when it knows the address it wants to run at.

use serde::Deserialize;
use std::any::Any;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Shared handle to a loaded configuration object
pub type ConfigPtr = Arc<dyn ConfigBase>;

/// Configuration type tag
///
/// Each tag is served by exactly one registered loader. Script, Audio and
/// Graphics are reserved for future task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "String")]
pub enum ConfigType {
    /// Copy/expand a memory region
    Memory,
    /// Binary-patch instructions
    Patch,
    /// Load external binary data
    Load,
    /// Reserved
    Script,
    /// Reserved
    Audio,
    /// Reserved
    Graphics,
    /// Anything not recognised
    #[default]
    Unknown,
}

impl ConfigType {
    /// Parse a tag case-insensitively; unrecognised input maps to `Unknown`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Self::Memory,
            "patch" => Self::Patch,
            "load" => Self::Load,
            "script" => Self::Script,
            "audio" => Self::Audio,
            "graphics" => Self::Graphics,
            _ => Self::Unknown,
        }
    }

    /// Lowercase name as written in task metadata
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Patch => "patch",
            Self::Load => "load",
            Self::Script => "script",
            Self::Audio => "audio",
            Self::Graphics => "graphics",
            Self::Unknown => "unknown",
        }
    }
}

impl From<String> for ConfigType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional instruction to publish a task's result in the shared context
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriteContext {
    /// Whether the task writes its result
    pub enabled: bool,
    /// Context key to write under
    pub name: String,
}

impl WriteContext {
    /// An enabled write-context must name its key
    pub fn is_valid(&self) -> bool {
        !self.enabled || !self.name.is_empty()
    }
}

/// Fields every configuration object carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCommon {
    /// Type tag
    pub config_type: ConfigType,
    /// Unique key within the loaded configuration set
    pub key: String,
    /// Human readable name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Disabled configurations are still loaded but never executed
    pub enabled: bool,
    /// Where to publish the task result
    pub write_in_context: WriteContext,
    /// Context key to read input from; empty when unused
    pub read_from_context: String,
}

impl ConfigCommon {
    /// Create an enabled configuration header
    pub fn new(config_type: ConfigType, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            config_type,
            key: key.into(),
            name: name.into(),
            description: String::new(),
            enabled: true,
            write_in_context: WriteContext::default(),
            read_from_context: String::new(),
        }
    }

    /// Key and name are present and the write-context is coherent
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty() && !self.name.is_empty() && self.write_in_context.is_valid()
    }

    /// True when the task publishes its result
    pub fn writes_to_context(&self) -> bool {
        self.write_in_context.enabled && !self.write_in_context.name.is_empty()
    }

    /// True when the task consumes a context entry
    pub fn reads_from_context(&self) -> bool {
        !self.read_from_context.is_empty()
    }

    /// One-line summary for log output
    pub fn debug_string(&self) -> String {
        let mut out = format!(
            "type={} key='{}' name='{}' enabled={}",
            self.config_type, self.key, self.name, self.enabled
        );
        if self.writes_to_context() {
            let _ = write!(out, " write='{}'", self.write_in_context.name);
        }
        if self.reads_from_context() {
            let _ = write!(out, " read='{}'", self.read_from_context);
        }
        out
    }
}

/// Polymorphic configuration object produced by a loader
pub trait ConfigBase: Any + Send + Sync + fmt::Debug {
    /// Shared header fields
    fn common(&self) -> &ConfigCommon;

    /// Stable name of the concrete configuration type, used as the task
    /// registry tag (e.g. `"CopyMemoryConfig"`)
    fn type_name(&self) -> &'static str;

    /// Access to the concrete value for task creators
    fn as_any(&self) -> &dyn Any;

    /// Address capability, when this configuration supplies its own hook address
    fn as_address_trigger(&self) -> Option<&dyn AddressTrigger> {
        None
    }

    /// Type tag
    fn config_type(&self) -> ConfigType {
        self.common().config_type
    }

    /// Unique key
    fn key(&self) -> &str {
        &self.common().key
    }

    /// Human readable name
    fn name(&self) -> &str {
        &self.common().name
    }

    /// Free-form description
    fn description(&self) -> &str {
        &self.common().description
    }

    /// Validation hook; concrete types extend the header checks
    fn is_valid(&self) -> bool {
        self.common().is_valid()
    }

    /// One-line summary for log output
    fn debug_string(&self) -> String {
        format!("{} {}", self.type_name(), self.common().debug_string())
    }
}

/// Capability of configurations that know the address they hook
pub trait AddressTrigger {
    /// Target address the hook is installed at
    fn hook_address(&self) -> usize;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[derive(Debug)]
    struct Plain {
        common: ConfigCommon,
    }

    impl ConfigBase for Plain {
        fn common(&self) -> &ConfigCommon {
            &self.common
        }

        fn type_name(&self) -> &'static str {
            "PlainConfig"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_config_type_parse_is_case_insensitive() {
        assert_eq!(ConfigType::parse("Memory"), ConfigType::Memory);
        assert_eq!(ConfigType::parse("PATCH"), ConfigType::Patch);
        assert_eq!(ConfigType::parse(" load "), ConfigType::Load);
        assert_eq!(ConfigType::parse("graphics"), ConfigType::Graphics);
        assert_eq!(ConfigType::parse("shader"), ConfigType::Unknown);
        assert_eq!(ConfigType::Memory.to_string(), "memory");
    }

    #[test]
    fn test_config_type_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: ConfigType,
        }

        let w: Wrapper = toml::from_str("kind = \"Patch\"").unwrap();
        assert_eq!(w.kind, ConfigType::Patch);
    }

    #[test]
    fn test_common_validity() {
        let mut common = ConfigCommon::new(ConfigType::Memory, "task_item", "item");
        assert!(common.is_valid());

        common.write_in_context.enabled = true;
        assert!(!common.is_valid());

        common.write_in_context.name = "region".into();
        assert!(common.is_valid());
        assert!(common.writes_to_context());

        common.key.clear();
        assert!(!common.is_valid());
    }

    #[test]
    fn test_debug_string_and_defaults() {
        let mut common = ConfigCommon::new(ConfigType::Load, "k", "n");
        common.read_from_context = "region".into();
        let config = Plain { common };

        assert!(config.as_address_trigger().is_none());
        assert_eq!(config.config_type(), ConfigType::Load);
        let summary = config.debug_string();
        assert!(summary.starts_with("PlainConfig type=load key='k'"));
        assert!(summary.contains("read='region'"));
    }

    #[test]
    fn test_debug_string_lists_context_keys() {
        let mut common = ConfigCommon::new(ConfigType::Memory, "cards", "Cards");
        common.enabled = false;
        common.write_in_context.enabled = true;
        common.write_in_context.name = "cards".into();
        common.read_from_context = "region".into();

        assert_eq!(
            common.debug_string(),
            "type=memory key='cards' name='Cards' enabled=false write='cards' read='region'"
        );
        assert_eq!(
            ConfigCommon::new(ConfigType::Patch, "p", "P").debug_string(),
            "type=patch key='p' name='P' enabled=true"
        );
    }
}
