//! Error types for hookline-engine
//!
//! Hook installation, hook orchestration and plugin loading each have their
//! own closed set of error kinds. We use `thiserror` so every variant carries
//! the context (address, key, path) needed in log output.

use hookline_core::{ConfigError, ConfigErrorKind};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hook lifecycle operations
pub type HookResult<T = ()> = std::result::Result<T, HookError>;

/// Result type alias for hook orchestration
pub type FactoryResult<T = ()> = std::result::Result<T, FactoryError>;

/// Result type alias for plugin operations
pub type PluginResult<T = ()> = std::result::Result<T, PluginError>;

/// Hooking library and per-address install failures
#[derive(Error, Debug)]
pub enum HookError {
    /// The hooking backend could not be initialized
    #[error("Failed to initialize hooking backend: {0}")]
    InitFailed(String),

    /// The underlying detour could not be created
    #[error("Failed to create hook at {address:#x}: {message}")]
    CreateFailed { address: usize, message: String },

    /// The detour could not be enabled
    #[error("Failed to enable hook at {address:#x}: {message}")]
    EnableFailed { address: usize, message: String },

    /// The detour could not be disabled
    #[error("Failed to disable hook at {address:#x}: {message}")]
    DisableFailed { address: usize, message: String },

    /// Null or otherwise unusable target address
    #[error("Invalid hook address {0:#x}")]
    InvalidAddress(usize),

    /// A hook already exists at this address in the backend
    #[error("Hook already exists at {0:#x}")]
    AlreadyExists(usize),

    /// No hook at this address
    #[error("No hook at {0:#x}")]
    NotFound(usize),

    /// Tasks cannot be added once a hook is installed
    #[error("Hook at {0:#x} is installed and can no longer be modified")]
    AlreadyInstalled(usize),

    /// Executable memory for a stub could not be obtained or written
    #[error("Stub allocation failed: {0}")]
    StubAllocation(String),

    /// A relative displacement does not fit in 32 bits
    #[error("Displacement from {from:#x} to {to:#x} does not fit in rel32")]
    DisplacementOutOfRange { from: usize, to: usize },

    /// An absolute address does not fit a 32-bit immediate
    #[error("Address {0:#x} does not fit in a 32-bit immediate")]
    AddressOutOfRange(usize),
}

/// Bare hook error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookErrorKind {
    /// See [`HookError::InitFailed`]
    InitFailed,
    /// See [`HookError::CreateFailed`]
    CreateFailed,
    /// See [`HookError::EnableFailed`]
    EnableFailed,
    /// See [`HookError::DisableFailed`]
    DisableFailed,
    /// See [`HookError::InvalidAddress`]
    InvalidAddress,
    /// See [`HookError::AlreadyExists`]
    AlreadyExists,
    /// See [`HookError::NotFound`]
    NotFound,
    /// See [`HookError::AlreadyInstalled`]
    AlreadyInstalled,
    /// See [`HookError::StubAllocation`]
    StubAllocation,
    /// See [`HookError::DisplacementOutOfRange`]
    DisplacementOutOfRange,
    /// See [`HookError::AddressOutOfRange`]
    AddressOutOfRange,
}

impl HookError {
    /// Kind of this error without its context
    pub fn kind(&self) -> HookErrorKind {
        match self {
            Self::InitFailed(_) => HookErrorKind::InitFailed,
            Self::CreateFailed { .. } => HookErrorKind::CreateFailed,
            Self::EnableFailed { .. } => HookErrorKind::EnableFailed,
            Self::DisableFailed { .. } => HookErrorKind::DisableFailed,
            Self::InvalidAddress(_) => HookErrorKind::InvalidAddress,
            Self::AlreadyExists(_) => HookErrorKind::AlreadyExists,
            Self::NotFound(_) => HookErrorKind::NotFound,
            Self::AlreadyInstalled(_) => HookErrorKind::AlreadyInstalled,
            Self::StubAllocation(_) => HookErrorKind::StubAllocation,
            Self::DisplacementOutOfRange { .. } => HookErrorKind::DisplacementOutOfRange,
            Self::AddressOutOfRange(_) => HookErrorKind::AddressOutOfRange,
        }
    }
}

/// Failures while turning task metadata into hooks
#[derive(Error, Debug)]
pub enum FactoryError {
    /// Task metadata or a task configuration file could not be loaded
    #[error("Failed to load configuration: {0}")]
    ConfigLoadFailed(#[source] ConfigError),

    /// The tasks could not be put in execution order
    #[error("Failed to order tasks: {0}")]
    ExecutionOrder(#[source] ConfigError),

    /// The task graph or a configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Several candidate parents resolve to different hook addresses
    #[error("Task '{task}' could inherit more than one hook address ({candidates}); set addressFrom")]
    AmbiguousAddress { task: String, candidates: String },

    /// A task could not be attached to its hook
    #[error("Failed to attach task to hook: {0}")]
    HookCreationFailed(#[source] HookError),

    /// No registered creator produced a task for a configuration
    #[error("No task creator for configuration '{key}' ({type_name})")]
    TaskCreationFailed { key: String, type_name: String },
}

/// Bare factory error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactoryErrorKind {
    /// See [`FactoryError::ConfigLoadFailed`]
    ConfigLoadFailed,
    /// See [`FactoryError::ExecutionOrder`]
    ExecutionOrder,
    /// See [`FactoryError::InvalidConfig`]
    InvalidConfig,
    /// See [`FactoryError::AmbiguousAddress`]
    AmbiguousAddress,
    /// See [`FactoryError::HookCreationFailed`]
    HookCreationFailed,
    /// See [`FactoryError::TaskCreationFailed`]
    TaskCreationFailed,
}

impl FactoryError {
    /// Kind of this error without its context
    pub fn kind(&self) -> FactoryErrorKind {
        match self {
            Self::ConfigLoadFailed(_) => FactoryErrorKind::ConfigLoadFailed,
            Self::ExecutionOrder(_) => FactoryErrorKind::ExecutionOrder,
            Self::InvalidConfig(_) => FactoryErrorKind::InvalidConfig,
            Self::AmbiguousAddress { .. } => FactoryErrorKind::AmbiguousAddress,
            Self::HookCreationFailed(_) => FactoryErrorKind::HookCreationFailed,
            Self::TaskCreationFailed { .. } => FactoryErrorKind::TaskCreationFailed,
        }
    }

    /// Kind of the underlying configuration error, if there is one
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Self::ConfigLoadFailed(e) | Self::ExecutionOrder(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// Plugin loading and lifecycle failures
#[derive(Error, Debug)]
pub enum PluginError {
    /// The shared library could not be loaded
    #[error("Failed to load plugin library {}: {message}", path.display())]
    LoadFailed { path: PathBuf, message: String },

    /// A required export is missing
    #[error("Plugin {} does not export '{symbol}'", path.display())]
    MissingSymbol { path: PathBuf, symbol: String },

    /// The plugin was built against another API version
    #[error("Plugin '{name}' requires API version {required}, host provides {provided}")]
    InvalidVersion {
        name: String,
        required: u32,
        provided: u32,
    },

    /// The plugin's initialize or load step failed
    #[error("Plugin '{name}' failed to initialize: {message}")]
    InitFailed { name: String, message: String },

    /// A plugin with the same name is already loaded
    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// No plugin with this name
    #[error("Plugin not found: {0}")]
    NotFound(String),
}

/// Bare plugin error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginErrorKind {
    /// See [`PluginError::LoadFailed`]
    LoadFailed,
    /// See [`PluginError::MissingSymbol`]
    MissingSymbol,
    /// See [`PluginError::InvalidVersion`]
    InvalidVersion,
    /// See [`PluginError::InitFailed`]
    InitFailed,
    /// See [`PluginError::AlreadyLoaded`]
    AlreadyLoaded,
    /// See [`PluginError::NotFound`]
    NotFound,
}

impl PluginError {
    /// Kind of this error without its context
    pub fn kind(&self) -> PluginErrorKind {
        match self {
            Self::LoadFailed { .. } => PluginErrorKind::LoadFailed,
            Self::MissingSymbol { .. } => PluginErrorKind::MissingSymbol,
            Self::InvalidVersion { .. } => PluginErrorKind::InvalidVersion,
            Self::InitFailed { .. } => PluginErrorKind::InitFailed,
            Self::AlreadyLoaded(_) => PluginErrorKind::AlreadyLoaded,
            Self::NotFound(_) => PluginErrorKind::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_hook_error_display_uses_hex() {
        let err = HookError::CreateFailed {
            address: 0x0040_1000,
            message: "not executable".into(),
        };
        assert_eq!(err.kind(), HookErrorKind::CreateFailed);
        assert_eq!(
            err.to_string(),
            "Failed to create hook at 0x401000: not executable"
        );
    }

    #[test]
    fn test_factory_error_kind() {
        let err = FactoryError::ConfigLoadFailed(ConfigError::InvalidFormat("x".into()));
        assert_eq!(err.kind(), FactoryErrorKind::ConfigLoadFailed);

        let err = FactoryError::HookCreationFailed(HookError::AlreadyInstalled(0x10));
        assert_eq!(err.kind(), FactoryErrorKind::HookCreationFailed);
    }
}
