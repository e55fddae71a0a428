//! Base error types for hookline
//!
//! Every fallible operation returns one of a small, closed set of error kinds.
//! The enums carry context for log output; `kind()` exposes the bare kind so
//! callers can match on it without caring about the payload.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type for task execution
pub type TaskResult<T = ()> = std::result::Result<T, TaskError>;

/// Errors raised while reading task metadata and configuration files
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file does not exist
    #[error("Configuration file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Configuration file could not be read or is not valid TOML
    #[error("Failed to parse {}: {message}", path.display())]
    ParseError { path: PathBuf, message: String },

    /// The document parsed but its structure is not what the loader expects
    #[error("Invalid configuration format: {0}")]
    InvalidFormat(String),

    /// A field the loader cannot work without is absent
    #[error("Missing required field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// The followBy graph contains a cycle
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// A configuration file could not be written or opened
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Bare configuration error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigErrorKind {
    /// See [`ConfigError::FileNotFound`]
    FileNotFound,
    /// See [`ConfigError::ParseError`]
    ParseError,
    /// See [`ConfigError::InvalidFormat`]
    InvalidFormat,
    /// See [`ConfigError::MissingRequiredField`]
    MissingRequiredField,
    /// See [`ConfigError::DependencyCycle`]
    DependencyCycle,
    /// See [`ConfigError::Io`]
    Io,
}

impl ConfigError {
    /// Kind of this error without its context
    pub fn kind(&self) -> ConfigErrorKind {
        match self {
            Self::FileNotFound { .. } => ConfigErrorKind::FileNotFound,
            Self::ParseError { .. } => ConfigErrorKind::ParseError,
            Self::InvalidFormat(_) => ConfigErrorKind::InvalidFormat,
            Self::MissingRequiredField { .. } => ConfigErrorKind::MissingRequiredField,
            Self::DependencyCycle { .. } => ConfigErrorKind::DependencyCycle,
            Self::Io { .. } => ConfigErrorKind::Io,
        }
    }
}

/// Errors raised by a task while it runs inside a hook
#[derive(Error, Debug)]
pub enum TaskError {
    /// Task configuration failed validation at execution time
    #[error("Invalid task configuration: {0}")]
    InvalidConfig(String),

    /// A buffer could not be allocated
    #[error("Failed to allocate {size} bytes")]
    MemoryAllocationFailed { size: usize },

    /// An address was null or a context entry it depends on is missing
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Copying from process memory failed
    #[error("Memory copy failed: {0}")]
    CopyFailed(String),

    /// Data expected from an earlier task is absent
    #[error("Dependency not met: {0}")]
    DependencyNotMet(String),

    /// No patch could be applied
    #[error("Patch failed: {0}")]
    PatchFailed(String),

    /// A file referenced by the task does not exist
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// A file referenced by the task could not be read
    #[error("Failed to read {}: {message}", path.display())]
    FileReadError { path: PathBuf, message: String },

    /// Anything else, including a panic caught at the task boundary
    #[error("Task failed: {0}")]
    Unknown(String),
}

/// Bare task error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskErrorKind {
    /// See [`TaskError::InvalidConfig`]
    InvalidConfig,
    /// See [`TaskError::MemoryAllocationFailed`]
    MemoryAllocationFailed,
    /// See [`TaskError::InvalidAddress`]
    InvalidAddress,
    /// See [`TaskError::CopyFailed`]
    CopyFailed,
    /// See [`TaskError::DependencyNotMet`]
    DependencyNotMet,
    /// See [`TaskError::PatchFailed`]
    PatchFailed,
    /// See [`TaskError::FileNotFound`]
    FileNotFound,
    /// See [`TaskError::FileReadError`]
    FileReadError,
    /// See [`TaskError::Unknown`]
    Unknown,
}

impl TaskError {
    /// Kind of this error without its context
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            Self::InvalidConfig(_) => TaskErrorKind::InvalidConfig,
            Self::MemoryAllocationFailed { .. } => TaskErrorKind::MemoryAllocationFailed,
            Self::InvalidAddress(_) => TaskErrorKind::InvalidAddress,
            Self::CopyFailed(_) => TaskErrorKind::CopyFailed,
            Self::DependencyNotMet(_) => TaskErrorKind::DependencyNotMet,
            Self::PatchFailed(_) => TaskErrorKind::PatchFailed,
            Self::FileNotFound { .. } => TaskErrorKind::FileNotFound,
            Self::FileReadError { .. } => TaskErrorKind::FileReadError,
            Self::Unknown(_) => TaskErrorKind::Unknown,
        }
    }
}
