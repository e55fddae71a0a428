//! Error types for CLI commands

use hookline_core::ConfigError;
use hookline_engine::{FactoryError, PluginError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during command execution
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CommandError {
    /// Injection needs the Win32 API
    #[error("Injection is only supported on Windows")]
    Unsupported,

    /// Module to inject does not exist
    #[error("Module not found: {}", .0.display())]
    ModuleNotFound(PathBuf),

    /// No running process matched the name in time
    #[error("Process '{name}' not found after waiting {waited_secs}s")]
    ProcessNotFound {
        /// Name that was searched for
        name: String,
        /// How long the search ran
        waited_secs: u64,
    },

    /// Injector and target are built for different architectures
    #[error("Architecture mismatch: {process} is {target}, injector is {injector}")]
    ArchitectureMismatch {
        /// Target process name
        process: String,
        /// Target architecture
        target: &'static str,
        /// Injector architecture
        injector: &'static str,
    },

    /// A Win32 call failed during injection
    #[error("Injection failed at {step} (error {code})")]
    InjectionFailed {
        /// Step that failed
        step: &'static str,
        /// `GetLastError` value
        code: u32,
    },

    /// The remote `LoadLibraryW` returned null
    #[error("The target process could not load {}", .0.display())]
    LoadLibraryFailed(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task metadata could not be turned into hooks
    #[error("Hook creation failed: {0}")]
    Factory(#[from] FactoryError),

    /// A plugin could not be registered
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for command operations
pub type Result<T> = std::result::Result<T, CommandError>;
