//! Agent error types

use hookline_core::ConfigError;
use hookline_engine::{FactoryError, HookError};
use thiserror::Error;

/// Result type for agent operations
pub type AgentResult<T = ()> = std::result::Result<T, AgentError>;

/// Failures that leave the process unhooked
#[derive(Error, Debug)]
pub enum AgentError {
    /// Settings, launch file or logging could not be set up
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task metadata could not be turned into hooks
    #[error("Failed to create hooks: {0}")]
    Factory(#[from] FactoryError),

    /// Hooks could not be installed
    #[error("Failed to install hooks: {0}")]
    Install(#[from] HookError),
}
