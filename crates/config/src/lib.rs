//! Configuration management for hookline
//!
//! This crate handles:
//! - Task metadata loading (tasks.toml)
//! - Execution order construction over followBy edges
//! - The configuration loader registry
//! - Runtime settings and the injector's launch file
//! - Logging initialization

pub mod factory;
pub mod launch;
pub mod logging;
pub mod order;
pub mod settings;
pub mod tasks;

// Re-export error types from core
pub use hookline_core::{ConfigError, ConfigResult};

// Re-export main types
pub use factory::ConfigFactory;
pub use launch::{LAUNCH_FILE_NAME, LaunchFile};
pub use order::build_execution_order;
pub use settings::{SETTINGS_FILE_NAME, Settings};
pub use tasks::{TaskInfo, TaskLoader, resolve_config_path, task_key_from_file};
