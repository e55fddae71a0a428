//! Core types and contracts for hookline
//!
//! This is the foundation crate (Layer 0) that all other hookline crates depend on.
//! It provides:
//! - Error kinds for configuration loading and task execution
//! - The configuration type tag and configuration object traits
//! - Behavioral traits for tasks and configuration loaders
//! - Address and byte-pattern parsing
//! - The shared context store and the memory region it usually holds
//! - Process identity
//!
//! This crate has no dependencies on other hookline crates.

pub mod address;
pub mod config;
pub mod context;
pub mod error;
pub mod process;
pub mod region;
pub mod traits;

pub use config::{AddressTrigger, ConfigBase, ConfigCommon, ConfigPtr, ConfigType, WriteContext};
pub use context::ModContext;
pub use error::{
    ConfigError, ConfigErrorKind, ConfigResult, TaskError, TaskErrorKind, TaskResult,
};
pub use region::MemoryRegion;
pub use traits::{ConfigLoader, Task};
