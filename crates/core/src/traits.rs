//! Core behavioral traits for hookline components
//!
//! These interfaces decouple the hook engine from the code that knows how to
//! read a particular configuration format or perform a particular piece of
//! work. Plugins implement them; the engine only calls through them.

use crate::config::{ConfigPtr, ConfigType};
use crate::error::{ConfigResult, TaskResult};
use std::path::Path;

/// Unit of work executed when a hook fires
///
/// Tasks run on whatever thread called the hooked function, possibly on
/// several threads at once, so they take `&self` and must be `Sync`.
pub trait Task: Send + Sync {
    /// Perform the work
    fn execute(&self) -> TaskResult;

    /// Short name of the task kind
    fn name(&self) -> &str;

    /// Description for log output
    fn description(&self) -> String;
}

/// Pluggable translator from a task file to configuration objects
///
/// # Examples
///
/// ```ignore
/// fn load(loader: &dyn ConfigLoader, file: &Path) -> ConfigResult<Vec<ConfigPtr>> {
///     loader.load_configs(ConfigType::Memory, file, "expand_table")
/// }
/// ```
pub trait ConfigLoader: Send + Sync {
    /// Type tags this loader can read
    fn supported_types(&self) -> &[ConfigType];

    /// Read every configuration object in `path` for the task `task_name`
    fn load_configs(
        &self,
        config_type: ConfigType,
        path: &Path,
        task_name: &str,
    ) -> ConfigResult<Vec<ConfigPtr>>;

    /// Loader name for log output and registry keys
    fn name(&self) -> &str;

    /// Loader version
    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Whether `config_type` is in [`supported_types`](Self::supported_types)
    fn supports(&self, config_type: ConfigType) -> bool {
        self.supported_types().contains(&config_type)
    }
}
