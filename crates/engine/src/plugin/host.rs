//! Host side of the plugin interface

use super::PluginHost;
use crate::error::{PluginError, PluginResult};
use crate::task_factory::{TaskCreator, TaskFactory};
use hookline_config::ConfigFactory;
use hookline_core::process::{CURRENT_PROCESS, ProcessInfo};
use hookline_core::{ConfigLoader, ConfigPtr, ModContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registries plugins populate, plus the services they may query
#[derive(Debug)]
pub struct HostRegistry {
    /// Configuration loaders by type tag
    pub configs: ConfigFactory,
    /// Task creators by configuration type name
    pub tasks: TaskFactory,
    registered_configs: Vec<ConfigPtr>,
    data_path: PathBuf,
    context: Arc<ModContext>,
}

impl HostRegistry {
    /// Create empty registries
    pub fn new(data_path: impl Into<PathBuf>, context: Arc<ModContext>) -> Self {
        Self {
            configs: ConfigFactory::new(),
            tasks: TaskFactory::new(),
            registered_configs: Vec::new(),
            data_path: data_path.into(),
            context,
        }
    }

    /// Configurations plugins registered directly
    pub fn registered_configs(&self) -> &[ConfigPtr] {
        &self.registered_configs
    }

    /// Drop everything plugins put into the registries and the shared context
    ///
    /// Loaders, creators and context values may carry code from a plugin
    /// library, so this has to run before the libraries are unloaded.
    pub fn clear(&mut self) {
        let creators = self.tasks.len();
        let contexts = self.context.len();
        self.tasks.clear();
        self.configs.clear();
        self.registered_configs.clear();
        self.context.clear();
        tracing::debug!(creators, contexts, "Host registries cleared");
    }
}

impl PluginHost for HostRegistry {
    fn register_config(&mut self, config: ConfigPtr) -> PluginResult {
        if !config.is_valid() {
            return Err(PluginError::InitFailed {
                name: config.key().to_string(),
                message: "invalid configuration".into(),
            });
        }
        tracing::debug!(key = %config.key(), name = %config.name(), "Registering configuration");
        self.registered_configs.push(config);
        Ok(())
    }

    fn register_config_loader(&mut self, loader: Arc<dyn ConfigLoader>) -> PluginResult {
        self.configs.register_loader(loader);
        Ok(())
    }

    fn register_task_creator(&mut self, type_name: &str, creator: TaskCreator) -> PluginResult {
        if type_name.is_empty() {
            return Err(PluginError::InitFailed {
                name: type_name.to_string(),
                message: "task creator needs a configuration type name".into(),
            });
        }
        self.tasks.register(type_name, creator);
        Ok(())
    }

    fn plugin_data_path(&self) -> &Path {
        &self.data_path
    }

    fn log_message(&self, level: u8, message: &str) {
        match level {
            0 => tracing::trace!(target: "hookline::plugin", "{message}"),
            1 => tracing::debug!(target: "hookline::plugin", "{message}"),
            3 => tracing::warn!(target: "hookline::plugin", "{message}"),
            4 | 5 => tracing::error!(target: "hookline::plugin", level = log_level_name(level), "{message}"),
            _ => tracing::info!(target: "hookline::plugin", "{message}"),
        }
    }

    fn process_info(&self) -> &ProcessInfo {
        &CURRENT_PROCESS
    }

    fn mod_context(&self) -> Arc<ModContext> {
        Arc::clone(&self.context)
    }
}

/// Name of a plugin log level
pub fn log_level_name(level: u8) -> &'static str {
    match level {
        0 => "trace",
        1 => "debug",
        2 => "info",
        3 => "warn",
        4 => "error",
        5 => "critical",
        _ => "info",
    }
}
