//! Plugin interface
//!
//! Plugins add configuration loaders and task creators. They are either
//! linked into the agent and registered directly, or built as shared
//! libraries exporting two functions:
//!
//! - `CreatePlugin() -> *mut Box<dyn Plugin>`
//! - `DestroyPlugin(*mut Box<dyn Plugin>)`
//!
//! [`export_plugin!`](crate::export_plugin) generates both. A plugin is only
//! accepted when its `api_version` equals [`PLUGIN_API_VERSION`]. Host and
//! plugin must be built with the same compiler since the boundary passes Rust
//! trait objects.

mod host;
mod manager;

pub use host::{HostRegistry, log_level_name};
pub use manager::PluginManager;

use crate::error::PluginResult;
use crate::task_factory::TaskCreator;
use hookline_core::process::ProcessInfo;
use hookline_core::{ConfigLoader, ConfigPtr, ModContext};
use std::path::Path;
use std::sync::Arc;

/// Interface version plugins must be built against
pub const PLUGIN_API_VERSION: u32 = 1;

/// Exported constructor name
pub const CREATE_PLUGIN_SYMBOL: &str = "CreatePlugin";

/// Exported destructor name
pub const DESTROY_PLUGIN_SYMBOL: &str = "DestroyPlugin";

/// Signature of the exported constructor
pub type CreatePluginFn = unsafe extern "C" fn() -> *mut Box<dyn Plugin>;

/// Signature of the exported destructor
pub type DestroyPluginFn = unsafe extern "C" fn(*mut Box<dyn Plugin>);

/// Self-description of a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    /// Unique plugin name
    pub name: String,
    /// Plugin version
    pub version: String,
    /// What the plugin provides
    pub description: String,
    /// Interface version the plugin was built against
    pub api_version: u32,
}

/// Implemented by plugins
pub trait Plugin: Send {
    /// Name, version and required interface version
    fn info(&self) -> PluginInfo;

    /// Register loaders and task creators with the host
    fn initialize(&mut self, host: &mut dyn PluginHost) -> PluginResult;

    /// Read plugin-specific configuration below `config_dir`
    fn load_configurations(&mut self, _config_dir: &Path) -> PluginResult {
        Ok(())
    }

    /// Release resources; called once before the plugin is dropped
    fn shutdown(&mut self) {}
}

/// Services the host offers to plugins
pub trait PluginHost {
    /// Register a standalone configuration
    fn register_config(&mut self, config: ConfigPtr) -> PluginResult;

    /// Register a configuration loader
    fn register_config_loader(&mut self, loader: Arc<dyn ConfigLoader>) -> PluginResult;

    /// Register a task creator for configurations of type `type_name`
    fn register_task_creator(&mut self, type_name: &str, creator: TaskCreator) -> PluginResult;

    /// Directory plugins may store data in
    fn plugin_data_path(&self) -> &Path;

    /// Log through the host; levels 0 (trace) to 5 (critical)
    fn log_message(&self, level: u8, message: &str);

    /// Identity of the hooked process
    fn process_info(&self) -> &ProcessInfo;

    /// The shared context store
    fn mod_context(&self) -> Arc<ModContext>;
}

/// Export `CreatePlugin`/`DestroyPlugin` for a plugin type
///
/// ```ignore
/// hookline_engine::export_plugin!(MyPlugin::default);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($constructor:path) => {
        /// Plugin constructor looked up by the host
        #[allow(unsafe_code, non_snake_case)]
        #[unsafe(no_mangle)]
        pub extern "C" fn CreatePlugin() -> *mut ::std::boxed::Box<dyn $crate::plugin::Plugin> {
            let plugin: ::std::boxed::Box<dyn $crate::plugin::Plugin> =
                ::std::boxed::Box::new($constructor());
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(plugin))
        }

        /// Plugin destructor looked up by the host
        ///
        /// # Safety
        /// `plugin` must come from `CreatePlugin` of this library and not be used afterwards.
        #[allow(unsafe_code, non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn DestroyPlugin(plugin: *mut ::std::boxed::Box<dyn $crate::plugin::Plugin>) {
            if !plugin.is_null() {
                drop(unsafe { ::std::boxed::Box::from_raw(plugin) });
            }
        }
    };
}
