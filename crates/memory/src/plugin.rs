//! The memory task set as a plugin

use crate::access::{NativeMemory, ProcessMemory};
use crate::copy::{CopyMemoryConfig, CopyMemoryTask, MemoryConfigLoader};
use crate::load::{LoadInMemoryConfig, LoadInMemoryConfigLoader, LoadInMemoryTask};
use crate::patch::{PatchConfig, PatchConfigLoader, PatchMemoryTask};
use hookline_core::{ConfigBase, Task};
use hookline_engine::plugin::{PLUGIN_API_VERSION, Plugin, PluginHost, PluginInfo};
use hookline_engine::{PluginResult, TaskCreator};
use std::sync::Arc;

/// Registers the copy, patch and load loaders and task creators
pub struct MemoryPlugin {
    memory: Arc<dyn ProcessMemory>,
}

impl MemoryPlugin {
    /// Plugin name
    pub const NAME: &'static str = "Memory Operations Plugin";

    /// Plugin working on this process's memory
    pub fn new() -> Self {
        Self::with_memory(Arc::new(NativeMemory))
    }

    /// Plugin working through `memory`
    pub fn with_memory(memory: Arc<dyn ProcessMemory>) -> Self {
        Self { memory }
    }
}

impl Default for MemoryPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn creator<C, F>(build: F) -> TaskCreator
where
    C: ConfigBase + Clone,
    F: Fn(C) -> Box<dyn Task> + Send + Sync + 'static,
{
    Box::new(move |config: &dyn ConfigBase| {
        config
            .as_any()
            .downcast_ref::<C>()
            .map(|config| build(config.clone()))
    })
}

impl Plugin for MemoryPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: Self::NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Provides memory copying, patching and binary loading".to_string(),
            api_version: PLUGIN_API_VERSION,
        }
    }

    fn initialize(&mut self, host: &mut dyn PluginHost) -> PluginResult {
        host.log_message(2, "Memory plugin: registering loaders");
        host.register_config_loader(Arc::new(MemoryConfigLoader))?;
        host.register_config_loader(Arc::new(PatchConfigLoader))?;
        host.register_config_loader(Arc::new(LoadInMemoryConfigLoader))?;

        let context = host.mod_context();

        let (memory, ctx) = (Arc::clone(&self.memory), Arc::clone(&context));
        host.register_task_creator(
            CopyMemoryConfig::TYPE_NAME,
            creator(move |config: CopyMemoryConfig| -> Box<dyn Task> {
                Box::new(CopyMemoryTask::new(config, Arc::clone(&memory), Arc::clone(&ctx)))
            }),
        )?;

        let (memory, ctx) = (Arc::clone(&self.memory), Arc::clone(&context));
        host.register_task_creator(
            PatchConfig::TYPE_NAME,
            creator(move |config: PatchConfig| -> Box<dyn Task> {
                Box::new(PatchMemoryTask::new(config, Arc::clone(&memory), Arc::clone(&ctx)))
            }),
        )?;

        let ctx = Arc::clone(&context);
        host.register_task_creator(
            LoadInMemoryConfig::TYPE_NAME,
            creator(move |config: LoadInMemoryConfig| -> Box<dyn Task> {
                Box::new(LoadInMemoryTask::new(config, Arc::clone(&ctx)))
            }),
        )?;

        host.log_message(2, "Memory plugin: task creators registered");
        Ok(())
    }

    fn shutdown(&mut self) {
        tracing::debug!("Memory plugin shut down");
    }
}
