//! Configuration loader registry
//!
//! Loaders advertise the type tags they read. Loading a task file picks the
//! first registered loader (in registration order) whose tag set contains the
//! requested tag; the file format itself is entirely the loader's business.

use hookline_core::{ConfigError, ConfigLoader, ConfigPtr, ConfigResult, ConfigType};
use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;

/// Registry of configuration loaders keyed by loader name
#[derive(Default)]
pub struct ConfigFactory {
    loaders: IndexMap<String, Arc<dyn ConfigLoader>>,
}

impl ConfigFactory {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader, replacing any loader with the same name
    pub fn register_loader(&mut self, loader: Arc<dyn ConfigLoader>) {
        let name = loader.name().to_string();
        if self.loaders.contains_key(&name) {
            tracing::warn!(loader = %name, "Loader already registered, replacing");
        }

        tracing::info!(
            loader = %name,
            version = %loader.version(),
            types = ?loader.supported_types(),
            "Registering config loader"
        );
        self.loaders.insert(name, loader);
    }

    /// Remove a loader by name; returns whether it was registered
    pub fn unregister_loader(&mut self, name: &str) -> bool {
        if self.loaders.shift_remove(name).is_some() {
            tracing::info!(loader = %name, "Unregistered config loader");
            true
        } else {
            tracing::warn!(loader = %name, "Loader not found for unregistration");
            false
        }
    }

    /// Drop every registered loader
    pub fn clear(&mut self) {
        self.loaders.clear();
    }

    /// Load the configuration objects in `path` for the task `task_name`
    ///
    /// Fails with [`ConfigError::InvalidFormat`] when no loader supports
    /// `config_type`.
    pub fn load_configs(
        &self,
        config_type: ConfigType,
        path: &Path,
        task_name: &str,
    ) -> ConfigResult<Vec<ConfigPtr>> {
        tracing::info!(
            config_type = %config_type,
            path = %path.display(),
            task = %task_name,
            "Loading configs"
        );

        let Some(loader) = self.find_loader(config_type) else {
            tracing::error!(config_type = %config_type, "No registered loader supports configuration type");
            return Err(ConfigError::InvalidFormat(format!(
                "no loader registered for type '{config_type}'"
            )));
        };

        tracing::debug!(loader = %loader.name(), config_type = %config_type, "Using loader");
        loader.load_configs(config_type, path, task_name)
    }

    /// Whether some registered loader reads `config_type`
    pub fn is_type_supported(&self, config_type: ConfigType) -> bool {
        self.find_loader(config_type).is_some()
    }

    /// Names of registered loaders in registration order
    pub fn registered_loaders(&self) -> Vec<String> {
        self.loaders.keys().cloned().collect()
    }

    fn find_loader(&self, config_type: ConfigType) -> Option<&Arc<dyn ConfigLoader>> {
        self.loaders
            .values()
            .find(|loader| loader.supports(config_type))
    }
}

impl std::fmt::Debug for ConfigFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigFactory")
            .field("loaders", &self.registered_loaders())
            .finish()
    }
}
