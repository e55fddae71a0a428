//! Plugin loading and lifecycle

use super::{
    CREATE_PLUGIN_SYMBOL, CreatePluginFn, DESTROY_PLUGIN_SYMBOL, DestroyPluginFn,
    PLUGIN_API_VERSION, Plugin, PluginHost, PluginInfo,
};
use crate::error::{PluginError, PluginResult};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Plugin object owned by a shared library
///
/// The object is handed back to the library's own destructor before the
/// library is unloaded.
struct LibraryPlugin {
    plugin: Option<Box<Box<dyn Plugin>>>,
    destroy: DestroyPluginFn,
    path: PathBuf,
    // Dropped after `plugin`; must outlive every pointer into the library
    _library: libloading::Library,
}

impl Drop for LibraryPlugin {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        if let Some(plugin) = self.plugin.take() {
            tracing::debug!(path = %self.path.display(), "Destroying library plugin");
            // SAFETY: the pointer came from this library's CreatePlugin
            unsafe { (self.destroy)(Box::into_raw(plugin)) };
        }
    }
}

enum PluginHandle {
    InProcess(Box<dyn Plugin>),
    Library(LibraryPlugin),
}

impl PluginHandle {
    fn plugin_mut(&mut self) -> Option<&mut dyn Plugin> {
        match self {
            Self::InProcess(plugin) => Some(plugin.as_mut()),
            Self::Library(library) => library.plugin.as_deref_mut().map(|p| -> &mut dyn Plugin { p.as_mut() }),
        }
    }
}

struct LoadedPlugin {
    info: PluginInfo,
    handle: PluginHandle,
    initialized: bool,
}

/// Loads plugins and drives their lifecycle
///
/// Plugins are initialized and shut down in load order and reverse load order
/// respectively.
#[derive(Default)]
pub struct PluginManager {
    plugins: IndexMap<String, LoadedPlugin>,
}

impl PluginManager {
    /// Create a manager with no plugins
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin linked into the host
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> PluginResult<PluginInfo> {
        let info = plugin.info();
        self.accept(info, PluginHandle::InProcess(plugin))
    }

    /// Load one plugin library
    #[allow(unsafe_code)]
    pub fn load_library(&mut self, path: &Path) -> PluginResult<PluginInfo> {
        tracing::info!(path = %path.display(), "Loading plugin library");

        // SAFETY: loading runs the library's initializers; plugin directories
        // are trusted like the agent itself
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| PluginError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        // SAFETY: symbol types are fixed by the plugin interface
        let (create, destroy) = unsafe {
            let create = library
                .get::<CreatePluginFn>(CREATE_PLUGIN_SYMBOL.as_bytes())
                .map_err(|_| PluginError::MissingSymbol {
                    path: path.to_path_buf(),
                    symbol: CREATE_PLUGIN_SYMBOL.to_string(),
                })?;
            let destroy = library
                .get::<DestroyPluginFn>(DESTROY_PLUGIN_SYMBOL.as_bytes())
                .map_err(|_| PluginError::MissingSymbol {
                    path: path.to_path_buf(),
                    symbol: DESTROY_PLUGIN_SYMBOL.to_string(),
                })?;
            (*create, *destroy)
        };

        // SAFETY: CreatePlugin returns an owned, boxed plugin or null
        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(PluginError::LoadFailed {
                path: path.to_path_buf(),
                message: format!("{CREATE_PLUGIN_SYMBOL} returned null"),
            });
        }
        // SAFETY: non-null pointer from Box::into_raw in the library
        let plugin = unsafe { Box::from_raw(raw) };
        let info = plugin.info();

        let handle = PluginHandle::Library(LibraryPlugin {
            plugin: Some(plugin),
            destroy,
            path: path.to_path_buf(),
            _library: library,
        });
        self.accept(info, handle)
    }

    /// Load every plugin library directly inside `dir`
    ///
    /// A missing directory loads nothing. Libraries that fail to load are
    /// logged and skipped. Returns the number of plugins loaded.
    #[tracing::instrument(skip(self), fields(dir = %dir.display()))]
    pub fn load_directory(&mut self, dir: &Path) -> usize {
        if !dir.is_dir() {
            tracing::warn!("Plugin directory does not exist");
            return 0;
        }

        let libraries: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read plugin directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(std::env::consts::DLL_EXTENSION))
            })
            .collect();

        let mut loaded = 0;
        for path in &libraries {
            match self.load_library(path) {
                Ok(info) => {
                    loaded += 1;
                    tracing::debug!(plugin = %info.name, path = %path.display(), "Plugin loaded");
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to load plugin"),
            }
        }

        tracing::info!(loaded, found = libraries.len(), "Loaded plugins from directory");
        loaded
    }

    fn accept(&mut self, info: PluginInfo, handle: PluginHandle) -> PluginResult<PluginInfo> {
        if self.plugins.contains_key(&info.name) {
            tracing::warn!(plugin = %info.name, "Plugin is already loaded");
            return Err(PluginError::AlreadyLoaded(info.name));
        }
        if info.api_version != PLUGIN_API_VERSION {
            tracing::error!(
                plugin = %info.name,
                required = info.api_version,
                provided = PLUGIN_API_VERSION,
                "Plugin has incompatible API version"
            );
            return Err(PluginError::InvalidVersion {
                name: info.name,
                required: info.api_version,
                provided: PLUGIN_API_VERSION,
            });
        }

        tracing::info!(
            plugin = %info.name,
            version = %info.version,
            description = %info.description,
            "Plugin accepted"
        );
        self.plugins.insert(
            info.name.clone(),
            LoadedPlugin {
                info: info.clone(),
                handle,
                initialized: false,
            },
        );
        Ok(info)
    }

    /// Initialize every plugin not yet initialized, then let it load its configuration
    ///
    /// A plugin whose initialization fails stays loaded but inactive; a
    /// configuration failure is only logged. Returns the number of plugins
    /// initialized by this call.
    pub fn initialize_plugins(&mut self, host: &mut dyn PluginHost, config_dir: &Path) -> usize {
        let mut initialized = 0;
        for (name, loaded) in &mut self.plugins {
            if loaded.initialized {
                continue;
            }
            let Some(plugin) = loaded.handle.plugin_mut() else {
                continue;
            };

            if let Err(e) = plugin.initialize(host) {
                tracing::error!(plugin = %name, error = %e, "Failed to initialize plugin");
                continue;
            }
            if let Err(e) = plugin.load_configurations(config_dir) {
                tracing::warn!(plugin = %name, error = %e, "Failed to load plugin configurations");
            }

            loaded.initialized = true;
            initialized += 1;
            tracing::info!(plugin = %name, "Plugin initialized");
        }
        initialized
    }

    /// Shut down and drop one plugin
    pub fn unload(&mut self, name: &str) -> PluginResult {
        let mut loaded = self
            .plugins
            .shift_remove(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        shutdown(name, &mut loaded);
        Ok(())
    }

    /// Shut down and drop every plugin, last loaded first
    pub fn unload_all(&mut self) {
        if self.plugins.is_empty() {
            return;
        }
        tracing::info!(count = self.plugins.len(), "Unloading plugins");
        while let Some((name, mut loaded)) = self.plugins.pop() {
            shutdown(&name, &mut loaded);
        }
    }

    /// Number of loaded plugins
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Names of loaded plugins in load order
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    /// Description of a loaded plugin
    pub fn plugin_info(&self, name: &str) -> Option<&PluginInfo> {
        self.plugins.get(name).map(|loaded| &loaded.info)
    }

    /// Whether a plugin with this name is loaded
    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }
}

fn shutdown(name: &str, loaded: &mut LoadedPlugin) {
    if loaded.initialized {
        if let Some(plugin) = loaded.handle.plugin_mut() {
            tracing::debug!(plugin = %name, "Shutting down plugin");
            plugin.shutdown();
        }
        loaded.initialized = false;
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.unload_all();
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugin_names())
            .finish()
    }
}
