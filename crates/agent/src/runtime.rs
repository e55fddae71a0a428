//! The hookline runtime inside the target process
//!
//! An [`Agent`] owns everything the injected module builds: plugins, the
//! registries they fill, the shared context and the hook manager. Installing
//! is all-or-nothing; a failure at any step releases whatever was already
//! hooked.

use crate::error::{AgentError, AgentResult};
use hookline_config::{LaunchFile, Settings, logging};
use hookline_core::ModContext;
use hookline_core::process::CURRENT_PROCESS;
use hookline_engine::{
    FactoryReport, HookBackend, HookFactory, HookManager, HostRegistry, Plugin, PluginInfo,
    PluginManager, PluginResult,
};
use hookline_memory::MemoryPlugin;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Counts reported after a successful install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallSummary {
    /// Plugins loaded and initialized
    pub plugins: usize,
    /// Hooks installed
    pub hooks: usize,
    /// Tasks attached across all hooks
    pub tasks: usize,
}

/// Everything the injected module owns
///
/// Field order is drop order: hooks hold tasks and the host holds creators
/// whose code may live in plugin libraries, so both go before the plugins.
pub struct Agent<B: HookBackend> {
    hooks: HookManager<B>,
    host: HostRegistry,
    plugins: PluginManager,
    settings: Settings,
}

impl<B: HookBackend> Agent<B> {
    /// Create an agent installing through `backend`
    pub fn new(settings: Settings, backend: B) -> Self {
        let hooks = HookManager::new(backend).with_quiesce_timeout(settings.quiesce_timeout());
        Self::with_hook_manager(settings, hooks)
    }

    /// Create an agent around an existing hook manager
    pub fn with_hook_manager(settings: Settings, hooks: HookManager<B>) -> Self {
        let host = HostRegistry::new(settings.data_dir.clone(), Arc::new(ModContext::new()));
        Self {
            hooks,
            host,
            plugins: PluginManager::new(),
            settings,
        }
    }

    /// Add an in-process plugin; it is initialized with the others on install
    pub fn register_plugin(&mut self, plugin: Box<dyn Plugin>) -> PluginResult<PluginInfo> {
        self.plugins.register(plugin)
    }

    /// Load and initialize the built-in memory plugin and every plugin library
    pub fn load_plugins(&mut self) -> usize {
        if let Err(e) = self.plugins.register(Box::new(MemoryPlugin::new())) {
            tracing::error!(error = %e, "Failed to register built-in memory plugin");
        }
        self.plugins.load_directory(&self.settings.plugin_dir);

        let config_dir = self
            .settings
            .tasks_file
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();
        self.plugins.initialize_plugins(&mut self.host, &config_dir)
    }

    /// Attach the tasks declared in the tasks file to hooks
    pub fn create_hooks(&mut self) -> AgentResult<FactoryReport> {
        let factory = HookFactory::new(&self.host.configs, &self.host.tasks);
        Ok(factory.create_hooks_from_tasks(&self.settings.tasks_file, &mut self.hooks)?)
    }

    /// Load plugins, build hooks and install them
    ///
    /// On failure every hook is released before the error is returned.
    #[tracing::instrument(skip(self), fields(tasks_file = %self.settings.tasks_file.display()))]
    pub fn install(&mut self) -> AgentResult<InstallSummary> {
        let start = Instant::now();
        let plugins = self.load_plugins();
        tracing::info!(plugins, names = ?self.plugins.plugin_names(), "Plugins ready");

        let result = self
            .create_hooks()
            .and_then(|report| {
                self.hooks.install_all()?;
                Ok(report)
            });

        match result {
            Ok(report) => {
                let summary = InstallSummary {
                    plugins,
                    hooks: self.hooks.hook_count(),
                    tasks: report.attached,
                };
                tracing::info!(
                    hooks = summary.hooks,
                    tasks = summary.tasks,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Hooks installed"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(error = %e, "Installation failed, releasing hooks");
                self.release();
                Err(e)
            }
        }
    }

    /// Uninstall every hook
    pub fn release(&mut self) {
        if let Err(e) = self.hooks.uninstall_all() {
            tracing::error!(error = %e, "Failed to release hooks cleanly");
        }
    }

    /// Stop intercepting without waiting or releasing anything
    ///
    /// Safe under the loader lock. Hooks, registries and plugin libraries stay
    /// alive; a later [`shutdown`](Self::shutdown) releases them.
    pub fn disable_hooks(&mut self) {
        if let Err(e) = self.hooks.disable_all() {
            tracing::error!(error = %e, "Failed to disable hooks");
        }
    }

    /// Release hooks, drop what plugins registered, then unload plugins
    pub fn shutdown(&mut self) {
        tracing::info!("Shutting down");
        self.release();
        self.host.clear();
        self.plugins.unload_all();
    }

    /// Active settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The hook manager
    pub fn hooks(&self) -> &HookManager<B> {
        &self.hooks
    }

    /// The loaded plugins
    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Registries and shared context
    pub fn host(&self) -> &HostRegistry {
        &self.host
    }
}

impl<B: HookBackend> std::fmt::Debug for Agent<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("hooks", &self.hooks)
            .field("plugins", &self.plugins)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Settings for a module living in `module_dir`, with launch file overrides applied
pub fn resolve_settings(module_dir: &Path) -> AgentResult<Settings> {
    let mut settings = Settings::load_from_dir(module_dir)?;
    if let Some(launch) = LaunchFile::read(module_dir)? {
        tracing::debug!(process = %launch.process, module = %launch.module.display(), "Launch file found");
        settings.apply_launch(&launch);
    }
    Ok(settings)
}

/// Everything the install thread does: settings, logging, delay, install
pub fn bootstrap<B: HookBackend>(
    module_dir: &Path,
    make_hooks: impl FnOnce(&Settings) -> HookManager<B>,
) -> AgentResult<Agent<B>> {
    let settings = resolve_settings(module_dir)?;
    logging::init(&settings.log_level, Some(&settings.log_file))?;

    tracing::info!(
        pid = CURRENT_PROCESS.id,
        process = %CURRENT_PROCESS.name,
        arch = CURRENT_PROCESS.arch,
        module_dir = %module_dir.display(),
        "hookline agent starting"
    );

    std::thread::sleep(settings.install_delay());

    let hooks = make_hooks(&settings);
    let mut agent = Agent::with_hook_manager(settings, hooks);
    agent.install()?;
    Ok(agent)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use hookline_core::ConfigErrorKind;
    use hookline_engine::backend::BackendCall;
    use hookline_engine::dispatch::DispatchTable;
    use hookline_engine::plugin::PLUGIN_API_VERSION;
    use hookline_engine::{FactoryErrorKind, HookState, PluginHost, RecordingBackend};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Events = Arc<Mutex<Vec<String>>>;

    struct DropFlag {
        label: &'static str,
        events: Events,
    }

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.events.lock().unwrap().push(format!("{} dropped", self.label));
        }
    }

    struct TrackingPlugin {
        events: Events,
    }

    impl Plugin for TrackingPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo {
                name: "tracking".into(),
                version: "1.0.0".into(),
                description: "records teardown order".into(),
                api_version: PLUGIN_API_VERSION,
            }
        }

        fn initialize(&mut self, host: &mut dyn PluginHost) -> PluginResult {
            let flag = DropFlag {
                label: "creator",
                events: Arc::clone(&self.events),
            };
            host.register_task_creator(
                "TrackingConfig",
                Box::new(move |_| {
                    let _ = &flag;
                    None
                }),
            )?;
            host.mod_context().store(
                "tracking",
                DropFlag {
                    label: "context value",
                    events: Arc::clone(&self.events),
                },
            );
            Ok(())
        }

        fn shutdown(&mut self) {
            self.events.lock().unwrap().push("plugin shutdown".into());
        }
    }

    const CHAINED_TASKS: &str = r#"
            [tasks.expand]
            name = "expand"
            config_file = "expand.toml"
            type = "memory"
            followBy = "relocate"

            [tasks.relocate]
            name = "relocate"
            config_file = "relocate.toml"
            type = "patch"
            "#;

    fn write_fixture(temp: &TempDir, tasks: &str) {
        let config = temp.path().join("config");
        fs::create_dir_all(&config).unwrap();
        fs::write(
            temp.path().join("hookline.toml"),
            "installDelayMs = 0\nlogLevel = \"debug\"\n",
        )
        .unwrap();
        fs::write(config.join("tasks.toml"), tasks).unwrap();
        fs::write(
            config.join("expand.toml"),
            r#"
            [memory.cards]
            address = "0x1CFDC58"
            copyAfter = "0x4A3F10"
            originalSize = 16
            newSize = 64
            writeInContext = { enabled = true, name = "cards" }
            "#,
        )
        .unwrap();
        fs::write(
            config.join("relocate.toml"),
            "readFromContext = \"cards\"\n[patch.\"0x4B2C10\"]\nbytes = \"8D 86 XX XX XX XX\"\noffset = \"0x10\"\n",
        )
        .unwrap();
    }

    fn private_hooks(_: &Settings) -> HookManager<RecordingBackend> {
        HookManager::with_dispatch_table(RecordingBackend::new(), Arc::new(DispatchTable::new()))
    }

    #[test]
    fn test_bootstrap_installs_chained_tasks() {
        let temp = TempDir::new().unwrap();
        write_fixture(&temp, CHAINED_TASKS);

        let mut agent = bootstrap(temp.path(), private_hooks).unwrap();
        assert_eq!(agent.hooks().hook_count(), 1);
        assert_eq!(agent.hooks().hook_state(0x004A_3F10), Some(HookState::Enabled));
        assert_eq!(
            agent.hooks().hook(0x004A_3F10).unwrap().task_names(),
            vec!["CopyMemory", "PatchMemory"]
        );
        assert!(agent.plugins().is_loaded(MemoryPlugin::NAME));
        assert!(temp.path().join("logs/hookline.log").exists());

        agent.shutdown();
        assert_eq!(agent.hooks().hook_count(), 0);
        assert_eq!(agent.plugins().plugin_count(), 0);
    }

    #[test]
    fn test_failed_install_leaves_nothing_hooked() {
        let temp = TempDir::new().unwrap();
        write_fixture(
            &temp,
            r#"
            [tasks.relocate]
            name = "relocate"
            config_file = "relocate.toml"
            type = "patch"
            "#,
        );

        let settings = resolve_settings(temp.path()).unwrap();
        let mut agent = Agent::with_hook_manager(settings.clone(), private_hooks(&settings));
        let err = agent.install().unwrap_err();
        match err {
            AgentError::Factory(e) => assert_eq!(e.kind(), FactoryErrorKind::InvalidConfig),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(agent.hooks().hook_count(), 0);
        assert!(agent.hooks().dispatch_table().is_empty());
    }

    #[test]
    fn test_shutdown_drops_plugin_objects_before_unloading() {
        let temp = TempDir::new().unwrap();
        write_fixture(&temp, CHAINED_TASKS);
        let events: Events = Arc::new(Mutex::new(Vec::new()));

        let settings = resolve_settings(temp.path()).unwrap();
        let mut agent = Agent::with_hook_manager(settings.clone(), private_hooks(&settings));
        agent
            .register_plugin(Box::new(TrackingPlugin {
                events: Arc::clone(&events),
            }))
            .unwrap();
        agent.install().unwrap();
        assert!(agent.host().tasks.has_creator("TrackingConfig"));
        assert!(events.lock().unwrap().is_empty());

        agent.shutdown();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["creator dropped", "context value dropped", "plugin shutdown"]
        );
        assert!(agent.host().tasks.is_empty());
        assert_eq!(agent.plugins().plugin_count(), 0);
    }

    #[test]
    fn test_disable_hooks_keeps_hooks_registered() {
        let temp = TempDir::new().unwrap();
        write_fixture(&temp, CHAINED_TASKS);

        let settings = resolve_settings(temp.path()).unwrap();
        let mut agent = Agent::with_hook_manager(settings.clone(), private_hooks(&settings));
        agent.install().unwrap();

        agent.disable_hooks();
        assert_eq!(agent.hooks().enabled_count(), 0);
        assert_eq!(agent.hooks().hook_count(), 1);
        assert_eq!(agent.hooks().dispatch_table().len(), 1);
        assert!(agent.plugins().is_loaded(MemoryPlugin::NAME));
        assert!(
            !agent
                .hooks()
                .backend()
                .calls()
                .iter()
                .any(|c| matches!(c, BackendCall::Remove(_)))
        );

        agent.shutdown();
        assert!(agent.hooks().dispatch_table().is_empty());
    }

    #[test]
    fn test_cycle_surfaces_as_dependency_cycle() {
        let temp = TempDir::new().unwrap();
        write_fixture(
            &temp,
            r#"
            [tasks.expand]
            name = "expand"
            config_file = "expand.toml"
            type = "memory"
            followBy = "relocate"

            [tasks.relocate]
            name = "relocate"
            config_file = "relocate.toml"
            type = "patch"
            followBy = "expand"
            "#,
        );

        let settings = resolve_settings(temp.path()).unwrap();
        let mut agent = Agent::with_hook_manager(settings.clone(), private_hooks(&settings));
        match agent.install().unwrap_err() {
            AgentError::Factory(e) => {
                assert_eq!(e.kind(), FactoryErrorKind::ExecutionOrder);
                assert_eq!(e.config_kind(), Some(ConfigErrorKind::DependencyCycle));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(agent.hooks().hook_count(), 0);
    }

    #[test]
    fn test_launch_file_overrides_directories() {
        let temp = TempDir::new().unwrap();
        let elsewhere = temp.path().join("mods");
        LaunchFile {
            process: "game.exe".into(),
            module: temp.path().join("hookline_agent.dll"),
            config_dir: Some(elsewhere.clone()),
            plugin_dir: None,
        }
        .write(temp.path())
        .unwrap();

        let settings = resolve_settings(temp.path()).unwrap();
        assert_eq!(settings.tasks_file, elsewhere.join("tasks.toml"));
        assert_eq!(settings.plugin_dir, temp.path().join("plugins"));
    }
}
