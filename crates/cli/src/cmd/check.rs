//! Check command implementation
//!
//! Loads tasks.toml, orders it, and runs the hook factory against a
//! recording backend, so every address and task creator is resolved the way
//! the agent would resolve it, without touching a process.

use clap::Args;
use hookline_config::{TaskInfo, TaskLoader, build_execution_order};
use hookline_core::ModContext;
use hookline_engine::{
    DispatchTable, HookFactory, HookManager, HostRegistry, PluginManager, RecordingBackend,
};
use hookline_memory::MemoryPlugin;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::command::Command;
use crate::error::Result;

/// Validate task configuration offline
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Directory containing tasks.toml
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub config_dir: PathBuf,

    /// Also load plugin libraries from this directory
    #[arg(long, value_name = "DIR")]
    pub plugin_dir: Option<PathBuf>,
}

/// What the agent would install for a configuration directory
#[derive(Debug)]
pub struct CheckReport {
    /// Loaded task entries
    pub tasks: Vec<TaskInfo>,
    /// Task keys in execution order
    pub order: Vec<String>,
    /// Hook address of each task key
    pub addresses: Vec<(String, usize)>,
    /// Task names per hook address, in install order
    pub hooks: Vec<(usize, Vec<String>)>,
}

impl Command for CheckCommand {
    type Output = CheckReport;

    fn execute(&self) -> Result<CheckReport> {
        let tasks_file = self.config_dir.join("tasks.toml");
        let tasks = TaskLoader::load_tasks(&tasks_file)?;
        let order = build_execution_order(&tasks)?;

        // Dropped last: the host, the manager and the report hold objects
        // created by plugin libraries
        let mut plugins = PluginManager::new();
        let mut host =
            HostRegistry::new(self.config_dir.join("data"), Arc::new(ModContext::new()));
        plugins.register(Box::new(MemoryPlugin::new()))?;
        if let Some(dir) = &self.plugin_dir {
            plugins.load_directory(dir);
        }
        plugins.initialize_plugins(&mut host, &self.config_dir);

        let mut manager =
            HookManager::with_dispatch_table(RecordingBackend::new(), Arc::new(DispatchTable::new()));
        let report = HookFactory::new(&host.configs, &host.tasks).create_hooks(&tasks, &mut manager)?;

        let hooks = manager
            .addresses()
            .into_iter()
            .filter_map(|address| {
                manager
                    .hook(address)
                    .map(|hook| (address, hook.task_names()))
            })
            .collect();

        Ok(CheckReport {
            tasks,
            order,
            addresses: report.addresses.into_iter().collect(),
            hooks,
        })
    }
}

impl CheckReport {
    /// Print the report to stdout
    pub fn print(&self) {
        println!("{}", "Execution order".bold());
        for (index, key) in self.order.iter().enumerate() {
            let Some(task) = self.tasks.iter().find(|t| &t.key() == key) else {
                continue;
            };
            let address = self
                .addresses
                .iter()
                .find(|(k, _)| k == key)
                .map_or_else(|| "-".to_string(), |(_, a)| format!("{a:#x}"));
            println!(
                "  {:>2}. {} {} [{}] at {}",
                index + 1,
                key.cyan(),
                task.name.dimmed(),
                task.config_type,
                address.yellow()
            );
            if task.has_follow_up_tasks() {
                println!("      followed by {}", task.follow_by.join(", "));
            }
        }

        println!();
        println!("{}", "Hooks".bold());
        for (address, tasks) in &self.hooks {
            println!("  {} {}", format!("{address:#x}").yellow(), tasks.join(" -> "));
        }

        println!();
        println!(
            "{} {} tasks, {} hooks",
            "OK".green().bold(),
            self.order.len(),
            self.hooks.len()
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::error::CommandError;
    use hookline_core::ConfigErrorKind;
    use std::fs;
    use tempfile::TempDir;

    fn command(dir: &TempDir) -> CheckCommand {
        CheckCommand {
            config_dir: dir.path().to_path_buf(),
            plugin_dir: None,
        }
    }

    #[test]
    fn test_check_resolves_chained_addresses() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("tasks.toml"),
            r#"
            [tasks.expand]
            name = "Expand"
            type = "memory"
            config_file = "expand.toml"
            followBy = "relocate"

            [tasks.relocate]
            name = "Relocate"
            type = "patch"
            config_file = "relocate.toml"
            "#,
        )
        .unwrap();
        fs::write(
            temp.path().join("expand.toml"),
            "[memory.cards]\naddress = \"0x1CFDC58\"\ncopyAfter = \"0x4A3F10\"\noriginalSize = 16\nnewSize = 32\n",
        )
        .unwrap();
        fs::write(
            temp.path().join("relocate.toml"),
            "readFromContext = \"expand_cards\"\n[patch.\"0x4B2C10\"]\nbytes = \"8B 0D XX XX XX XX\"\noffset = 0\n",
        )
        .unwrap();

        let report = command(&temp).execute().unwrap();
        assert_eq!(report.order, vec!["expand", "relocate"]);
        assert_eq!(
            report.addresses,
            vec![("expand".to_string(), 0x004A_3F10), ("relocate".to_string(), 0x004A_3F10)]
        );
        assert_eq!(
            report.hooks,
            vec![(0x004A_3F10, vec!["CopyMemory".to_string(), "PatchMemory".to_string()])]
        );
    }

    #[test]
    fn test_check_reports_cycles() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("tasks.toml"),
            r#"
            [tasks.a]
            name = "A"
            type = "patch"
            config_file = "a.toml"
            followBy = "b"

            [tasks.b]
            name = "B"
            type = "patch"
            config_file = "b.toml"
            followBy = "a"
            "#,
        )
        .unwrap();

        match command(&temp).execute().unwrap_err() {
            CommandError::Config(e) => assert_eq!(e.kind(), ConfigErrorKind::DependencyCycle),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_check_missing_tasks_file() {
        let temp = TempDir::new().unwrap();
        match command(&temp).execute().unwrap_err() {
            CommandError::Config(e) => assert_eq!(e.kind(), ConfigErrorKind::FileNotFound),
            other => panic!("unexpected error: {other}"),
        }
    }
}
