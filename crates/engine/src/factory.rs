//! Turning task metadata into hooks
//!
//! Tasks are processed strictly in execution order. Configurations that
//! implement [`AddressTrigger`](hookline_core::AddressTrigger) hook their own
//! address; every other configuration runs at an address inherited from an
//! earlier task:
//!
//! - the task named by `addressFrom`, when set
//! - otherwise the tasks listing this one in `followBy`; they must all agree
//!   on one address

use crate::backend::HookBackend;
use crate::error::{FactoryError, FactoryResult};
use crate::manager::HookManager;
use crate::task_factory::TaskFactory;
use hookline_config::{ConfigFactory, TaskInfo, TaskLoader, build_execution_order};
use hookline_core::ConfigPtr;
use indexmap::{IndexMap, IndexSet};
use std::path::Path;

/// What a factory run attached
#[derive(Debug, Default)]
pub struct FactoryReport {
    /// Task keys in the order they were processed
    pub order: Vec<String>,
    /// Hook address resolved for each task
    pub addresses: IndexMap<String, usize>,
    /// Every configuration loaded, in load order
    pub configs: Vec<ConfigPtr>,
    /// Number of tasks attached to hooks
    pub attached: usize,
}

/// Orchestrates config loading, address resolution and task creation
#[derive(Debug, Clone, Copy)]
pub struct HookFactory<'a> {
    configs: &'a ConfigFactory,
    tasks: &'a TaskFactory,
}

impl<'a> HookFactory<'a> {
    /// Create a factory drawing on the given registries
    pub fn new(configs: &'a ConfigFactory, tasks: &'a TaskFactory) -> Self {
        Self { configs, tasks }
    }

    /// Load `tasks_path` and attach every task it declares to `manager`
    #[tracing::instrument(skip(self, manager), fields(path = %tasks_path.display()))]
    pub fn create_hooks_from_tasks<B: HookBackend>(
        &self,
        tasks_path: &Path,
        manager: &mut HookManager<B>,
    ) -> FactoryResult<FactoryReport> {
        let tasks = TaskLoader::load_tasks(tasks_path).map_err(FactoryError::ConfigLoadFailed)?;
        self.create_hooks(&tasks, manager)
    }

    /// Attach every task in `tasks` to `manager`
    pub fn create_hooks<B: HookBackend>(
        &self,
        tasks: &[TaskInfo],
        manager: &mut HookManager<B>,
    ) -> FactoryResult<FactoryReport> {
        let order = build_execution_order(tasks).map_err(|e| {
            tracing::error!(error = %e, "Failed to build task execution order");
            FactoryError::ExecutionOrder(e)
        })?;

        let by_key: IndexMap<String, &TaskInfo> =
            tasks.iter().map(|task| (task.key(), task)).collect();

        tracing::info!(count = order.len(), "Processing tasks in dependency order");

        let mut report = FactoryReport::default();
        for key in &order {
            let task = by_key.get(key).ok_or_else(|| {
                FactoryError::InvalidConfig(format!("task key '{key}' not found in loaded tasks"))
            })?;

            let span = tracing::info_span!("task", key = %key, name = %task.name);
            let _enter = span.enter();
            self.process_task(key, task, &by_key, manager, &mut report)?;
        }

        report.order = order;
        tracing::info!(
            tasks = report.order.len(),
            attached = report.attached,
            hooks = manager.hook_count(),
            "Hooks created from task configuration"
        );
        Ok(report)
    }

    fn process_task<B: HookBackend>(
        &self,
        key: &str,
        task: &TaskInfo,
        by_key: &IndexMap<String, &TaskInfo>,
        manager: &mut HookManager<B>,
        report: &mut FactoryReport,
    ) -> FactoryResult {
        let configs = self
            .configs
            .load_configs(task.config_type, &task.config_path, &task.name)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to load configs");
                FactoryError::ConfigLoadFailed(e)
            })?;
        tracing::debug!(count = configs.len(), "Loaded configurations");

        let mut inherited: Option<usize> = None;
        let mut task_address = None;

        for config in &configs {
            if !config.common().enabled {
                tracing::debug!(config = %config.key(), "Configuration disabled, skipping");
                continue;
            }
            if !config.is_valid() {
                tracing::warn!(config = %config.debug_string(), "Invalid configuration, skipping");
                continue;
            }

            let address = match config.as_address_trigger() {
                Some(trigger) => {
                    let address = trigger.hook_address();
                    if address == 0 {
                        tracing::warn!(config = %config.key(), "No hook address for configuration, skipping");
                        continue;
                    }
                    address
                }
                None => match inherited {
                    Some(address) => address,
                    None => {
                        let address = inherit_address(key, task, by_key, &report.addresses)?;
                        inherited = Some(address);
                        address
                    }
                },
            };

            let created = self.tasks.create_task(config.as_ref()).ok_or_else(|| {
                FactoryError::TaskCreationFailed {
                    key: config.key().to_string(),
                    type_name: config.type_name().to_string(),
                }
            })?;

            manager
                .add_task_to_hook(address, created)
                .map_err(FactoryError::HookCreationFailed)?;

            tracing::debug!(
                config = %config.key(),
                address = format_args!("{address:#x}"),
                "Task attached"
            );
            report.attached += 1;
            task_address = Some(address);
        }

        // A task without configurations still passes its parent's address on
        if task_address.is_none() {
            task_address =
                inherited.or_else(|| inherit_address(key, task, by_key, &report.addresses).ok());
        }

        match task_address {
            Some(address) => {
                tracing::debug!(address = format_args!("{address:#x}"), "Recorded task hook address");
                report.addresses.insert(key.to_string(), address);
            }
            None => tracing::warn!("Task attached nothing and has no hook address"),
        }

        report.configs.extend(configs);
        Ok(())
    }
}

/// Address a task without its own trigger runs at
fn inherit_address(
    key: &str,
    task: &TaskInfo,
    by_key: &IndexMap<String, &TaskInfo>,
    recorded: &IndexMap<String, usize>,
) -> FactoryResult<usize> {
    if let Some(source) = &task.address_from {
        return recorded.get(source).copied().ok_or_else(|| {
            FactoryError::InvalidConfig(format!(
                "task '{key}' takes its address from '{source}', which has no hook address"
            ))
        });
    }

    let candidates: IndexSet<usize> = by_key
        .iter()
        .filter(|(_, parent)| parent.follow_by.iter().any(|k| k == key))
        .filter_map(|(parent_key, _)| recorded.get(parent_key).copied())
        .collect();

    match candidates.len() {
        0 => Err(FactoryError::InvalidConfig(format!(
            "no parent hook address found for task '{key}'; it must follow an address-triggered task"
        ))),
        1 => Ok(candidates[0]),
        _ => Err(FactoryError::AmbiguousAddress {
            task: key.to_string(),
            candidates: candidates
                .iter()
                .map(|address| format!("{address:#x}"))
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}
