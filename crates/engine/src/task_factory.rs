//! Task creation registry
//!
//! Creators are keyed by the configuration's concrete type name
//! ([`ConfigBase::type_name`]). Lookup tries an exact key first; if nothing
//! matches, it falls back to the first registered key that the type name
//! contains, in registration order. The fallback keeps older plugins working
//! whose creators were registered under a shortened name. It is ambiguous when
//! registered keys are substrings of one another.

use hookline_core::{ConfigBase, Task};
use indexmap::IndexMap;

/// Function building a task from a configuration
///
/// Returns `None` when the configuration is not of the type the creator
/// expects.
pub type TaskCreator = Box<dyn Fn(&dyn ConfigBase) -> Option<Box<dyn Task>> + Send + Sync>;

/// Registry of task creators
#[derive(Default)]
pub struct TaskFactory {
    creators: IndexMap<String, TaskCreator>,
}

impl TaskFactory {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `creator` for configurations whose type name is `type_name`
    pub fn register(&mut self, type_name: impl Into<String>, creator: TaskCreator) {
        let type_name = type_name.into();
        if self.creators.contains_key(&type_name) {
            tracing::warn!(type_name = %type_name, "Task creator already registered, replacing");
        } else {
            tracing::debug!(type_name = %type_name, "Registering task creator");
        }
        self.creators.insert(type_name, creator);
    }

    /// Build a task for `config`
    pub fn create_task(&self, config: &dyn ConfigBase) -> Option<Box<dyn Task>> {
        let type_name = config.type_name();

        if let Some(creator) = self.creators.get(type_name) {
            if let Some(task) = creator(config) {
                tracing::debug!(type_name, key = %config.key(), "Task created");
                return Some(task);
            }
        }

        for (registered, creator) in &self.creators {
            if registered == type_name || !type_name.contains(registered.as_str()) {
                continue;
            }
            if let Some(task) = creator(config) {
                tracing::debug!(
                    type_name,
                    creator = %registered,
                    key = %config.key(),
                    "Task created through partial type name match"
                );
                return Some(task);
            }
        }

        tracing::warn!(type_name, key = %config.key(), "No task creator for configuration");
        None
    }

    /// Whether a creator is registered under exactly `type_name`
    pub fn has_creator(&self, type_name: &str) -> bool {
        self.creators.contains_key(type_name)
    }

    /// Registered type names in registration order
    pub fn registered_types(&self) -> Vec<String> {
        self.creators.keys().cloned().collect()
    }

    /// Number of registered creators
    pub fn len(&self) -> usize {
        self.creators.len()
    }

    /// Whether no creator is registered
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }

    /// Drop every registered creator
    pub fn clear(&mut self) {
        self.creators.clear();
    }
}

impl std::fmt::Debug for TaskFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFactory")
            .field("creators", &self.registered_types())
            .finish()
    }
}
