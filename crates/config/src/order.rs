//! Execution order
//!
//! Turns the flat task list and its "runs after me" edges into a linear
//! order in which, for every edge `A -> B`, `A` comes before `B`.

use crate::tasks::TaskInfo;
use hookline_core::{ConfigError, ConfigResult};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Build the execution order for `tasks`
///
/// Depth-first, post-order over the followBy graph, then reversed. Nodes are
/// visited in declaration order so the result is deterministic. A successor
/// key that names no task is skipped with a warning; a cycle aborts with
/// [`ConfigError::DependencyCycle`]. Two tasks deriving the same key are
/// rejected instead of silently shadowing each other.
#[tracing::instrument(skip(tasks), fields(task_count = tasks.len()))]
pub fn build_execution_order(tasks: &[TaskInfo]) -> ConfigResult<Vec<String>> {
    let mut graph: IndexMap<String, Vec<String>> = IndexMap::with_capacity(tasks.len());
    for task in tasks {
        let key = task.key();
        if graph.contains_key(&key) {
            return Err(ConfigError::InvalidFormat(format!(
                "task key '{key}' is derived from more than one config_file"
            )));
        }
        if task.has_follow_up_tasks() {
            tracing::debug!(task = %key, follow_by = ?task.follow_by, "Task has follow-up tasks");
        }
        graph.insert(key, task.follow_by.clone());
    }

    let mut visitor = Visitor {
        graph: &graph,
        visited: HashSet::with_capacity(graph.len()),
        path: Vec::new(),
        order: Vec::with_capacity(graph.len()),
    };
    for key in graph.keys() {
        visitor.visit(key)?;
    }

    let mut order = visitor.order;
    order.reverse();

    tracing::info!(order = %order.join(" -> "), "Built execution order");
    Ok(order)
}

struct Visitor<'a> {
    graph: &'a IndexMap<String, Vec<String>>,
    visited: HashSet<&'a str>,
    // Keys on the current recursion path, outermost first
    path: Vec<&'a str>,
    order: Vec<String>,
}

impl<'a> Visitor<'a> {
    fn visit(&mut self, key: &'a str) -> ConfigResult<()> {
        if let Some(start) = self.path.iter().position(|k| *k == key) {
            let mut cycle: Vec<String> = self.path[start..].iter().map(ToString::to_string).collect();
            cycle.push(key.to_string());
            tracing::error!(cycle = %cycle.join(" -> "), "Circular dependency detected");
            return Err(ConfigError::DependencyCycle { cycle });
        }

        if self.visited.contains(key) {
            return Ok(());
        }

        self.path.push(key);

        let graph = self.graph;
        if let Some(successors) = graph.get(key) {
            for next in successors {
                match graph.get_key_value(next.as_str()) {
                    Some((successor, _)) => self.visit(successor)?,
                    None => {
                        tracing::warn!(task = %key, follow = %next, "Follow-up task not found, skipping");
                    }
                }
            }
        }

        self.path.pop();
        self.visited.insert(key);
        self.order.push(key.to_string());
        Ok(())
    }
}
