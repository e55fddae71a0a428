//! A single interception point and its task chain

use hookline_core::{Task, TaskError, TaskResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Interception point bound to one target address
///
/// Tasks are appended while the hook is being built; once the hook is shared
/// with the dispatch table its task list is frozen and only the trampoline,
/// stub address and in-flight counter change.
pub struct Hook {
    address: usize,
    tasks: Vec<Box<dyn Task>>,
    stub: AtomicUsize,
    trampoline: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Hook {
    /// Create an empty hook for `address`
    pub fn new(address: usize) -> Self {
        Self {
            address,
            tasks: Vec::new(),
            stub: AtomicUsize::new(0),
            trampoline: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Target address
    pub fn address(&self) -> usize {
        self.address
    }

    /// Append a task; tasks run in the order they were added
    pub fn add_task(&mut self, task: Box<dyn Task>) {
        tracing::debug!(
            address = format_args!("{:#x}", self.address),
            task = %task.name(),
            position = self.tasks.len(),
            "Task added to hook"
        );
        self.tasks.push(task);
    }

    /// Number of attached tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Names of attached tasks in execution order
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Address of the generated stub, once installed
    pub fn stub_address(&self) -> Option<usize> {
        match self.stub.load(Ordering::Acquire) {
            0 => None,
            stub => Some(stub),
        }
    }

    pub(crate) fn set_stub_address(&self, stub: usize) {
        self.stub.store(stub, Ordering::Release);
    }

    /// Address of the original function's relocated prologue, once installed
    pub fn trampoline(&self) -> Option<usize> {
        match self.trampoline.load(Ordering::Acquire) {
            0 => None,
            trampoline => Some(trampoline),
        }
    }

    pub(crate) fn set_trampoline(&self, trampoline: usize) {
        self.trampoline.store(trampoline, Ordering::Release);
    }

    /// Dispatches currently running this hook's task chain
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run the task chain for one interception and return the trampoline
    pub(crate) fn dispatch(&self) -> usize {
        let _guard = InFlightGuard::enter(&self.in_flight);
        self.execute_tasks();
        self.trampoline.load(Ordering::Acquire)
    }

    /// Run every task in order
    ///
    /// A failing or panicking task is logged and the remaining tasks still run.
    /// Returns the number of tasks that failed.
    pub fn execute_tasks(&self) -> usize {
        let span = tracing::info_span!("hook", address = format_args!("{:#x}", self.address));
        let _enter = span.enter();

        let mut failures = 0;
        for (index, task) in self.tasks.iter().enumerate() {
            let start = Instant::now();
            let result = run_task(task.as_ref());
            let elapsed_ms = start.elapsed().as_millis();

            match result {
                Ok(()) => {
                    tracing::debug!(index, task = %task.name(), elapsed_ms, "Task completed");
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(
                        index,
                        task = %task.name(),
                        description = %task.description(),
                        elapsed_ms,
                        error = %e,
                        "Task failed, continuing with remaining tasks"
                    );
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("address", &format_args!("{:#x}", self.address))
            .field("tasks", &self.task_names())
            .field("stub", &self.stub_address())
            .field("trampoline", &self.trampoline())
            .finish_non_exhaustive()
    }
}

/// Execute one task, turning a panic into [`TaskError::Unknown`]
fn run_task(task: &dyn Task) -> TaskResult {
    panic::catch_unwind(AssertUnwindSafe(|| task.execute())).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Err(TaskError::Unknown(format!("task panicked: {message}")))
    })
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Task that appends its label to a shared log
    pub(crate) struct RecordingTask {
        pub label: String,
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail: bool,
    }

    impl RecordingTask {
        pub(crate) fn boxed(label: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Box<dyn Task> {
            Box::new(Self {
                label: label.to_string(),
                log: Arc::clone(log),
                fail,
            })
        }
    }

    impl Task for RecordingTask {
        fn execute(&self) -> TaskResult {
            self.log.lock().unwrap().push(self.label.clone());
            if self.fail {
                Err(TaskError::PatchFailed(format!("{} failed", self.label)))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            &self.label
        }

        fn description(&self) -> String {
            format!("records '{}'", self.label)
        }
    }

    struct PanickingTask;

    impl Task for PanickingTask {
        fn execute(&self) -> TaskResult {
            panic!("boom");
        }

        fn name(&self) -> &str {
            "panicking"
        }

        fn description(&self) -> String {
            "always panics".into()
        }
    }

    #[test]
    fn test_tasks_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hook = Hook::new(0x40_1000);
        hook.add_task(RecordingTask::boxed("first", &log, false));
        hook.add_task(RecordingTask::boxed("second", &log, false));

        assert_eq!(hook.execute_tasks(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(hook.task_names(), vec!["first", "second"]);
    }

    #[test]
    fn test_failure_does_not_stop_later_tasks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hook = Hook::new(0x40_1000);
        hook.add_task(RecordingTask::boxed("a", &log, false));
        hook.add_task(RecordingTask::boxed("b", &log, true));
        hook.add_task(RecordingTask::boxed("c", &log, false));

        assert_eq!(hook.execute_tasks(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_panic_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hook = Hook::new(0x40_1000);
        hook.add_task(Box::new(PanickingTask));
        hook.add_task(RecordingTask::boxed("after", &log, false));

        assert_eq!(hook.execute_tasks(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_dispatch_returns_trampoline_and_balances_counter() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hook = Hook::new(0x40_1000);
        hook.add_task(RecordingTask::boxed("only", &log, false));
        assert_eq!(hook.trampoline(), None);

        hook.set_trampoline(0x7000_0000);
        assert_eq!(hook.dispatch(), 0x7000_0000);
        assert_eq!(hook.in_flight(), 0);
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
