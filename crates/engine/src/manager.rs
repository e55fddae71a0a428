//! Hook lifecycle management
//!
//! The manager owns every [`Hook`], the stub generated for each address and
//! the hooking backend. Installing an address follows a fixed order so the
//! dispatcher can never fire for a stub it does not know:
//!
//! 1. obtain or create the stub
//! 2. create the detour, which yields the trampoline
//! 3. register the stub in the dispatch table
//! 4. point the stub's jump at the trampoline
//! 5. enable the detour
//!
//! A failure after step 3 removes the dispatch entry and the detour again.

use crate::backend::HookBackend;
use crate::dispatch::{DispatchTable, dispatcher_address};
use crate::error::{HookError, HookResult};
use crate::hook::Hook;
use crate::stub::{Stub, StubTemplate};
use hookline_core::Task;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default bound on waiting for running task chains during uninstall
pub const DEFAULT_QUIESCE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of the hooking backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Backend not initialized
    Uninitialized,
    /// Backend ready for hook creation
    Initialized,
}

/// Lifecycle of one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// Collecting tasks, nothing installed
    Pending,
    /// Detour created and dispatch entry registered, not yet active
    Created,
    /// Detour active
    Enabled,
}

struct Entry {
    hook: Arc<Hook>,
    state: HookState,
}

/// Owner of all hooks in the process
pub struct HookManager<B: HookBackend> {
    backend: B,
    state: ManagerState,
    dispatch: Arc<DispatchTable>,
    dispatcher: usize,
    template: &'static StubTemplate,
    hooks: IndexMap<usize, Entry>,
    stubs: HashMap<usize, Stub>,
    quiesce_timeout: Duration,
}

impl<B: HookBackend> HookManager<B> {
    /// Create a manager routing through the process-wide dispatch table
    pub fn new(backend: B) -> Self {
        Self::with_dispatch_table(backend, DispatchTable::global())
    }

    /// Create a manager routing through `dispatch`
    ///
    /// Stubs still call the process-wide dispatcher entry point; a private
    /// table is only useful where stubs are never executed.
    pub fn with_dispatch_table(backend: B, dispatch: Arc<DispatchTable>) -> Self {
        Self {
            backend,
            state: ManagerState::Uninitialized,
            dispatch,
            dispatcher: dispatcher_address(),
            template: StubTemplate::native(),
            hooks: IndexMap::new(),
            stubs: HashMap::new(),
            quiesce_timeout: DEFAULT_QUIESCE_TIMEOUT,
        }
    }

    /// Set how long uninstall waits for running task chains
    #[must_use]
    pub fn with_quiesce_timeout(mut self, timeout: Duration) -> Self {
        self.quiesce_timeout = timeout;
        self
    }

    /// Initialize the backend if that has not happened yet
    pub fn initialize(&mut self) -> HookResult {
        if self.state == ManagerState::Initialized {
            return Ok(());
        }
        self.backend.initialize().map_err(|e| match e {
            HookError::InitFailed(_) => e,
            other => HookError::InitFailed(other.to_string()),
        })?;
        self.state = ManagerState::Initialized;
        tracing::info!("Hooking backend initialized");
        Ok(())
    }

    /// Append `task` to the hook at `address`, creating the hook if needed
    ///
    /// Works before [`initialize`](Self::initialize); tasks accumulate in call
    /// order. Fails once the address has been installed.
    pub fn add_task_to_hook(&mut self, address: usize, task: Box<dyn Task>) -> HookResult {
        if address == 0 {
            return Err(HookError::InvalidAddress(address));
        }

        let entry = self.hooks.entry(address).or_insert_with(|| {
            tracing::debug!(address = format_args!("{address:#x}"), "Creating hook");
            Entry {
                hook: Arc::new(Hook::new(address)),
                state: HookState::Pending,
            }
        });

        if entry.state != HookState::Pending {
            return Err(HookError::AlreadyInstalled(address));
        }
        let hook = Arc::get_mut(&mut entry.hook).ok_or(HookError::AlreadyInstalled(address))?;
        hook.add_task(task);
        Ok(())
    }

    /// Install every pending hook that has at least one task
    ///
    /// Stops at the first failure; hooks installed before it stay installed
    /// until [`uninstall_all`](Self::uninstall_all).
    #[tracing::instrument(skip(self), fields(hooks = self.hooks.len()))]
    pub fn install_all(&mut self) -> HookResult {
        self.initialize()?;

        let pending: Vec<usize> = self
            .hooks
            .iter()
            .filter(|(_, entry)| entry.state == HookState::Pending && entry.hook.task_count() > 0)
            .map(|(address, _)| *address)
            .collect();

        let start = Instant::now();
        for address in &pending {
            self.install_hook(*address)?;
        }

        tracing::info!(
            installed = pending.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Hooks installed"
        );
        Ok(())
    }

    fn install_hook(&mut self, address: usize) -> HookResult {
        let hook = self
            .hooks
            .get(&address)
            .map(|entry| Arc::clone(&entry.hook))
            .ok_or(HookError::NotFound(address))?;

        let stub_base = self.stub_for(address)?;
        let trampoline = self.backend.create_hook(address, stub_base)?;
        hook.set_trampoline(trampoline);
        hook.set_stub_address(stub_base);

        if let Err(e) = self.dispatch.register(stub_base, Arc::clone(&hook)) {
            self.discard_backend_hook(address);
            return Err(e);
        }
        self.set_state(address, HookState::Created);

        if let Err(e) = self.patch_jump(address, trampoline) {
            self.rollback(address, stub_base);
            return Err(e);
        }

        if let Err(e) = self.backend.enable_hook(address) {
            self.rollback(address, stub_base);
            return Err(e);
        }
        self.set_state(address, HookState::Enabled);

        tracing::info!(
            address = format_args!("{address:#x}"),
            stub = format_args!("{stub_base:#x}"),
            trampoline = format_args!("{trampoline:#x}"),
            tasks = hook.task_count(),
            "Hook enabled"
        );
        Ok(())
    }

    /// Cached stub for `address`, generating and writing it on first use
    fn stub_for(&mut self, address: usize) -> HookResult<usize> {
        if let Some(stub) = self.stubs.get(&address) {
            return Ok(stub.base());
        }

        let base = self.backend.allocate_executable(self.template.len())?;
        let stub = Stub::assemble(self.template, base, self.dispatcher)?;
        self.backend.write_code(base, stub.bytes())?;
        tracing::debug!(
            address = format_args!("{address:#x}"),
            stub = format_args!("{base:#x}"),
            size = stub.bytes().len(),
            "Stub generated"
        );
        self.stubs.insert(address, stub);
        Ok(base)
    }

    fn patch_jump(&mut self, address: usize, trampoline: usize) -> HookResult {
        let stub = self
            .stubs
            .get_mut(&address)
            .ok_or(HookError::NotFound(address))?;
        stub.set_jump_target(trampoline)?;
        self.backend.write_code(stub.base(), stub.bytes())
    }

    fn rollback(&mut self, address: usize, stub_base: usize) {
        self.dispatch.unregister(stub_base);
        self.discard_backend_hook(address);
        self.set_state(address, HookState::Pending);
    }

    fn discard_backend_hook(&mut self, address: usize) {
        if let Err(e) = self.backend.remove_hook(address) {
            tracing::warn!(address = format_args!("{address:#x}"), error = %e, "Failed to remove hook during rollback");
        }
        if let Some(entry) = self.hooks.get(&address) {
            entry.hook.set_trampoline(0);
        }
    }

    fn set_state(&mut self, address: usize, state: HookState) {
        if let Some(entry) = self.hooks.get_mut(&address) {
            entry.state = state;
        }
    }

    /// Disable every active hook without waiting or releasing anything
    ///
    /// Hooks keep their dispatch entries, stubs and trampolines, so threads
    /// already inside a task chain still return through them. Returns the
    /// first failure after every hook has been tried.
    pub fn disable_all(&mut self) -> HookResult {
        let mut first_error = None;
        let mut disabled = 0usize;
        for (address, entry) in &mut self.hooks {
            if entry.state != HookState::Enabled {
                continue;
            }
            match self.backend.disable_hook(*address) {
                Ok(()) => {
                    entry.state = HookState::Created;
                    disabled += 1;
                }
                Err(e) => {
                    tracing::error!(address = format_args!("{address:#x}"), error = %e, "Failed to disable hook");
                    first_error.get_or_insert(e);
                }
            }
        }
        tracing::info!(disabled, "Hooks disabled");
        first_error.map_or(Ok(()), Err)
    }

    /// Disable and release every hook, then the backend
    ///
    /// Each hook is disabled first, then its running task chains are given
    /// up to the quiesce timeout to finish before its dispatch entry is
    /// removed. A hook still running after the timeout keeps its dispatch
    /// entry, stub and trampoline for the lifetime of the process. Safe to
    /// call any number of times. Generated stubs are kept for the lifetime of
    /// the process. Returns the first failure after the teardown has run to
    /// completion.
    #[tracing::instrument(skip(self), fields(hooks = self.hooks.len()))]
    pub fn uninstall_all(&mut self) -> HookResult {
        if self.hooks.is_empty() && self.state == ManagerState::Uninitialized {
            return Ok(());
        }

        let mut first_error = None;

        for (address, entry) in &mut self.hooks {
            if entry.state == HookState::Enabled {
                match self.backend.disable_hook(*address) {
                    Ok(()) => entry.state = HookState::Created,
                    Err(e) => {
                        tracing::error!(address = format_args!("{address:#x}"), error = %e, "Failed to disable hook");
                        first_error.get_or_insert(e);
                        entry.state = HookState::Created;
                    }
                }
            }
        }

        for (address, entry) in &self.hooks {
            if entry.state == HookState::Pending {
                continue;
            }

            if !wait_for_quiescence(&entry.hook, self.quiesce_timeout) {
                tracing::warn!(
                    address = format_args!("{address:#x}"),
                    in_flight = entry.hook.in_flight(),
                    timeout_ms = self.quiesce_timeout.as_millis(),
                    "Task chains still running after timeout, leaking hook"
                );
                // Running chains still return through the stub and trampoline
                if let Err(e) = self.backend.leak_hook(*address) {
                    tracing::warn!(address = format_args!("{address:#x}"), error = %e, "Failed to leak hook");
                }
                self.stubs.remove(address);
                continue;
            }

            if let Some(stub) = entry.hook.stub_address() {
                self.dispatch.unregister(stub);
            }
            if let Err(e) = self.backend.remove_hook(*address) {
                tracing::warn!(address = format_args!("{address:#x}"), error = %e, "Failed to remove hook");
            }
        }

        if self.state == ManagerState::Initialized {
            if let Err(e) = self.backend.uninitialize() {
                tracing::error!(error = %e, "Failed to uninitialize hooking backend");
                first_error.get_or_insert(e);
            }
            self.state = ManagerState::Uninitialized;
        }

        let released = self.hooks.len();
        self.hooks.clear();
        tracing::info!(released, "Hooks uninstalled");

        first_error.map_or(Ok(()), Err)
    }

    /// Number of addresses with a hook
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Number of active hooks
    pub fn enabled_count(&self) -> usize {
        self.hooks
            .values()
            .filter(|entry| entry.state == HookState::Enabled)
            .count()
    }

    /// Hook at `address`
    pub fn hook(&self, address: usize) -> Option<&Arc<Hook>> {
        self.hooks.get(&address).map(|entry| &entry.hook)
    }

    /// Lifecycle state of `address`
    pub fn hook_state(&self, address: usize) -> Option<HookState> {
        self.hooks.get(&address).map(|entry| entry.state)
    }

    /// Hooked addresses in creation order
    pub fn addresses(&self) -> Vec<usize> {
        self.hooks.keys().copied().collect()
    }

    /// Backend lifecycle state
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// The hooking backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The dispatch table stubs are routed through
    pub fn dispatch_table(&self) -> &Arc<DispatchTable> {
        &self.dispatch
    }
}

impl<B: HookBackend> Drop for HookManager<B> {
    fn drop(&mut self) {
        if let Err(e) = self.uninstall_all() {
            tracing::error!(error = %e, "Errors while releasing hooks");
        }
    }
}

impl<B: HookBackend> std::fmt::Debug for HookManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager")
            .field("state", &self.state)
            .field("hooks", &self.hooks.len())
            .field("stubs", &self.stubs.len())
            .finish_non_exhaustive()
    }
}

/// Wait until no dispatch is running `hook`; false on timeout
fn wait_for_quiescence(hook: &Hook, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while hook.in_flight() > 0 {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::error::HookErrorKind;
    use crate::hook::tests::RecordingTask;
    use crate::stub::PatchSite;
    use hookline_core::TaskResult;
    use std::sync::Mutex;
    use std::thread;

    type Log = Arc<Mutex<Vec<String>>>;

    fn manager(backend: RecordingBackend) -> HookManager<RecordingBackend> {
        HookManager::with_dispatch_table(backend, Arc::new(DispatchTable::new()))
    }

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    struct SleepingTask {
        delay: Duration,
        log: Log,
    }

    impl Task for SleepingTask {
        fn execute(&self) -> TaskResult {
            thread::sleep(self.delay);
            self.log.lock().unwrap().push("slept".into());
            Ok(())
        }

        fn name(&self) -> &str {
            "sleeping"
        }

        fn description(&self) -> String {
            format!("sleeps {:?}", self.delay)
        }
    }

    #[test]
    fn test_tasks_accumulate_before_initialize() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new());
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
            .unwrap();
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("b", &log, false))
            .unwrap();

        assert_eq!(mgr.state(), ManagerState::Uninitialized);
        assert_eq!(mgr.hook_count(), 1);
        let hook = mgr.hook(0x40_1000).unwrap();
        assert_eq!(hook.task_names(), vec!["a", "b"]);

        hook.execute_tasks();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_null_address_is_rejected() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new());
        let err = mgr
            .add_task_to_hook(0, RecordingTask::boxed("a", &log, false))
            .unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::InvalidAddress);
    }

    #[test]
    fn test_install_wires_stub_dispatch_and_trampoline() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new());
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
            .unwrap();
        mgr.install_all().unwrap();

        assert_eq!(mgr.state(), ManagerState::Initialized);
        assert_eq!(mgr.hook_state(0x40_1000), Some(HookState::Enabled));

        let hook = Arc::clone(mgr.hook(0x40_1000).unwrap());
        let stub_base = hook.stub_address().unwrap();
        let recorded = mgr.backend().hook(0x40_1000).unwrap();
        assert!(recorded.enabled);
        assert_eq!(recorded.detour, stub_base);
        assert_eq!(hook.trampoline(), Some(recorded.trampoline));

        // Stub in executable memory has every site filled in
        let code = mgr.backend().code_at(stub_base).unwrap().to_vec();
        let template = StubTemplate::native();
        let mut expected = Stub::assemble(template, stub_base, dispatcher_address()).unwrap();
        expected.set_jump_target(recorded.trampoline).unwrap();
        assert_eq!(code, expected.bytes());
        assert_eq!(expected.read_site(PatchSite::SelfAddress), stub_base);

        // Dispatch entry was registered before enabling
        let calls = mgr.backend().calls();
        let create = calls
            .iter()
            .position(|c| matches!(c, BackendCall::Create { .. }))
            .unwrap();
        let enable = calls
            .iter()
            .position(|c| matches!(c, BackendCall::Enable(_)))
            .unwrap();
        assert!(create < enable);
        assert_eq!(
            mgr.dispatch_table().dispatch(stub_base),
            Some(recorded.trampoline)
        );
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_install_then_uninstall_leaves_nothing() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new());
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
            .unwrap();
        mgr.add_task_to_hook(0x40_2000, RecordingTask::boxed("b", &log, false))
            .unwrap();
        mgr.install_all().unwrap();
        assert_eq!(mgr.dispatch_table().len(), 2);
        assert_eq!(mgr.enabled_count(), 2);

        mgr.uninstall_all().unwrap();
        assert!(mgr.dispatch_table().is_empty());
        assert_eq!(mgr.hook_count(), 0);
        assert_eq!(mgr.backend().hook_count(), 0);
        assert!(!mgr.backend().is_initialized());

        // Idempotent
        mgr.uninstall_all().unwrap();
        assert_eq!(mgr.hook_count(), 0);
    }

    #[test]
    fn test_add_after_install_is_rejected() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new());
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
            .unwrap();
        mgr.install_all().unwrap();

        let err = mgr
            .add_task_to_hook(0x40_1000, RecordingTask::boxed("b", &log, false))
            .unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::AlreadyInstalled);
    }

    #[test]
    fn test_create_failure_aborts_install() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new().failing_create(0x40_2000));
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
            .unwrap();
        mgr.add_task_to_hook(0x40_2000, RecordingTask::boxed("b", &log, false))
            .unwrap();
        mgr.add_task_to_hook(0x40_3000, RecordingTask::boxed("c", &log, false))
            .unwrap();

        let err = mgr.install_all().unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::CreateFailed);
        assert_eq!(mgr.hook_state(0x40_1000), Some(HookState::Enabled));
        assert_eq!(mgr.hook_state(0x40_2000), Some(HookState::Pending));
        assert_eq!(mgr.hook_state(0x40_3000), Some(HookState::Pending));
        assert_eq!(mgr.dispatch_table().len(), 1);
    }

    #[test]
    fn test_enable_failure_rolls_back_dispatch_entry() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new().failing_enable(0x40_1000));
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
            .unwrap();

        let err = mgr.install_all().unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::EnableFailed);
        assert!(mgr.dispatch_table().is_empty());
        assert_eq!(mgr.backend().hook_count(), 0);
        assert_eq!(mgr.hook_state(0x40_1000), Some(HookState::Pending));
        assert_eq!(mgr.hook(0x40_1000).unwrap().trampoline(), None);
    }

    #[test]
    fn test_stub_is_reused_after_failed_install() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new().failing_enable(0x40_1000));
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
            .unwrap();

        mgr.install_all().unwrap_err();
        mgr.install_all().unwrap_err();

        let allocations = mgr
            .backend()
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Allocate { .. }))
            .count();
        assert_eq!(allocations, 1);
    }

    #[test]
    fn test_hooks_without_tasks_are_not_installed() {
        let mut mgr = manager(RecordingBackend::new());
        mgr.install_all().unwrap();
        assert_eq!(mgr.state(), ManagerState::Initialized);
        assert_eq!(mgr.backend().hook_count(), 0);
    }

    #[test]
    fn test_uninstall_waits_for_running_chain() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new());
        mgr.add_task_to_hook(
            0x40_1000,
            Box::new(SleepingTask {
                delay: Duration::from_millis(100),
                log: Arc::clone(&log),
            }),
        )
        .unwrap();
        mgr.install_all().unwrap();

        let hook = Arc::clone(mgr.hook(0x40_1000).unwrap());
        let stub = hook.stub_address().unwrap();
        let table = Arc::clone(mgr.dispatch_table());
        let worker = thread::spawn(move || table.dispatch(stub));

        while hook.in_flight() == 0 {
            thread::yield_now();
        }
        mgr.uninstall_all().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["slept"]);
        assert!(worker.join().unwrap().is_some());
    }

    #[test]
    fn test_uninstall_timeout_leaks_running_hook() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new()).with_quiesce_timeout(Duration::from_millis(5));
        mgr.add_task_to_hook(
            0x40_1000,
            Box::new(SleepingTask {
                delay: Duration::from_millis(300),
                log: Arc::clone(&log),
            }),
        )
        .unwrap();
        mgr.add_task_to_hook(0x40_2000, RecordingTask::boxed("idle", &log, false))
            .unwrap();
        mgr.install_all().unwrap();

        let hook = Arc::clone(mgr.hook(0x40_1000).unwrap());
        let trampoline = hook.trampoline().unwrap();
        let stub = hook.stub_address().unwrap();
        let idle_stub = mgr.hook(0x40_2000).unwrap().stub_address().unwrap();
        let table = Arc::clone(mgr.dispatch_table());
        let worker = thread::spawn(move || table.dispatch(stub));

        while hook.in_flight() == 0 {
            thread::yield_now();
        }
        mgr.uninstall_all().unwrap();

        // The busy hook is disabled and leaked, never removed
        let calls = mgr.backend().calls();
        assert!(calls.contains(&BackendCall::Disable(0x40_1000)));
        assert!(calls.contains(&BackendCall::Leak(0x40_1000)));
        assert!(!calls.contains(&BackendCall::Remove(0x40_1000)));
        assert!(calls.contains(&BackendCall::Remove(0x40_2000)));
        let leaked = mgr.backend().leaked(0x40_1000).unwrap();
        assert_eq!(leaked.trampoline, trampoline);
        assert!(!leaked.enabled);

        // Its dispatch entry survives; the idle one is gone
        assert!(mgr.dispatch_table().contains(stub));
        assert!(!mgr.dispatch_table().contains(idle_stub));
        assert_eq!(mgr.dispatch_table().dispatch(stub), Some(trampoline));

        assert_eq!(worker.join().unwrap(), Some(trampoline));
        assert_eq!(*log.lock().unwrap(), vec!["slept", "slept"]);
    }

    #[test]
    fn test_reinstall_after_leak_uses_fresh_stub() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new()).with_quiesce_timeout(Duration::from_millis(5));
        mgr.add_task_to_hook(
            0x40_1000,
            Box::new(SleepingTask {
                delay: Duration::from_millis(200),
                log: Arc::clone(&log),
            }),
        )
        .unwrap();
        mgr.install_all().unwrap();

        let hook = Arc::clone(mgr.hook(0x40_1000).unwrap());
        let old_stub = hook.stub_address().unwrap();
        let table = Arc::clone(mgr.dispatch_table());
        let worker = thread::spawn(move || table.dispatch(old_stub));
        while hook.in_flight() == 0 {
            thread::yield_now();
        }
        mgr.uninstall_all().unwrap();

        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("again", &log, false))
            .unwrap();
        mgr.install_all().unwrap();
        let new_stub = mgr.hook(0x40_1000).unwrap().stub_address().unwrap();
        assert_ne!(new_stub, old_stub);
        assert_eq!(mgr.dispatch_table().len(), 2);

        worker.join().unwrap();
    }

    #[test]
    fn test_disable_all_keeps_everything_registered() {
        let log = new_log();
        let mut mgr = manager(RecordingBackend::new());
        mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
            .unwrap();
        mgr.add_task_to_hook(0x40_2000, RecordingTask::boxed("b", &log, false))
            .unwrap();
        mgr.install_all().unwrap();

        mgr.disable_all().unwrap();
        assert_eq!(mgr.enabled_count(), 0);
        assert_eq!(mgr.hook_state(0x40_1000), Some(HookState::Created));
        assert_eq!(mgr.hook_count(), 2);
        assert_eq!(mgr.dispatch_table().len(), 2);
        assert_eq!(mgr.backend().hook_count(), 2);
        assert!(!mgr.backend().hook(0x40_2000).unwrap().enabled);
        assert!(mgr.backend().is_initialized());
        assert!(
            !mgr.backend()
                .calls()
                .iter()
                .any(|c| matches!(c, BackendCall::Remove(_) | BackendCall::Uninitialize))
        );

        // A later uninstall still releases them
        mgr.uninstall_all().unwrap();
        assert!(mgr.dispatch_table().is_empty());
        assert_eq!(mgr.backend().hook_count(), 0);
    }

    #[test]
    fn test_drop_uninstalls() {
        let log = new_log();
        let table = Arc::new(DispatchTable::new());
        {
            let mut mgr = HookManager::with_dispatch_table(RecordingBackend::new(), Arc::clone(&table));
            mgr.add_task_to_hook(0x40_1000, RecordingTask::boxed("a", &log, false))
                .unwrap();
            mgr.install_all().unwrap();
            assert_eq!(table.len(), 1);
        }
        assert!(table.is_empty());
    }
}
