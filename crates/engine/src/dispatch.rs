//! Stub address to hook routing
//!
//! Generated stubs call [`dispatcher_entry`] with their own base address. The
//! entry point can only reach process-wide state, so the table it consults is
//! a single static; [`HookManager`](crate::manager::HookManager) receives an
//! `Arc` to it rather than touching the static itself, which lets tests use
//! private tables.

use crate::error::{HookError, HookResult};
use crate::hook::Hook;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

static GLOBAL_TABLE: LazyLock<Arc<DispatchTable>> = LazyLock::new(|| Arc::new(DispatchTable::new()));

/// Map from stub address to hook
#[derive(Debug, Default)]
pub struct DispatchTable {
    entries: RwLock<HashMap<usize, Arc<Hook>>>,
}

impl DispatchTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The table consulted by [`dispatcher_entry`]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_TABLE)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<usize, Arc<Hook>>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<usize, Arc<Hook>>> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Route `stub` to `hook`
    pub fn register(&self, stub: usize, hook: Arc<Hook>) -> HookResult {
        let mut entries = self.write();
        if entries.contains_key(&stub) {
            return Err(HookError::AlreadyExists(stub));
        }
        tracing::debug!(
            stub = format_args!("{stub:#x}"),
            target = format_args!("{:#x}", hook.address()),
            "Dispatch entry registered"
        );
        entries.insert(stub, hook);
        Ok(())
    }

    /// Remove the entry for `stub`, returning its hook
    pub fn unregister(&self, stub: usize) -> Option<Arc<Hook>> {
        let removed = self.write().remove(&stub);
        if removed.is_some() {
            tracing::debug!(stub = format_args!("{stub:#x}"), "Dispatch entry removed");
        }
        removed
    }

    /// Whether `stub` has an entry
    pub fn contains(&self, stub: usize) -> bool {
        self.read().contains_key(&stub)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Run the task chain for `stub` and return where execution continues
    ///
    /// The lock is released before any task runs, so tasks may trigger other
    /// hooks. The hook stays alive for the whole chain even if its entry is
    /// removed concurrently.
    pub fn dispatch(&self, stub: usize) -> Option<usize> {
        let hook = self.read().get(&stub).cloned()?;
        Some(hook.dispatch())
    }
}

/// Entry point called by every generated stub
///
/// A miss means control would continue at an invalid address, so the process
/// is aborted instead.
pub extern "C" fn dispatcher_entry(stub: usize) -> usize {
    match GLOBAL_TABLE.dispatch(stub) {
        Some(trampoline) if trampoline != 0 => trampoline,
        Some(_) => {
            tracing::error!(stub = format_args!("{stub:#x}"), "Hook fired without a trampoline");
            std::process::abort();
        }
        None => {
            tracing::error!(stub = format_args!("{stub:#x}"), "No dispatch entry for stub");
            std::process::abort();
        }
    }
}

/// Address of [`dispatcher_entry`] for patching into stubs
pub fn dispatcher_address() -> usize {
    dispatcher_entry as extern "C" fn(usize) -> usize as usize
}
