//! Shared key/value context
//!
//! Tasks on different hooks exchange data (typically a [`MemoryRegion`]) through
//! one store guarded by a single mutex. Values are stored behind `Arc` so a
//! reader keeps its entry alive even if another thread replaces or removes it.
//!
//! [`MemoryRegion`]: crate::region::MemoryRegion

use indexmap::IndexMap;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Entry = Arc<dyn Any + Send + Sync>;

/// Thread-safe heterogeneous key/value store
#[derive(Default)]
pub struct ModContext {
    entries: Mutex<IndexMap<String, Entry>>,
}

impl ModContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    // A panic inside a task must not make the context unusable for other hooks
    fn lock(&self) -> MutexGuard<'_, IndexMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key`, replacing any previous entry
    pub fn store<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let key = key.into();
        tracing::debug!(key = %key, "Storing context entry");
        self.lock().insert(key, Arc::new(value));
    }

    /// Fetch the entry under `key` if it exists and has type `T`
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entry = self.lock().get(key).cloned()?;
        match entry.downcast::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key = %key, "Context entry has a different type than requested");
                None
            }
        }
    }

    /// Whether an entry exists under `key`, whatever its type
    pub fn has(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Remove the entry under `key`; returns whether one existed
    pub fn remove(&self, key: &str) -> bool {
        self.lock().shift_remove(key).is_some()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the context holds no entry
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for ModContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModContext")
            .field("keys", &self.keys())
            .finish()
    }
}
