//! Built-in memory tasks for hookline
//!
//! Three task kinds, each with its configuration type and loader:
//!
//! - [`copy`]: copy a block of process memory into a larger buffer (tag `memory`)
//! - [`patch`]: point instructions at a relocated buffer (tag `patch`)
//! - [`load`]: load an external binary after a relocated buffer (tag `load`)
//!
//! Buffers are shared between tasks through the host's context store.
//! [`MemoryPlugin`] registers everything through the plugin interface.

pub mod access;
pub mod copy;
mod document;
pub mod load;
pub mod patch;
pub mod plugin;

pub use access::{NativeMemory, ProcessMemory};
pub use copy::{CopyMemoryConfig, CopyMemoryTask, MemoryConfigLoader};
pub use load::{LoadInMemoryConfig, LoadInMemoryConfigLoader, LoadInMemoryTask};
pub use patch::{InstructionPatch, PatchConfig, PatchConfigLoader, PatchMemoryTask};
pub use plugin::MemoryPlugin;
