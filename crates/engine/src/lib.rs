//! # Hookline Engine
//!
//! Hook dispatch and task orchestration for hookline.
//!
//! - **Stubs**: relocatable thunks with named patch sites ([`stub`])
//! - **Dispatch**: the process-wide stub address to hook table ([`dispatch`])
//! - **Backends**: trampoline creation behind [`HookBackend`], with a recording
//!   implementation for tests
//! - **Hooks**: per-address task chains and their install lifecycle ([`HookManager`])
//! - **Factories**: task creation by configuration type and the orchestration
//!   from task metadata to installed hooks ([`HookFactory`])
//! - **Plugins**: the plugin interface and its manager ([`plugin`])

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod hook;
pub mod manager;
pub mod plugin;
pub mod stub;
pub mod task_factory;

// Re-export error types
pub use error::{
    FactoryError, FactoryErrorKind, FactoryResult, HookError, HookErrorKind, HookResult,
    PluginError, PluginErrorKind, PluginResult,
};

// Re-export commonly used types
#[cfg(windows)]
pub use backend::DetourBackend;
pub use backend::{HookBackend, RecordingBackend};
pub use dispatch::DispatchTable;
pub use factory::{FactoryReport, HookFactory};
pub use hook::Hook;
pub use manager::{HookManager, HookState, ManagerState};
pub use plugin::{HostRegistry, Plugin, PluginHost, PluginInfo, PluginManager};
pub use stub::{Arch, Stub, StubTemplate};
pub use task_factory::{TaskCreator, TaskFactory};
