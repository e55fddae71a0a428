//! The hookline agent
//!
//! Built as a dynamic library and loaded into the target process by the
//! `hookline` injector. On load it reads `hookline.toml` next to itself,
//! loads plugins, turns the declared tasks into hooks and installs them.

pub mod error;
pub mod runtime;

#[cfg(windows)]
mod entry;

pub use error::{AgentError, AgentResult};
pub use runtime::{Agent, InstallSummary, bootstrap, resolve_settings};
