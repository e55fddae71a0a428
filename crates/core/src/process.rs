//! Identity of the process hookline runs inside
//!
//! Cached on first access; plugins read it through the host interface.

use std::sync::LazyLock;

/// Current process information (cached)
pub static CURRENT_PROCESS: LazyLock<ProcessInfo> = LazyLock::new(ProcessInfo::detect);

/// Process information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id
    pub id: u32,
    /// Executable file name, `"unknown"` when it cannot be determined
    pub name: String,
    /// CPU architecture: "x86", "x86_64", etc.
    pub arch: &'static str,
}

impl ProcessInfo {
    /// Query the running process
    pub fn detect() -> Self {
        let name = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            id: std::process::id(),
            name,
            arch: std::env::consts::ARCH,
        }
    }
}
