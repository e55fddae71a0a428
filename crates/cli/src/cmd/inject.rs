//! Inject command implementation
//!
//! Writes the launch file next to the agent module, waits for the target
//! process and loads the module into it through a remote `LoadLibraryW`.

use clap::Args;
use hookline_config::{LAUNCH_FILE_NAME, LaunchFile};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

use crate::command::Command;
use crate::error::{CommandError, Result};

/// Inject the agent into a running process
#[derive(Debug, Args)]
pub struct InjectCommand {
    /// Executable name of the target process (case-insensitive)
    #[arg(long, value_name = "NAME")]
    pub process: String,

    /// Agent module to inject
    #[arg(long, value_name = "PATH")]
    pub module: PathBuf,

    /// Directory holding tasks.toml, instead of the one next to the module
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Plugin directory, instead of the one next to the module
    #[arg(long, value_name = "DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// Seconds to wait for the process to appear
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub wait: u64,
}

impl InjectCommand {
    /// Launch parameters with every path made absolute
    ///
    /// The agent resolves paths from inside the target, whose working
    /// directory has nothing to do with ours.
    pub fn launch_file(&self) -> Result<LaunchFile> {
        let module = std::path::absolute(&self.module)?;
        if !module.is_file() {
            return Err(CommandError::ModuleNotFound(module));
        }

        Ok(LaunchFile {
            process: self.process.clone(),
            module,
            config_dir: self.config_dir.as_deref().map(std::path::absolute).transpose()?,
            plugin_dir: self.plugin_dir.as_deref().map(std::path::absolute).transpose()?,
        })
    }

    #[cfg(windows)]
    fn inject(&self, launch: &LaunchFile) -> Result<u32> {
        use std::time::Duration;

        let written = launch.write(module_dir(&launch.module))?;
        tracing::info!(path = %written.display(), "Launch file written");

        let pid = crate::target::wait_for_process(&self.process, Duration::from_secs(self.wait))?;
        crate::target::check_architecture(pid, &self.process)?;
        crate::target::inject_library(pid, &launch.module)?;
        Ok(pid)
    }

    #[cfg(not(windows))]
    #[allow(clippy::unused_self)]
    fn inject(&self, _launch: &LaunchFile) -> Result<u32> {
        Err(CommandError::Unsupported)
    }
}

impl Command for InjectCommand {
    type Output = u32;

    fn execute(&self) -> Result<u32> {
        let launch = self.launch_file()?;
        self.inject(&launch)
    }
}

fn module_dir(module: &Path) -> &Path {
    module.parent().unwrap_or_else(|| Path::new("."))
}

/// Report a successful injection
pub fn print_success(command: &InjectCommand, pid: u32) {
    println!(
        "{} injected into {} (pid {})",
        "OK".green().bold(),
        command.process.cyan(),
        pid
    );
    println!(
        "   launch file: {}",
        module_dir(&command.module).join(LAUNCH_FILE_NAME).display().dimmed()
    );
}
