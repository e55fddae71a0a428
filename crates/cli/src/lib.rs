//! hookline CLI library
//!
//! The injector side of hookline: it places the agent module into a running
//! process and validates task configuration offline.

pub mod cmd;
pub mod command;
pub mod error;
#[cfg(windows)]
mod target;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use command::Command;

/// hookline - declarative hooks for legacy Windows processes
#[derive(Parser)]
#[command(name = "hookline")]
#[command(about = "Inject the hookline agent and check task configuration")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (shows DEBUG level logs)
    #[arg(short, long)]
    pub verbose: bool,

    /// Write logs to a file
    #[arg(long, env = "HOOKLINE_LOG_FILE", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the hookline CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Inject the agent module into a running process
    Inject(cmd::inject::InjectCommand),

    /// Validate tasks.toml and show the resolved hooks without touching any process
    Check(cmd::check::CheckCommand),
}

/// Main entry point for the CLI logic
pub fn run(cli: Cli) -> Result<()> {
    let level = if cli.verbose { "debug" } else { "warn" };
    hookline_config::logging::init(level, cli.log_file.as_deref())
        .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Inject(inject_cmd) => {
            let pid = inject_cmd
                .execute()
                .with_context(|| format!("Failed to inject into {}", inject_cmd.process))?;
            cmd::inject::print_success(&inject_cmd, pid);
        }
        Commands::Check(check_cmd) => {
            let report = check_cmd.execute().with_context(|| {
                format!("Configuration in {} is invalid", check_cmd.config_dir.display())
            })?;
            report.print();
        }
    }
    Ok(())
}
