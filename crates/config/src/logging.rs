//! Logging configuration for hookline
//!
//! Compact console output plus an optional append-mode log file, which is
//! the only output visible when running inside another process.

use hookline_core::{ConfigError, ConfigResult};
use std::path::Path;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Default level for hookline targets when `RUST_LOG` is unset
/// * `log_file` - Optional path to append logs to; parent directories are created
///
/// Calling this again after a subscriber is installed is a no-op.
///
/// # Examples
/// ```ignore
/// init("info", None)?;
/// init("debug", Some(Path::new("logs/hookline.log")))?;
/// ```
pub fn init(level: &str, log_file: Option<&Path>) -> ConfigResult<()> {
    // Allows overriding with RUST_LOG env var
    let console_filter = env_filter(level)?;

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_ansi(true)
        .with_filter(console_filter);

    let file_layer = match log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .map_err(|source| ConfigError::Io {
                    path: log_path.to_path_buf(),
                    source,
                })?;

            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_filter(env_filter(level)?),
            )
        }
        None => None,
    };

    if tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Logging already initialized");
    }

    Ok(())
}

fn env_filter(level: &str) -> ConfigResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("hookline={level}")))
        .map_err(|e| ConfigError::InvalidFormat(format!("invalid log level '{level}': {e}")))
}
