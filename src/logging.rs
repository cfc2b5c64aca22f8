//! Structured logging for the monitor itself.
//!
//! The monitor's own status lines (cycle results, stop transitions) go
//! through `tracing`. Two setups:
//! - **File** ([`init_file`]): daily-rotated JSON under `[logging].dir` plus
//!   human-readable stderr.
//! - **Console** ([`init_cli`]): stderr only.
//!
//! [`init_from_config`] picks between them for the `start` subcommand.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// File name prefix for rotated log files.
pub const LOG_FILE_PREFIX: &str = "trade-monitor.log";

/// Keeps the non-blocking file writer alive.
///
/// Dropping it flushes pending entries and closes the file, so hold it for
/// the lifetime of the process.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install JSON file logging in `logs_dir` plus a stderr console layer.
///
/// Files are named `trade-monitor.log.YYYY-MM-DD`. Verbosity follows
/// `RUST_LOG`, default `info`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or a global
/// subscriber is already installed.
pub fn init_file(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install console-only logging on stderr.
///
/// Stdout stays free for report text printed by `scan`. A second call is a
/// no-op.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install file logging when `[logging].dir` is set, console logging otherwise.
///
/// # Errors
///
/// Returns an error if file logging was requested and could not be set up.
pub fn init_from_config(config: &LoggingConfig) -> anyhow::Result<Option<LoggingGuard>> {
    match &config.dir {
        Some(dir) => init_file(dir).map(Some),
        None => {
            init_cli();
            Ok(None)
        }
    }
}
