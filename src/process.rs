//! Stopping the monitored trading server.
//!
//! The driver only sees the [`ProcessController`] trait. The system
//! implementation shells out to `pkill -f` and, for the record, asks `lsof`
//! which process holds the server's listener port.

use async_trait::async_trait;
use tracing::{info, warn};

/// Errors produced while terminating the server.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The helper command could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// Command name.
        command: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The helper command exited with an unexpected status.
    #[error("{command} exited with status {status}")]
    Status {
        /// Command name.
        command: &'static str,
        /// Exit status description.
        status: String,
    },
    /// The blocking task running the command panicked.
    #[error("termination task panicked: {0}")]
    Join(String),
}

/// Result of a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// At least one matching process was signalled.
    Signalled,
    /// No process matched the pattern.
    NoMatch,
}

impl Termination {
    /// Human-readable description for status lines and the report.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Signalled => "server process signalled to stop",
            Self::NoMatch => "no matching server process found",
        }
    }
}

/// Capability to stop the monitored server.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Terminate every process whose command line matches `matcher`.
    async fn terminate(&self, matcher: &str) -> Result<Termination, ProcessError>;
}

/// Controller backed by `pkill` and `lsof`.
#[derive(Debug, Clone, Default)]
pub struct SystemProcessController {
    listener_port: Option<u16>,
}

impl SystemProcessController {
    /// Create a controller. When `listener_port` is set, the holder of that
    /// port is looked up and logged after termination.
    pub fn new(listener_port: Option<u16>) -> Self {
        Self { listener_port }
    }
}

#[async_trait]
impl ProcessController for SystemProcessController {
    async fn terminate(&self, matcher: &str) -> Result<Termination, ProcessError> {
        info!(pattern = %matcher, "sending SIGTERM to server processes");
        let pattern = matcher.to_owned();
        let status = tokio::task::spawn_blocking(move || {
            std::process::Command::new("pkill")
                .args(["-f", &pattern])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
        })
        .await
        .map_err(|e| ProcessError::Join(e.to_string()))?
        .map_err(|source| ProcessError::Spawn {
            command: "pkill",
            source,
        })?;

        // pkill: 0 = signalled, 1 = nothing matched, anything else = failure.
        let termination = match status.code() {
            Some(0) => Termination::Signalled,
            Some(1) => Termination::NoMatch,
            _ => {
                return Err(ProcessError::Status {
                    command: "pkill",
                    status: status.to_string(),
                })
            }
        };

        if let Some(port) = self.listener_port {
            match listener_pids(port).await {
                Ok(pids) if pids.is_empty() => info!(port, "listener port is free"),
                Ok(pids) => info!(port, pids = ?pids, "listener port still held"),
                Err(e) => warn!(port, error = %e, "failed to query listener port"),
            }
        }

        Ok(termination)
    }
}

/// PIDs listening on `port`, as reported by `lsof -ti:<port>`.
async fn listener_pids(port: u16) -> Result<Vec<u32>, ProcessError> {
    let output = tokio::task::spawn_blocking(move || {
        std::process::Command::new("lsof")
            .arg(format!("-ti:{port}"))
            .output()
    })
    .await
    .map_err(|e| ProcessError::Join(e.to_string()))?
    .map_err(|source| ProcessError::Spawn {
        command: "lsof",
        source,
    })?;

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect())
}
