//! The polling driver.
//!
//! Each cycle reads the newly appended log text, checks it for fatal
//! signatures, and otherwise aggregates and appends a report section. The
//! driver is an explicit state machine:
//!
//! - `Running`: run one cycle, then sleep for the poll interval.
//! - `StoppingOnError`: a fatal signature or an internal failure was seen;
//!   stop the server and record the stop in the report.
//! - `Stopped`: terminal.
//!
//! An interrupt moves `Running` straight to `Stopped` without touching the
//! server.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::fatal::{FatalDetector, FatalMatch};
use crate::patterns::RuleSet;
use crate::process::ProcessController;
use crate::report::ReportWriter;
use crate::stats::{self, MonitorSnapshot};
use crate::watcher::{LogSource, Watcher};

/// Process-wide monitor state, threaded through every cycle.
///
/// In memory only: a restarted monitor starts again at offset 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorState {
    /// Byte offset of the next unread log byte.
    pub cursor: u64,
    /// Number of report sections produced so far.
    pub iteration_count: u64,
}

impl MonitorState {
    /// Whether no section has been written yet in this run.
    pub fn is_first_write(&self) -> bool {
        self.iteration_count == 0
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing new in the log.
    Idle,
    /// The window was aggregated and a section appended.
    Reported {
        /// 1-based scan number used in the section heading.
        scan: u64,
        /// The aggregated statistics.
        snapshot: MonitorSnapshot,
    },
    /// A fatal signature was found. No statistics were produced.
    FatalDetected(FatalMatch),
    /// Reading the log or writing the report failed; the loop carries on.
    IoFailure(String),
    /// The cycle itself failed unexpectedly.
    Failed(String),
}

impl CycleOutcome {
    /// Driver state that follows this outcome.
    pub fn transition(&self) -> DriverState {
        match self {
            Self::Idle | Self::Reported { .. } | Self::IoFailure(_) => DriverState::Running,
            Self::FatalDetected(m) => {
                DriverState::StoppingOnError(StopCause::FatalPattern(m.pattern.clone()))
            }
            Self::Failed(reason) => {
                DriverState::StoppingOnError(StopCause::InternalFailure(reason.clone()))
            }
        }
    }
}

/// Why the server is being stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    /// A fatal signature matched the log.
    FatalPattern(String),
    /// The monitor itself failed.
    InternalFailure(String),
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalPattern(pattern) => write!(f, "critical error detected: `{pattern}`"),
            Self::InternalFailure(reason) => write!(f, "unexpected monitor failure: {reason}"),
        }
    }
}

/// How the driver finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The user interrupted the monitor. The server was left alone.
    Interrupted,
    /// The server was stopped because of `cause`.
    Halted {
        /// What triggered the stop.
        cause: StopCause,
        /// What the process controller reported.
        action: String,
    },
}

/// Driver states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// Polling.
    Running,
    /// About to stop the server.
    StoppingOnError(StopCause),
    /// Finished.
    Stopped(StopReason),
}

/// One cycle's collaborators. Runs on a blocking thread.
struct Cycle {
    source: Box<dyn LogSource>,
    rules: RuleSet,
    fatal: FatalDetector,
    report: ReportWriter,
}

impl Cycle {
    fn run(&self, mut state: MonitorState) -> (MonitorState, CycleOutcome) {
        let window = match self.source.read_from(state.cursor) {
            Ok(w) => w,
            Err(e) => return (state, CycleOutcome::IoFailure(e.to_string())),
        };
        state.cursor = window.end;

        if window.is_empty() {
            return (state, CycleOutcome::Idle);
        }

        // Fatal check comes first so the report never shows stats for the
        // window that killed the server.
        if let Some(m) = self.fatal.scan(&window.text) {
            return (state, CycleOutcome::FatalDetected(m));
        }

        let snapshot = stats::aggregate(&self.rules, &window.text, Local::now());
        let scan = state.iteration_count.saturating_add(1);
        let written = self
            .report
            .append_section(&snapshot, scan, state.is_first_write());
        state.iteration_count = scan;

        match written {
            Ok(()) => (state, CycleOutcome::Reported { scan, snapshot }),
            Err(e) => (state, CycleOutcome::IoFailure(e.to_string())),
        }
    }
}

/// The long-running monitor.
pub struct Monitor {
    cycle: Arc<Cycle>,
    log_path: PathBuf,
    controller: Arc<dyn ProcessController>,
    server_pattern: String,
    poll_interval: Duration,
}

impl Monitor {
    /// Build a monitor from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured pattern fails to compile.
    pub fn new(
        config: &MonitorConfig,
        controller: Arc<dyn ProcessController>,
    ) -> anyhow::Result<Self> {
        let watcher = Watcher::new(config.paths.log_file.clone());
        Self::with_log_source(config, controller, Box::new(watcher))
    }

    /// Build a monitor that reads its windows from `source` instead of the
    /// configured log file. The configured path is still used in status lines.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured pattern fails to compile.
    pub fn with_log_source(
        config: &MonitorConfig,
        controller: Arc<dyn ProcessController>,
        source: Box<dyn LogSource>,
    ) -> anyhow::Result<Self> {
        let cycle = Cycle {
            source,
            rules: config.rules()?,
            fatal: config.fatal_detector()?,
            report: ReportWriter::new(config.paths.report_file.clone()),
        };
        Ok(Self {
            cycle: Arc::new(cycle),
            log_path: config.paths.log_file.clone(),
            controller,
            server_pattern: config.process.server_pattern.clone(),
            poll_interval: config.poll_interval(),
        })
    }

    /// Report file location.
    pub fn report_path(&self) -> &Path {
        self.cycle.report.path()
    }

    /// Run one cycle synchronously on the current thread.
    pub fn run_cycle(&self, state: MonitorState) -> (MonitorState, CycleOutcome) {
        self.cycle.run(state)
    }

    /// Poll until a fatal condition stops the server or `shutdown` resolves.
    ///
    /// A shutdown that arrives mid-cycle waits for that cycle to finish, so
    /// nothing is written to the report after this returns.
    pub async fn run<F>(&self, shutdown: F) -> StopReason
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            log = %self.log_path.display(),
            report = %self.report_path().display(),
            interval_secs = self.poll_interval.as_secs(),
            fatal_patterns = self.cycle.fatal.len(),
            "trade monitor started"
        );

        let mut state = MonitorState::default();
        let mut driver = DriverState::Running;

        loop {
            driver = match driver {
                DriverState::Running => self.step(&mut state, shutdown.as_mut()).await,
                DriverState::StoppingOnError(cause) => {
                    DriverState::Stopped(self.stop_server(cause, &state).await)
                }
                DriverState::Stopped(reason) => {
                    if reason == StopReason::Interrupted {
                        info!("monitor stopped by user");
                    }
                    info!(report = %self.report_path().display(), "report saved");
                    return reason;
                }
            };
        }
    }

    /// One pass of the `Running` state: cycle, then sleep unless stopping.
    async fn step<F>(&self, state: &mut MonitorState, mut shutdown: Pin<&mut F>) -> DriverState
    where
        F: Future<Output = ()>,
    {
        let cycle = self.spawn_cycle(*state);
        tokio::pin!(cycle);

        let finished = tokio::select! {
            () = &mut shutdown => None,
            step = &mut cycle => Some(step),
        };
        let Some((next, outcome)) = finished else {
            let (next, outcome) = cycle.await;
            *state = next;
            debug!(outcome = ?outcome, "in-flight cycle finished after interrupt");
            return DriverState::Stopped(StopReason::Interrupted);
        };
        *state = next;
        log_outcome(&outcome, state);

        match outcome.transition() {
            DriverState::Running => tokio::select! {
                () = &mut shutdown => DriverState::Stopped(StopReason::Interrupted),
                () = tokio::time::sleep(self.poll_interval) => DriverState::Running,
            },
            other => other,
        }
    }

    /// Run a cycle on the blocking pool. A panic becomes [`CycleOutcome::Failed`].
    async fn spawn_cycle(&self, state: MonitorState) -> (MonitorState, CycleOutcome) {
        let cycle = Arc::clone(&self.cycle);
        match tokio::task::spawn_blocking(move || cycle.run(state)).await {
            Ok(step) => step,
            Err(e) => (state, CycleOutcome::Failed(format!("cycle task failed: {e}"))),
        }
    }

    async fn stop_server(&self, cause: StopCause, state: &MonitorState) -> StopReason {
        error!(cause = %cause, "stopping server due to error");

        let action = match self.controller.terminate(&self.server_pattern).await {
            Ok(termination) => {
                info!(result = termination.describe(), "server stop complete");
                termination.describe().to_owned()
            }
            Err(e) => {
                error!(error = %e, "failed to stop server");
                format!("termination failed: {e}")
            }
        };

        if let Err(e) = self
            .cycle
            .report
            .append_stop_notice(&cause.to_string(), &action, state.is_first_write())
        {
            warn!(error = %e, "failed to record stop in report");
        }

        StopReason::Halted { cause, action }
    }
}

fn log_outcome(outcome: &CycleOutcome, state: &MonitorState) {
    match outcome {
        CycleOutcome::Idle => debug!(cursor = state.cursor, "no new log output"),
        CycleOutcome::Reported { scan, snapshot } => info!(
            scan,
            cursor = state.cursor,
            errors = snapshot.errors.error_count,
            warnings = snapshot.errors.warning_count,
            "report updated"
        ),
        CycleOutcome::FatalDetected(m) => error!(
            pattern = %m.pattern,
            matched = %m.matched,
            "critical error detected"
        ),
        CycleOutcome::IoFailure(reason) => warn!(error = %reason, "cycle degraded by I/O failure"),
        CycleOutcome::Failed(reason) => error!(error = %reason, "unexpected cycle failure"),
    }
}
