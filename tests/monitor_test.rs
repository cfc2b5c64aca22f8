//! Tests for the polling driver: single cycles, state transitions, and the
//! full run loop against a recording process controller.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use trade_monitor::config::MonitorConfig;
use trade_monitor::monitor::{
    CycleOutcome, DriverState, Monitor, MonitorState, StopCause, StopReason,
};
use trade_monitor::process::{ProcessController, ProcessError, Termination};
use trade_monitor::watcher::{LogSource, LogWindow, ReadError};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Records every termination request instead of signalling anything.
#[derive(Default)]
struct RecordingController {
    calls: AtomicUsize,
    matchers: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingController {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessController for RecordingController {
    async fn terminate(&self, matcher: &str) -> Result<Termination, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.matchers
            .lock()
            .expect("matchers lock")
            .push(matcher.to_owned());
        if self.fail {
            return Err(ProcessError::Status {
                command: "pkill",
                status: "exit status: 3".to_owned(),
            });
        }
        Ok(Termination::Signalled)
    }
}

/// Log source whose every read panics, like a cycle hitting a bug.
struct PanickingSource;

impl LogSource for PanickingSource {
    fn read_from(&self, _offset: u64) -> Result<LogWindow, ReadError> {
        panic!("log source blew up");
    }
}

fn config_in(dir: &Path) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.paths.log_file = dir.join("backend.log");
    config.paths.report_file = dir.join("report.md");
    config.checks.interval_secs = 1;
    config
}

fn append(path: &Path, text: &str) {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log");
    f.write_all(text.as_bytes()).expect("append log");
}

// ---------------------------------------------------------------------------
// Single cycles
// ---------------------------------------------------------------------------

#[test]
fn cycles_report_idle_and_advance_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let monitor = Monitor::new(&config, Arc::new(RecordingController::default()))
        .expect("monitor");

    append(
        &config.paths.log_file,
        "[Distribution] BTCUSDT Starting analysis\n",
    );
    let (state, outcome) = monitor.run_cycle(MonitorState::default());
    let (scan, snapshot) = match outcome {
        CycleOutcome::Reported { scan, snapshot } => (scan, snapshot),
        other => panic!("expected a report, got {other:?}"),
    };
    assert_eq!(scan, 1);
    assert_eq!(state.iteration_count, 1);
    assert_eq!(state.cursor, 41);
    let dist = snapshot
        .strategy("cycle_rider")
        .and_then(|s| s.funnel("Distribution"))
        .expect("distribution funnel");
    assert_eq!(dist.analyzed, 1);

    let (idle_state, outcome) = monitor.run_cycle(state);
    assert_eq!(outcome, CycleOutcome::Idle);
    assert_eq!(idle_state, state);

    append(&config.paths.log_file, "Order filled ETHUSDT\n");
    let (state, outcome) = monitor.run_cycle(idle_state);
    assert!(matches!(outcome, CycleOutcome::Reported { scan: 2, .. }));
    assert_eq!(state.iteration_count, 2);

    let report = std::fs::read_to_string(&config.paths.report_file).expect("report");
    assert_eq!(report.matches("# Trading Strategy Monitor Report").count(), 1);
    assert!(report.contains("## Scan #1"));
    assert!(report.contains("## Scan #2"));
}

#[test]
fn fatal_window_produces_no_section() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let monitor = Monitor::new(&config, Arc::new(RecordingController::default()))
        .expect("monitor");

    append(
        &config.paths.log_file,
        "[Distribution] BTCUSDT Starting analysis\nError: connect ECONNREFUSED 127.0.0.1:6379\n",
    );
    let (state, outcome) = monitor.run_cycle(MonitorState::default());

    let CycleOutcome::FatalDetected(m) = &outcome else {
        panic!("expected fatal, got {outcome:?}");
    };
    assert_eq!(m.pattern, "ECONNREFUSED");
    assert_eq!(state.iteration_count, 0);
    assert!(state.cursor > 0);
    assert!(!config.paths.report_file.exists());
}

#[test]
fn missing_log_is_io_failure_and_keeps_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let monitor = Monitor::new(&config, Arc::new(RecordingController::default()))
        .expect("monitor");

    let start = MonitorState {
        cursor: 12,
        iteration_count: 3,
    };
    let (state, outcome) = monitor.run_cycle(start);
    assert!(matches!(outcome, CycleOutcome::IoFailure(_)));
    assert_eq!(state, start);
}

#[test]
fn report_failure_still_counts_the_iteration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.paths.report_file = dir.path().join("no-such-dir").join("report.md");
    let monitor = Monitor::new(&config, Arc::new(RecordingController::default()))
        .expect("monitor");

    append(&config.paths.log_file, "Order placed BTCUSDT\n");
    let (state, outcome) = monitor.run_cycle(MonitorState::default());
    assert!(matches!(outcome, CycleOutcome::IoFailure(_)));
    assert_eq!(state.iteration_count, 1);
    assert_eq!(state.cursor, 21);
}

#[test]
fn outcomes_map_to_driver_states() {
    assert_eq!(CycleOutcome::Idle.transition(), DriverState::Running);
    assert_eq!(
        CycleOutcome::IoFailure("disk full".to_owned()).transition(),
        DriverState::Running
    );
    assert_eq!(
        CycleOutcome::Failed("panicked".to_owned()).transition(),
        DriverState::StoppingOnError(StopCause::InternalFailure("panicked".to_owned()))
    );
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fatal_error_stops_server_exactly_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    append(
        &config.paths.log_file,
        "Error: connect ECONNREFUSED 127.0.0.1:5432\n",
    );

    let controller = Arc::new(RecordingController::default());
    let monitor = Monitor::new(&config, controller.clone()).expect("monitor");
    let reason = monitor.run(std::future::pending()).await;

    assert_eq!(
        reason,
        StopReason::Halted {
            cause: StopCause::FatalPattern("ECONNREFUSED".to_owned()),
            action: Termination::Signalled.describe().to_owned(),
        }
    );
    assert_eq!(controller.calls(), 1);
    assert_eq!(
        controller.matchers.lock().expect("lock").as_slice(),
        ["node.*dual-strategy"]
    );

    let report = std::fs::read_to_string(&config.paths.report_file).expect("report");
    assert!(report.contains("## Monitor stopped"));
    assert!(report.contains("`ECONNREFUSED`"));
    assert!(!report.contains("## Scan #"));
}

#[tokio::test]
async fn failed_termination_still_halts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    append(&config.paths.log_file, "UnhandledPromiseRejectionWarning: boom\n");

    let controller = Arc::new(RecordingController::failing());
    let monitor = Monitor::new(&config, controller.clone()).expect("monitor");
    let reason = monitor.run(std::future::pending()).await;

    let (cause, action) = match reason {
        StopReason::Halted { cause, action } => (cause, action),
        other => panic!("expected halt, got {other:?}"),
    };
    assert_eq!(
        cause,
        StopCause::FatalPattern("UnhandledPromiseRejectionWarning".to_owned())
    );
    assert!(action.starts_with("termination failed"));
    assert_eq!(controller.calls(), 1);
}

#[tokio::test]
async fn interrupt_leaves_server_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());

    let controller = Arc::new(RecordingController::default());
    let monitor = Monitor::new(&config, controller.clone()).expect("monitor");
    let reason = monitor.run(std::future::ready(())).await;

    assert_eq!(reason, StopReason::Interrupted);
    assert_eq!(controller.calls(), 0);
}

#[tokio::test]
async fn fatal_first_cycle_replaces_previous_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    std::fs::write(
        &config.paths.report_file,
        "# Trading Strategy Monitor Report\n\nStarted: 2020-01-01 00:00:00\n\n---\n\n\
         ## Scan #41 - 2020-01-01 00:15:00\n\nprevious run\n\n---\n\n",
    )
    .expect("seed report");
    append(&config.paths.log_file, "ECONNREFUSED\n");

    let controller = Arc::new(RecordingController::default());
    let monitor = Monitor::new(&config, controller.clone()).expect("monitor");
    let reason = monitor.run(std::future::pending()).await;
    assert!(matches!(reason, StopReason::Halted { .. }));

    let report = std::fs::read_to_string(&config.paths.report_file).expect("report");
    assert!(!report.contains("2020-01-01"));
    assert!(!report.contains("previous run"));
    assert_eq!(report.matches("# Trading Strategy Monitor Report").count(), 1);
    assert!(report.contains("## Monitor stopped"));
}

#[tokio::test(start_paused = true)]
async fn fatal_error_in_later_cycle_follows_earlier_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.checks.interval_secs = 60;
    append(
        &config.paths.log_file,
        "[Distribution] BTCUSDT Starting analysis\n",
    );

    let controller = Arc::new(RecordingController::default());
    let monitor = Monitor::new(&config, controller.clone()).expect("monitor");
    let handle = tokio::spawn(async move { monitor.run(std::future::pending()).await });

    // Yielding keeps the runtime busy, so the paused clock cannot reach the
    // end of the poll interval while we wait for the first section.
    let report_path = config.paths.report_file.clone();
    while !std::fs::read_to_string(&report_path)
        .map(|r| r.contains("## Scan #1"))
        .unwrap_or(false)
    {
        tokio::task::yield_now().await;
    }
    assert_eq!(controller.calls(), 0);

    append(
        &config.paths.log_file,
        "Error: connect ECONNREFUSED 127.0.0.1:5432\n",
    );
    let reason = handle.await.expect("monitor task");

    assert_eq!(
        reason,
        StopReason::Halted {
            cause: StopCause::FatalPattern("ECONNREFUSED".to_owned()),
            action: Termination::Signalled.describe().to_owned(),
        }
    );
    assert_eq!(controller.calls(), 1);

    let report = std::fs::read_to_string(&report_path).expect("report");
    let scan = report.find("## Scan #1").expect("first section");
    let stop = report.find("## Monitor stopped").expect("stop notice");
    assert!(scan < stop);
    assert!(!report.contains("## Scan #2"));
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_sleep_leaves_server_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.checks.interval_secs = 60;
    append(&config.paths.log_file, "Order placed BTCUSDT\n");

    let controller = Arc::new(RecordingController::default());
    let monitor = Monitor::new(&config, controller.clone()).expect("monitor");
    let reason = monitor
        .run(tokio::time::sleep(Duration::from_secs(30)))
        .await;

    assert_eq!(reason, StopReason::Interrupted);
    assert_eq!(controller.calls(), 0);

    let report = std::fs::read_to_string(&config.paths.report_file).expect("report");
    assert!(report.contains("## Scan #1"));
    assert!(!report.contains("## Monitor stopped"));
}

#[tokio::test]
async fn interrupt_waits_for_in_flight_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    append(&config.paths.log_file, "Order filled BTCUSDT\n");

    let controller = Arc::new(RecordingController::default());
    let monitor = Monitor::new(&config, controller.clone()).expect("monitor");
    let reason = monitor.run(std::future::ready(())).await;
    assert_eq!(reason, StopReason::Interrupted);

    // The section is on disk by the time `run` returns.
    let report = std::fs::read_to_string(&config.paths.report_file).expect("report");
    assert!(report.contains("## Scan #1"));
    assert_eq!(controller.calls(), 0);
}

#[tokio::test]
async fn panicking_cycle_stops_server() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());

    let controller = Arc::new(RecordingController::default());
    let monitor =
        Monitor::with_log_source(&config, controller.clone(), Box::new(PanickingSource))
            .expect("monitor");
    let reason = monitor.run(std::future::pending()).await;

    let cause = match reason {
        StopReason::Halted { cause, .. } => cause,
        other => panic!("expected halt, got {other:?}"),
    };
    assert!(matches!(cause, StopCause::InternalFailure(_)));
    assert_eq!(controller.calls(), 1);

    let report = std::fs::read_to_string(&config.paths.report_file).expect("report");
    assert!(report.contains("unexpected monitor failure"));
}
