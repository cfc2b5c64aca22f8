//! Trade Monitor CLI entry point.
//!
//! Provides `start` for the polling monitor and `scan` for a one-shot
//! analysis of the whole log that never touches the report or the server.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use trade_monitor::config::{load_monitor_config, MonitorConfig};
use trade_monitor::monitor::{Monitor, StopReason};
use trade_monitor::process::SystemProcessController;
use trade_monitor::watcher::Watcher;
use trade_monitor::{logging, report, stats};

/// Strategy statistics and fatal-error shutdown for the trading server.
#[derive(Parser)]
#[command(name = "trade-monitor", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Poll the server log until a fatal error or Ctrl-C.
    Start(ConfigArgs),
    /// Analyze the whole log once and print the result.
    Scan {
        /// Configuration source and overrides.
        #[command(flatten)]
        config: ConfigArgs,
        /// Print the snapshot as JSON instead of Markdown.
        #[arg(long)]
        json: bool,
    },
}

/// Configuration file plus command-line overrides.
#[derive(Args)]
struct ConfigArgs {
    /// Path to `monitor.toml`. Built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Server log to watch.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Report file to append to.
    #[arg(long)]
    report_file: Option<PathBuf>,
    /// Seconds between polling cycles.
    #[arg(long)]
    interval_secs: Option<u64>,
}

impl ConfigArgs {
    /// Load the file (if any), apply overrides, and validate.
    fn resolve(&self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => load_monitor_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => MonitorConfig::default(),
        };
        if let Some(path) = &self.log_file {
            config.paths.log_file = path.clone();
        }
        if let Some(path) = &self.report_file {
            config.paths.report_file = path.clone();
        }
        if let Some(secs) = self.interval_secs {
            config.checks.interval_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start(args) => handle_start(&args).await,
        Command::Scan { config, json } => handle_scan(&config, json),
    }
}

/// Run the polling monitor.
async fn handle_start(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = args.resolve()?;
    let _logging_guard = logging::init_from_config(&config.logging)?;

    let controller = Arc::new(SystemProcessController::new(
        config.process.listener_port,
    ));
    let monitor = Monitor::new(&config, controller)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C, interrupt disabled");
            std::future::pending::<()>().await;
        }
    };

    match monitor.run(shutdown).await {
        StopReason::Interrupted => {}
        StopReason::Halted { cause, action } => {
            info!(cause = %cause, action = %action, "monitor halted the server");
        }
    }

    info!(report = %config.paths.report_file.display(), "final report location");
    Ok(())
}

/// Analyze the whole log once.
fn handle_scan(args: &ConfigArgs, json: bool) -> anyhow::Result<()> {
    logging::init_cli();
    let config = args.resolve()?;

    let rules = config.rules()?;
    let fatal = config.fatal_detector()?;
    let window = Watcher::new(config.paths.log_file.clone())
        .read_from(0)
        .context("failed to read log")?;

    let verdict = fatal.scan(&window.text);
    let snapshot = stats::aggregate(&rules, &window.text, chrono::Local::now());

    if json {
        let out = serde_json::json!({
            "fatal": verdict.as_ref().map(|m| m.pattern.as_str()),
            "bytes": window.len_bytes(),
            "snapshot": snapshot,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("failed to serialize snapshot")?
        );
    } else {
        if let Some(m) = &verdict {
            println!("Fatal pattern present: `{}`\n", m.pattern);
        }
        print!("{}", report::render_section(&snapshot, 1));
    }

    Ok(())
}
