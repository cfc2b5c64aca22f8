//! Configuration loading for the trade monitor.
//!
//! Loads `monitor.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so a minimal or empty config file is valid. The
//! configuration is fixed once the driver is built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::fatal::FatalDetector;
use crate::patterns::{
    builtin_fatal_patterns, builtin_strategies, ActivityPatterns, RuleSet, SeverityPatterns,
    StrategyDefinition,
};

/// Top-level monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Input log and output report locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Polling cadence.
    #[serde(default)]
    pub checks: ChecksConfig,

    /// Which server process to stop on a fatal condition.
    #[serde(default)]
    pub process: ProcessConfig,

    /// Fatal signatures in priority order.
    #[serde(default)]
    pub fatal: FatalConfig,

    /// Order and position activity patterns.
    #[serde(default)]
    pub activity: ActivityPatterns,

    /// Error and warning markers.
    #[serde(default)]
    pub severity: SeverityPatterns,

    /// Strategy extractor definitions in report order.
    #[serde(default = "builtin_strategies")]
    pub strategies: Vec<StrategyDefinition>,

    /// Log file output for the monitor itself.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            checks: ChecksConfig::default(),
            process: ProcessConfig::default(),
            fatal: FatalConfig::default(),
            activity: ActivityPatterns::default(),
            severity: SeverityPatterns::default(),
            strategies: builtin_strategies(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Input and output file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Append-only log written by the trading server.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Markdown report written by the monitor.
    #[serde(default = "default_report_file")]
    pub report_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            report_file: default_report_file(),
        }
    }
}

/// Polling cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct ChecksConfig {
    /// Seconds slept between cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Server process identification.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// `pkill -f` pattern matching the server's command line.
    #[serde(default = "default_server_pattern")]
    pub server_pattern: String,

    /// Port the server listens on, queried after termination.
    #[serde(default = "default_listener_port")]
    pub listener_port: Option<u16>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            server_pattern: default_server_pattern(),
            listener_port: default_listener_port(),
        }
    }
}

/// Fatal signatures.
#[derive(Debug, Clone, Deserialize)]
pub struct FatalConfig {
    /// Case-insensitive regexes; the first listed match wins.
    #[serde(default = "builtin_fatal_patterns")]
    pub patterns: Vec<String>,
}

impl Default for FatalConfig {
    fn default() -> Self {
        Self {
            patterns: builtin_fatal_patterns(),
        }
    }
}

/// File logging for the monitor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rotated JSON logs. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl MonitorConfig {
    /// Validate values and compile every pattern.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid value or pattern.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.checks.interval_secs >= 1, "interval_secs must be >= 1");
        anyhow::ensure!(
            !self.process.server_pattern.trim().is_empty(),
            "process.server_pattern must not be empty"
        );
        anyhow::ensure!(
            self.paths.log_file != self.paths.report_file,
            "paths.log_file and paths.report_file must differ"
        );
        self.rules().context("invalid extractor pattern")?;
        self.fatal_detector().context("invalid fatal pattern")?;
        Ok(())
    }

    /// Compile the extractor tables.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern fails to compile.
    pub fn rules(&self) -> anyhow::Result<RuleSet> {
        Ok(RuleSet::compile(
            &self.strategies,
            &self.activity,
            &self.severity,
        )?)
    }

    /// Compile the fatal signatures.
    ///
    /// # Errors
    ///
    /// Returns an error if any signature fails to compile.
    pub fn fatal_detector(&self) -> anyhow::Result<FatalDetector> {
        Ok(FatalDetector::new(&self.fatal.patterns)?)
    }

    /// Sleep between cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.checks.interval_secs)
    }
}

/// Load monitor configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_monitor_config(path: &Path) -> anyhow::Result<MonitorConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read monitor config at {}", path.display()))?;
    let config: MonitorConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse monitor config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

// Default value functions for serde.

fn default_log_file() -> PathBuf {
    PathBuf::from("/tmp/backend.log")
}

fn default_report_file() -> PathBuf {
    PathBuf::from("TRADE_MONITOR_REPORT.md")
}

fn default_interval_secs() -> u64 {
    900
}

fn default_server_pattern() -> String {
    "node.*dual-strategy".to_owned()
}

fn default_listener_port() -> Option<u16> {
    Some(3031)
}
