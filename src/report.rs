//! Markdown report rendering and the append-only report file.
//!
//! Rendering is pure: [`render_header`], [`render_section`], and
//! [`render_stop_notice`] turn values into text. [`ReportWriter`] owns the
//! file lifecycle and opens the file once per write.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::stats::{FilterOutcome, MonitorSnapshot, StrategySnapshot, TallyOutcome};

/// Report title written in the header block.
pub const REPORT_TITLE: &str = "Trading Strategy Monitor Report";

/// Delimiter closing the header and every section.
pub const SECTION_DELIMITER: &str = "---\n\n";

/// Error samples shown per section.
pub const MAX_RENDERED_ERRORS: usize = 5;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors produced while writing the report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Creating the report or writing its header failed.
    #[error("failed to create report {path}: {source}")]
    Create {
        /// Report path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Appending to the report failed.
    #[error("failed to append to report {path}: {source}")]
    Append {
        /// Report path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Format a timestamp the way the report shows it.
pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Render the header block written once at the top of a fresh report.
pub fn render_header(started: &DateTime<Local>) -> String {
    format!(
        "# {REPORT_TITLE}\n\nStarted: {}\n\n{SECTION_DELIMITER}",
        format_timestamp(started)
    )
}

/// Render one scan as a self-contained section.
///
/// Zero counts are rendered, not omitted. The errors block only appears when
/// at least one error or warning was seen.
pub fn render_section(snapshot: &MonitorSnapshot, scan_number: u64) -> String {
    let mut out = format!(
        "## Scan #{scan_number} - {}\n\n",
        format_timestamp(&snapshot.timestamp)
    );

    for strategy in &snapshot.strategies {
        render_strategy(&mut out, strategy);
    }

    let a = &snapshot.activity;
    out.push_str("### \u{1f4ca} Trading Activity\n\n");
    out.push_str(&format!("- Orders Placed: {}\n", a.placed));
    out.push_str(&format!("- Orders Filled: {}\n", a.filled));
    out.push_str(&format!("- Orders Cancelled: {}\n", a.cancelled));
    out.push_str(&format!("- Positions Opened: {}\n", a.opened));
    out.push_str(&format!("- Positions Closed: {}\n\n", a.closed));

    let errs = &snapshot.errors;
    if !errs.is_empty() {
        out.push_str("### \u{26a0}\u{fe0f} Errors & Warnings\n\n");
        out.push_str(&format!("- Errors: {}\n", errs.error_count));
        out.push_str(&format!("- Warnings: {}\n", errs.warning_count));
        if !errs.errors.is_empty() {
            out.push_str("\nRecent errors:\n");
            for err in errs.errors.iter().take(MAX_RENDERED_ERRORS) {
                out.push_str(&format!("```\n{err}\n```\n"));
            }
        }
        out.push('\n');
    }

    out.push_str(SECTION_DELIMITER);
    out
}

fn render_strategy(out: &mut String, strategy: &StrategySnapshot) {
    out.push_str(&format!("### {}\n\n", strategy.title));
    for tally in &strategy.tallies {
        render_tally(out, tally);
    }
    for funnel in &strategy.funnels {
        render_funnel(out, funnel);
    }
    out.push_str(&format!(
        "- **Signals Generated**: {}\n\n",
        strategy.signals_generated
    ));
}

fn render_tally(out: &mut String, tally: &TallyOutcome) {
    out.push_str(&format!("- **{}**: {}\n", tally.label, tally.count));
    if let Some((title, item)) = &tally.breakdown_title {
        if !tally.breakdown.is_empty() {
            out.push_str(&format!("  - {title}:\n"));
            for (key, count) in &tally.breakdown {
                out.push_str(&format!("    - {item} {key}: {count}\n"));
            }
        }
    }
}

fn render_funnel(out: &mut String, funnel: &FilterOutcome) {
    out.push_str(&format!(
        "- **{}**: {}/{} {}\n",
        funnel.name, funnel.detected, funnel.analyzed, funnel.verb
    ));
    for counter in &funnel.counters {
        out.push_str(&format!("  - {}: {}\n", counter.label, counter.count));
    }
    if !funnel.failed_filters.is_empty() {
        out.push_str("  - Failed filters:\n");
        for failure in &funnel.failed_filters {
            out.push_str(&format!("    - {}: {}\n", failure.label, failure.count));
        }
    }
}

/// Render the closing section appended when the monitor stops the server.
pub fn render_stop_notice(at: &DateTime<Local>, cause: &str, action: &str) -> String {
    format!(
        "## Monitor stopped - {}\n\n- Cause: {cause}\n- Action: {action}\n\n{SECTION_DELIMITER}",
        format_timestamp(at)
    )
}

/// Append-only writer for the report file.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    /// Create a writer for the report at `path`. Nothing is touched until the
    /// first write.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Report location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a scan section.
    ///
    /// When `first_write` is set, or the file no longer exists, the report is
    /// (re)created with a fresh header first. `first_write` replaces any
    /// report left by a previous run.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if the file cannot be created or appended to.
    pub fn append_section(
        &self,
        snapshot: &MonitorSnapshot,
        scan_number: u64,
        first_write: bool,
    ) -> Result<(), ReportError> {
        self.ensure_header(first_write)?;
        self.append(&render_section(snapshot, scan_number))
    }

    /// Append the stop notice, creating the report if it is missing.
    ///
    /// `first_write` has the same meaning as in [`Self::append_section`]: a
    /// run that stops before its first section still replaces the previous
    /// run's report.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if the file cannot be created or appended to.
    pub fn append_stop_notice(
        &self,
        cause: &str,
        action: &str,
        first_write: bool,
    ) -> Result<(), ReportError> {
        self.ensure_header(first_write)?;
        self.append(&render_stop_notice(&Local::now(), cause, action))
    }

    fn ensure_header(&self, first_write: bool) -> Result<(), ReportError> {
        if !first_write && self.path.exists() {
            return Ok(());
        }
        fs::write(&self.path, render_header(&Local::now())).map_err(|source| {
            ReportError::Create {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn append(&self, text: &str) -> Result<(), ReportError> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| ReportError::Append {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(text.as_bytes())
            .map_err(|source| ReportError::Append {
                path: self.path.clone(),
                source,
            })
    }
}
