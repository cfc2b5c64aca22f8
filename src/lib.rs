//! Trade Monitor: polling log monitor for the dual-strategy trading server.
//!
//! Every cycle reads the bytes appended to the server log, extracts strategy
//! funnel statistics with a table of regex rules, and appends a Markdown
//! section to the report. A fatal signature in the log stops the server.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration loading and validation.
pub mod config;
/// Stateless pattern extractors.
pub mod extractors;
/// Fatal signature detection.
pub mod fatal;
/// Structured logging setup.
pub mod logging;
/// The polling driver and its state machine.
pub mod monitor;
/// Versioned pattern tables.
pub mod patterns;
/// Stopping the monitored server.
pub mod process;
/// Markdown report rendering and file lifecycle.
pub mod report;
/// Per-cycle statistics model and aggregation.
pub mod stats;
/// Incremental log reads.
pub mod watcher;
