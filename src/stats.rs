//! Per-cycle statistics model and the aggregator that builds it.
//!
//! A [`MonitorSnapshot`] is created fresh for every log window, handed to the
//! report renderer, and dropped. Nothing here performs I/O.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::extractors;
use crate::patterns::RuleSet;

/// A count reported under a human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledCount {
    /// Report label.
    pub label: String,
    /// Number of matches in the window.
    pub count: u64,
}

/// Analyzed/detected counts for one decision funnel plus its rejection reasons.
///
/// `detected <= analyzed` is expected but not enforced: both counts come from
/// independent matches over the same window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOutcome {
    /// Funnel display name.
    pub name: String,
    /// Ratio wording used by the report.
    pub verb: String,
    /// Analysis attempts.
    pub analyzed: u64,
    /// Successful detections.
    pub detected: u64,
    /// Rejection reasons with a non-zero count, in rule order.
    pub failed_filters: Vec<LabeledCount>,
    /// Side counters in rule order, zero included.
    pub counters: Vec<LabeledCount>,
}

impl FilterOutcome {
    /// Count recorded for a failure label. `None` means zero matches.
    pub fn failure(&self, label: &str) -> Option<u64> {
        self.failed_filters
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.count)
    }

    /// Value of a side counter, zero if the label is unknown.
    pub fn counter(&self, label: &str) -> u64 {
        self.counters
            .iter()
            .find(|c| c.label == label)
            .map_or(0, |c| c.count)
    }
}

/// Occurrence count with an optional breakdown by captured key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyOutcome {
    /// Display label.
    pub label: String,
    /// Total matches.
    pub count: u64,
    /// Heading and item prefix for the breakdown block, if configured.
    pub breakdown_title: Option<(String, String)>,
    /// Matches per captured key, sorted by key.
    pub breakdown: BTreeMap<String, u64>,
}

/// Statistics for one trading strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategySnapshot {
    /// Stable identifier.
    pub key: String,
    /// Report heading.
    pub title: String,
    /// Tallies in definition order.
    pub tallies: Vec<TallyOutcome>,
    /// Funnels in definition order.
    pub funnels: Vec<FilterOutcome>,
    /// Signals generated in the window.
    pub signals_generated: u64,
}

impl StrategySnapshot {
    /// Look up a funnel by display name.
    pub fn funnel(&self, name: &str) -> Option<&FilterOutcome> {
        self.funnels.iter().find(|f| f.name == name)
    }

    /// Look up a tally by label.
    pub fn tally(&self, label: &str) -> Option<&TallyOutcome> {
        self.tallies.iter().find(|t| t.label == label)
    }
}

/// Order and position lifecycle counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrderActivity {
    /// Orders placed.
    pub placed: u64,
    /// Orders filled.
    pub filled: u64,
    /// Orders cancelled.
    pub cancelled: u64,
    /// Positions opened.
    pub opened: u64,
    /// Positions closed.
    pub closed: u64,
}

/// Error and warning totals with bounded samples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    /// Total error lines.
    pub error_count: u64,
    /// Total warning lines.
    pub warning_count: u64,
    /// First error lines, at most [`extractors::MAX_SEVERITY_SAMPLES`].
    pub errors: Vec<String>,
    /// First warning lines, at most [`extractors::MAX_SEVERITY_SAMPLES`].
    pub warnings: Vec<String>,
}

impl ErrorSummary {
    /// Whether any error or warning was seen.
    pub fn is_empty(&self) -> bool {
        self.error_count == 0 && self.warning_count == 0
    }
}

/// The full statistics aggregate for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    /// When the window was analyzed.
    pub timestamp: DateTime<Local>,
    /// One entry per tracked strategy, in table order.
    pub strategies: Vec<StrategySnapshot>,
    /// Order and position activity.
    pub activity: OrderActivity,
    /// Error and warning summary.
    pub errors: ErrorSummary,
}

impl MonitorSnapshot {
    /// Look up a strategy by key.
    pub fn strategy(&self, key: &str) -> Option<&StrategySnapshot> {
        self.strategies.iter().find(|s| s.key == key)
    }
}

/// Run every extractor once over `window` and assemble the snapshot.
///
/// Extractors are independent; no cross-checks are applied to their results.
pub fn aggregate(rules: &RuleSet, window: &str, timestamp: DateTime<Local>) -> MonitorSnapshot {
    MonitorSnapshot {
        timestamp,
        strategies: rules
            .strategies
            .iter()
            .map(|s| extractors::extract_strategy(s, window))
            .collect(),
        activity: extractors::extract_activity(&rules.activity, window),
        errors: extractors::extract_severity(&rules.severity, window),
    }
}
