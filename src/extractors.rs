//! Stateless pattern extractors.
//!
//! Each function maps a log window to counts for one category. Counting is
//! over all non-overlapping regex matches, so the same symbol detected twice
//! in a window counts twice.

use std::collections::BTreeMap;

use regex::Regex;

use crate::patterns::{
    CompiledActivity, CompiledFunnel, CompiledLabel, CompiledSeverity, CompiledStrategy,
    CompiledTally, BREAKDOWN_GROUP,
};
use crate::stats::{
    ErrorSummary, FilterOutcome, LabeledCount, OrderActivity, StrategySnapshot, TallyOutcome,
};

/// Number of error and warning lines retained per window.
pub const MAX_SEVERITY_SAMPLES: usize = 10;

/// Count non-overlapping matches of `regex` in `window`.
pub fn count_matches(regex: &Regex, window: &str) -> u64 {
    let n = regex.find_iter(window).count();
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Extract one funnel's analyzed/detected counts and rejection reasons.
///
/// Failure labels with zero matches are left out of the result.
pub fn extract_funnel(funnel: &CompiledFunnel, window: &str) -> FilterOutcome {
    FilterOutcome {
        name: funnel.name.clone(),
        verb: funnel.verb.clone(),
        analyzed: count_matches(&funnel.analyzed, window),
        detected: count_matches(&funnel.detected, window),
        failed_filters: sparse_counts(&funnel.failures, window),
        counters: funnel
            .counters
            .iter()
            .map(|c| LabeledCount {
                label: c.label.clone(),
                count: count_matches(&c.regex, window),
            })
            .collect(),
    }
}

/// Count labeled rules, keeping only labels that matched.
///
/// Rules sharing a label are summed into the first occurrence.
fn sparse_counts(rules: &[CompiledLabel], window: &str) -> Vec<LabeledCount> {
    let mut out: Vec<LabeledCount> = Vec::new();
    for rule in rules {
        let count = count_matches(&rule.regex, window);
        if count == 0 {
            continue;
        }
        match out.iter_mut().find(|c| c.label == rule.label) {
            Some(existing) => existing.count = existing.count.saturating_add(count),
            None => out.push(LabeledCount {
                label: rule.label.clone(),
                count,
            }),
        }
    }
    out
}

/// Count a tally and, when the pattern captures `key`, break it down.
pub fn extract_tally(tally: &CompiledTally, window: &str) -> TallyOutcome {
    let mut count: u64 = 0;
    let mut breakdown: BTreeMap<String, u64> = BTreeMap::new();

    for caps in tally.regex.captures_iter(window) {
        count = count.saturating_add(1);
        if let Some(key) = caps.name(BREAKDOWN_GROUP) {
            let slot = breakdown.entry(key.as_str().to_owned()).or_insert(0);
            *slot = slot.saturating_add(1);
        }
    }

    TallyOutcome {
        label: tally.label.clone(),
        count,
        breakdown_title: tally
            .breakdown
            .as_ref()
            .map(|b| (b.title.clone(), b.item.clone())),
        breakdown,
    }
}

/// Extract every tally, funnel, and the signal count for one strategy.
pub fn extract_strategy(strategy: &CompiledStrategy, window: &str) -> StrategySnapshot {
    StrategySnapshot {
        key: strategy.key.clone(),
        title: strategy.title.clone(),
        tallies: strategy
            .tallies
            .iter()
            .map(|t| extract_tally(t, window))
            .collect(),
        funnels: strategy
            .funnels
            .iter()
            .map(|f| extract_funnel(f, window))
            .collect(),
        signals_generated: count_matches(&strategy.signals, window),
    }
}

/// Count order and position lifecycle events.
///
/// The patterns capture the instrument symbol, but only counts are kept.
pub fn extract_activity(activity: &CompiledActivity, window: &str) -> OrderActivity {
    OrderActivity {
        placed: count_matches(&activity.placed, window),
        filled: count_matches(&activity.filled, window),
        cancelled: count_matches(&activity.cancelled, window),
        opened: count_matches(&activity.opened, window),
        closed: count_matches(&activity.closed, window),
    }
}

/// Count error and warning lines, keeping the first few of each verbatim.
pub fn extract_severity(severity: &CompiledSeverity, window: &str) -> ErrorSummary {
    let (error_count, errors) = count_and_sample(&severity.error, window);
    let (warning_count, warnings) = count_and_sample(&severity.warning, window);
    ErrorSummary {
        error_count,
        warning_count,
        errors,
        warnings,
    }
}

fn count_and_sample(regex: &Regex, window: &str) -> (u64, Vec<String>) {
    let mut count: u64 = 0;
    let mut samples = Vec::new();
    for m in regex.find_iter(window) {
        count = count.saturating_add(1);
        if samples.len() < MAX_SEVERITY_SAMPLES {
            samples.push(m.as_str().to_owned());
        }
    }
    (count, samples)
}
