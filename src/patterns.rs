//! Pattern table for the trading server's log wording.
//!
//! Every regex the monitor relies on lives here as data: strategy funnels,
//! failure filters, order activity, severity markers, and fatal signatures.
//! The tables deserialize from `monitor.toml`, so drift in the server's log
//! format is a configuration change. [`RuleSet::compile`] turns the tables
//! into compiled regexes once at startup.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Capture group name used by tally breakdowns.
pub const BREAKDOWN_GROUP: &str = "key";

/// Errors produced while compiling the pattern table.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    /// A rule's regex failed to compile.
    #[error("invalid pattern for '{label}': {source}")]
    Invalid {
        /// Label of the offending rule.
        label: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
    /// Two strategies share the same key.
    #[error("duplicate strategy key '{0}'")]
    DuplicateStrategy(String),
}

/// A pattern paired with the label it is reported under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledPattern {
    /// Regex matched against the log window.
    pub pattern: String,
    /// Human-readable label for the report.
    pub label: String,
}

impl LabeledPattern {
    fn new(pattern: &str, label: &str) -> Self {
        Self {
            pattern: pattern.to_owned(),
            label: label.to_owned(),
        }
    }
}

/// One analyzed/detected decision funnel of a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelDefinition {
    /// Display name (e.g. "Distribution").
    pub name: String,
    /// Word used after the ratio in the report (e.g. "detected").
    #[serde(default = "default_verb")]
    pub verb: String,
    /// Pattern marking one analysis attempt.
    pub analyzed: String,
    /// Pattern marking one successful detection.
    pub detected: String,
    /// Ordered rejection reasons.
    #[serde(default)]
    pub failures: Vec<LabeledPattern>,
    /// Side counters rendered on every report, zero included.
    #[serde(default)]
    pub counters: Vec<LabeledPattern>,
}

/// Breakdown of a tally by the `key` capture group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownDefinition {
    /// Heading of the breakdown block (e.g. "Grades").
    pub title: String,
    /// Prefix for each breakdown entry (e.g. "Grade").
    pub item: String,
}

/// A plain occurrence count, optionally broken down by a captured key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyDefinition {
    /// Display label (e.g. "Boxes Detected").
    pub label: String,
    /// Pattern to count. A `(?P<key>...)` group enables the breakdown.
    pub pattern: String,
    /// Breakdown rendering, if any.
    #[serde(default)]
    pub breakdown: Option<BreakdownDefinition>,
}

/// Extractor definitions for one trading strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    /// Stable identifier (e.g. "cycle_rider").
    pub key: String,
    /// Report heading.
    pub title: String,
    /// Pattern marking one generated signal.
    pub signals: String,
    /// Tallies, rendered before funnels.
    #[serde(default)]
    pub tallies: Vec<TallyDefinition>,
    /// Decision funnels in report order.
    #[serde(default)]
    pub funnels: Vec<FunnelDefinition>,
}

/// Order and position lifecycle patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPatterns {
    /// Order placed.
    #[serde(default = "default_placed")]
    pub placed: String,
    /// Order filled.
    #[serde(default = "default_filled")]
    pub filled: String,
    /// Order cancelled.
    #[serde(default = "default_cancelled")]
    pub cancelled: String,
    /// Position opened.
    #[serde(default = "default_opened")]
    pub opened: String,
    /// Position closed.
    #[serde(default = "default_closed")]
    pub closed: String,
}

impl Default for ActivityPatterns {
    fn default() -> Self {
        Self {
            placed: default_placed(),
            filled: default_filled(),
            cancelled: default_cancelled(),
            opened: default_opened(),
            closed: default_closed(),
        }
    }
}

/// Colorized severity markers emitted by the server's logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityPatterns {
    /// Error line marker. The whole match is kept as a sample.
    #[serde(default = "default_error_marker")]
    pub error: String,
    /// Warning line marker.
    #[serde(default = "default_warning_marker")]
    pub warning: String,
}

impl Default for SeverityPatterns {
    fn default() -> Self {
        Self {
            error: default_error_marker(),
            warning: default_warning_marker(),
        }
    }
}

/// Compiled counterpart of [`LabeledPattern`].
#[derive(Debug, Clone)]
pub struct CompiledLabel {
    /// Report label.
    pub label: String,
    /// Compiled regex.
    pub regex: Regex,
}

/// Compiled counterpart of [`FunnelDefinition`].
#[derive(Debug, Clone)]
pub struct CompiledFunnel {
    /// Display name.
    pub name: String,
    /// Ratio wording.
    pub verb: String,
    /// Analysis attempts.
    pub analyzed: Regex,
    /// Detections.
    pub detected: Regex,
    /// Rejection reasons in order.
    pub failures: Vec<CompiledLabel>,
    /// Side counters in order.
    pub counters: Vec<CompiledLabel>,
}

/// Compiled counterpart of [`TallyDefinition`].
#[derive(Debug, Clone)]
pub struct CompiledTally {
    /// Display label.
    pub label: String,
    /// Counted pattern.
    pub regex: Regex,
    /// Breakdown rendering, if any.
    pub breakdown: Option<BreakdownDefinition>,
}

/// Compiled counterpart of [`StrategyDefinition`].
#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    /// Stable identifier.
    pub key: String,
    /// Report heading.
    pub title: String,
    /// Signals generated.
    pub signals: Regex,
    /// Tallies in order.
    pub tallies: Vec<CompiledTally>,
    /// Funnels in order.
    pub funnels: Vec<CompiledFunnel>,
}

/// Compiled order activity patterns.
#[derive(Debug, Clone)]
pub struct CompiledActivity {
    /// Order placed.
    pub placed: Regex,
    /// Order filled.
    pub filled: Regex,
    /// Order cancelled.
    pub cancelled: Regex,
    /// Position opened.
    pub opened: Regex,
    /// Position closed.
    pub closed: Regex,
}

/// Compiled severity markers.
#[derive(Debug, Clone)]
pub struct CompiledSeverity {
    /// Error marker.
    pub error: Regex,
    /// Warning marker.
    pub warning: Regex,
}

/// Every extractor regex, compiled once and shared by all cycles.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Strategies in report order.
    pub strategies: Vec<CompiledStrategy>,
    /// Order and position activity.
    pub activity: CompiledActivity,
    /// Error and warning markers.
    pub severity: CompiledSeverity,
}

impl RuleSet {
    /// Compile the given tables.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] naming the first rule whose regex is invalid,
    /// or a strategy key that appears twice.
    pub fn compile(
        strategies: &[StrategyDefinition],
        activity: &ActivityPatterns,
        severity: &SeverityPatterns,
    ) -> Result<Self, PatternError> {
        let mut compiled = Vec::with_capacity(strategies.len());
        for def in strategies {
            if compiled
                .iter()
                .any(|s: &CompiledStrategy| s.key == def.key)
            {
                return Err(PatternError::DuplicateStrategy(def.key.clone()));
            }
            compiled.push(compile_strategy(def)?);
        }

        Ok(Self {
            strategies: compiled,
            activity: CompiledActivity {
                placed: compile(&activity.placed, "orders placed")?,
                filled: compile(&activity.filled, "orders filled")?,
                cancelled: compile(&activity.cancelled, "orders cancelled")?,
                opened: compile(&activity.opened, "positions opened")?,
                closed: compile(&activity.closed, "positions closed")?,
            },
            severity: CompiledSeverity {
                error: compile(&severity.error, "error marker")?,
                warning: compile(&severity.warning, "warning marker")?,
            },
        })
    }

    /// Compile the built-in tables.
    ///
    /// # Errors
    ///
    /// Only fails if a built-in pattern is malformed.
    pub fn builtin() -> Result<Self, PatternError> {
        Self::compile(
            &builtin_strategies(),
            &ActivityPatterns::default(),
            &SeverityPatterns::default(),
        )
    }
}

fn compile_strategy(def: &StrategyDefinition) -> Result<CompiledStrategy, PatternError> {
    let tallies = def
        .tallies
        .iter()
        .map(|t| {
            Ok(CompiledTally {
                label: t.label.clone(),
                regex: compile(&t.pattern, &t.label)?,
                breakdown: t.breakdown.clone(),
            })
        })
        .collect::<Result<Vec<_>, PatternError>>()?;

    let funnels = def
        .funnels
        .iter()
        .map(|f| {
            Ok(CompiledFunnel {
                name: f.name.clone(),
                verb: f.verb.clone(),
                analyzed: compile(&f.analyzed, &format!("{} analyzed", f.name))?,
                detected: compile(&f.detected, &format!("{} detected", f.name))?,
                failures: compile_labels(&f.failures)?,
                counters: compile_labels(&f.counters)?,
            })
        })
        .collect::<Result<Vec<_>, PatternError>>()?;

    Ok(CompiledStrategy {
        key: def.key.clone(),
        title: def.title.clone(),
        signals: compile(&def.signals, &format!("{} signals", def.key))?,
        tallies,
        funnels,
    })
}

fn compile_labels(rules: &[LabeledPattern]) -> Result<Vec<CompiledLabel>, PatternError> {
    rules
        .iter()
        .map(|r| {
            Ok(CompiledLabel {
                label: r.label.clone(),
                regex: compile(&r.pattern, &r.label)?,
            })
        })
        .collect()
}

/// Compile a case-sensitive extractor pattern.
fn compile(pattern: &str, label: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError::Invalid {
        label: label.to_owned(),
        source,
    })
}

/// Compile a fatal signature. Fatal signatures match case-insensitively.
///
/// # Errors
///
/// Returns [`PatternError::Invalid`] when the regex is malformed.
pub fn compile_fatal(pattern: &str) -> Result<Regex, PatternError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| PatternError::Invalid {
            label: format!("fatal pattern {pattern}"),
            source,
        })
}

/// Fatal signatures in priority order. The first listed match wins.
pub fn builtin_fatal_patterns() -> Vec<String> {
    [
        "ECONNREFUSED",
        "Cannot connect to.*database",
        "UnhandledPromiseRejectionWarning",
        "TypeError:",
        "ReferenceError:",
        "Fatal error",
        "SIGTERM",
        "SIGKILL",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// The strategy table for the dual-strategy trading server.
pub fn builtin_strategies() -> Vec<StrategyDefinition> {
    vec![cycle_rider(), hour_swing(), box_range()]
}

fn cycle_rider() -> StrategyDefinition {
    StrategyDefinition {
        key: "cycle_rider".to_owned(),
        title: "\u{1f504} Cycle Rider Strategy".to_owned(),
        signals: r"\[CycleRider\] (\w+) 🚀 Cycle Rider signal".to_owned(),
        tallies: Vec::new(),
        funnels: vec![
            FunnelDefinition {
                name: "Distribution".to_owned(),
                verb: "detected".to_owned(),
                analyzed: r"\[Distribution\] (\w+) Starting analysis".to_owned(),
                detected: r"\[Distribution\] (\w+) 🎯 Distribution zone detected".to_owned(),
                failures: vec![
                    LabeledPattern::new(
                        r"Not in distribution \(price not near POC\)",
                        "Not near POC",
                    ),
                    LabeledPattern::new(r"Volume spike too strong", "Volume spike"),
                    LabeledPattern::new(r"CVD slope too negative", "CVD negative"),
                    LabeledPattern::new(r"No accumulation pattern", "No accumulation"),
                ],
                counters: Vec::new(),
            },
            FunnelDefinition {
                name: "Squeeze Momentum".to_owned(),
                verb: "detected".to_owned(),
                analyzed: r"\[SqueezeMomentum\] (\w+) Starting analysis".to_owned(),
                detected: r"\[SqueezeMomentum\] (\w+) ✅ Squeeze detected".to_owned(),
                failures: vec![
                    LabeledPattern::new(r"Not in squeeze", "Not in squeeze"),
                    LabeledPattern::new(r"No momentum divergence", "No divergence"),
                    LabeledPattern::new(r"Histogram not bullish", "Histogram not bullish"),
                ],
                counters: Vec::new(),
            },
        ],
    }
}

fn hour_swing() -> StrategyDefinition {
    StrategyDefinition {
        key: "hour_swing".to_owned(),
        title: "\u{23f0} Hour Swing Strategy".to_owned(),
        signals: r"\[HourSwing\] (\w+) 🎯.*signal generated".to_owned(),
        tallies: Vec::new(),
        funnels: vec![
            FunnelDefinition {
                name: "MTF Alignment".to_owned(),
                verb: "aligned".to_owned(),
                analyzed: r"\[MTF Alignment\] (\w+) Checking alignment".to_owned(),
                detected: r"\[MTF Alignment\] (\w+) ✅.*aligned".to_owned(),
                failures: vec![
                    LabeledPattern::new(r"1H analysis: valid=false", "1H trend invalid"),
                    LabeledPattern::new(r"15M analysis: aligned=false", "15M not aligned"),
                    LabeledPattern::new(r"strength=0\.00", "Trend too weak"),
                ],
                counters: Vec::new(),
            },
            FunnelDefinition {
                name: "Relative Strength".to_owned(),
                verb: "confirmed".to_owned(),
                analyzed: r"\[RelativeStrength\] (\w+) Checking relative strength".to_owned(),
                detected: r"\[RelativeStrength\] (\w+) ✅ Relative strength confirmed".to_owned(),
                failures: vec![
                    LabeledPattern::new(r"BTC bearish cross detected", "BTC bearish"),
                    LabeledPattern::new(r"BTC bullish cross detected", "BTC bullish"),
                    LabeledPattern::new(r"Altcoin weaker than BTC", "Weaker than BTC"),
                ],
                counters: Vec::new(),
            },
            FunnelDefinition {
                name: "Funding Extremes".to_owned(),
                verb: "extreme detected".to_owned(),
                analyzed: r"\[FundingExtremes\] (\w+) Starting analysis".to_owned(),
                detected: r"\[FundingExtremes\] (\w+) 💥 Extreme funding detected".to_owned(),
                failures: vec![
                    LabeledPattern::new(
                        r"Market structure break: broken=false",
                        "Structure not broken",
                    ),
                    LabeledPattern::new(r"Momentum slowing: false", "Momentum not slowing"),
                    LabeledPattern::new(r"isExtreme=false", "Funding not extreme"),
                ],
                counters: vec![LabeledPattern::new(
                    r"\[FundingExtremes\] (\w+) 🔥 EXTREME zScore detected",
                    "\u{1f525} Extreme zScore bypass",
                )],
            },
        ],
    }
}

fn box_range() -> StrategyDefinition {
    StrategyDefinition {
        key: "box_range".to_owned(),
        title: "\u{1f4e6} Box Range Strategy".to_owned(),
        signals: r"\[BoxRangeSignal\] (\w+) 🎯 Box Range signal generated".to_owned(),
        tallies: vec![TallyDefinition {
            label: "Boxes Detected".to_owned(),
            pattern: r"\[BoxDetector\] (\w+) ✅ Box detected! Grade=(?P<key>[ABC])".to_owned(),
            breakdown: Some(BreakdownDefinition {
                title: "Grades".to_owned(),
                item: "Grade".to_owned(),
            }),
        }],
        funnels: vec![FunnelDefinition {
            name: "Entry Analysis".to_owned(),
            verb: "signals".to_owned(),
            analyzed: r"\[BoxRangeSignal\] (\w+) Starting box range analysis".to_owned(),
            detected: r"\[BoxRangeSignal\] (\w+) 🎯 Box Range signal generated".to_owned(),
            failures: vec![
                LabeledPattern::new(r"Failed ATR filter", "ATR out of range"),
                LabeledPattern::new(r"1H ADX too high", "ADX too high"),
                LabeledPattern::new(r"Failed upper timeframe filter", "Upper TF failed"),
                LabeledPattern::new(r"Box invalidated by price breakout", "Box breakout"),
                LabeledPattern::new(r"Symbol disabled", "Symbol disabled"),
            ],
            counters: Vec::new(),
        }],
    }
}

// Default value functions for serde.

fn default_verb() -> String {
    "detected".to_owned()
}

fn default_placed() -> String {
    r"Order placed.*(\w+USDT)".to_owned()
}

fn default_filled() -> String {
    r"Order filled.*(\w+USDT)".to_owned()
}

fn default_cancelled() -> String {
    r"Order cancelled.*(\w+USDT)".to_owned()
}

fn default_opened() -> String {
    r"Position opened.*(\w+USDT)".to_owned()
}

fn default_closed() -> String {
    r"Position closed.*(\w+USDT)".to_owned()
}

fn default_error_marker() -> String {
    r"\[31merror\[39m.*".to_owned()
}

fn default_warning_marker() -> String {
    r"\[33mwarn\[39m.*".to_owned()
}
