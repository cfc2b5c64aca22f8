//! Detection of catastrophic conditions in the server log.
//!
//! Signatures are tested in list order, case-insensitively. The first
//! signature present anywhere in the window is reported, so list order is the
//! tie-break when several are present.

use regex::Regex;

use crate::patterns::{compile_fatal, PatternError};

/// A fatal signature that matched the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalMatch {
    /// The signature as configured (e.g. `ECONNREFUSED`).
    pub pattern: String,
    /// The text that matched it.
    pub matched: String,
}

/// Ordered list of compiled fatal signatures.
#[derive(Debug, Clone)]
pub struct FatalDetector {
    signatures: Vec<(String, Regex)>,
}

impl FatalDetector {
    /// Compile the signatures, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] if any signature is not a valid regex.
    pub fn new(patterns: &[String]) -> Result<Self, PatternError> {
        let signatures = patterns
            .iter()
            .map(|p| Ok((p.clone(), compile_fatal(p)?)))
            .collect::<Result<Vec<_>, PatternError>>()?;
        Ok(Self { signatures })
    }

    /// Return the first signature, in list order, found in `window`.
    pub fn scan(&self, window: &str) -> Option<FatalMatch> {
        self.signatures.iter().find_map(|(pattern, regex)| {
            regex.find(window).map(|m| FatalMatch {
                pattern: pattern.clone(),
                matched: m.as_str().to_owned(),
            })
        })
    }

    /// Number of configured signatures.
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Whether no signatures are configured.
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
