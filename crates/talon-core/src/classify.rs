//! Deterministic failure classification.
//!
//! Pure mapping from a failed step's `(stderr, status_code)` to the coarse
//! category the engine's retry/repair policy keys off. Equal inputs always
//! yield equal outputs.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Worth one in-place retry: rate limiting, timeouts, resets.
    Transient,
    /// Credential problem; terminal, repair cannot fix configuration.
    Auth,
    /// The graph itself is wrong for the target; candidate for repair.
    Systemic,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureCategory::Transient => "transient",
            FailureCategory::Auth => "auth",
            FailureCategory::Systemic => "systemic",
        };
        write!(f, "{s}")
    }
}

fn transient_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)timeout|timed out|connection reset").expect("transient pattern is valid")
    })
}

/// Classify a step failure. Ordered rules, first match wins:
///
/// 1. 429 or transient error text -> `Transient`
/// 2. 401 / 403 -> `Auth`
/// 3. 404 / 405 / 410 or 5xx -> `Systemic`
/// 4. anything else -> `Systemic`
pub fn classify_failure(error_text: &str, status_code: i32) -> FailureCategory {
    if status_code == 429 || transient_pattern().is_match(error_text) {
        return FailureCategory::Transient;
    }
    if matches!(status_code, 401 | 403) {
        return FailureCategory::Auth;
    }
    if matches!(status_code, 404 | 405 | 410) || status_code >= 500 {
        return FailureCategory::Systemic;
    }
    FailureCategory::Systemic
}
