//! Findings emitted by matched OBSERVE steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Deterministic severity for a vulnerability tag. Unknown tags rate Medium.
pub fn severity_for(vulnerability_type: &str) -> Severity {
    match vulnerability_type {
        "auth_strip" => Severity::Critical,
        "idor_walk" | "token_swap" | "role_tamper" => Severity::High,
        "namespace_probe" => Severity::Medium,
        _ => Severity::Medium,
    }
}

/// A positive observation from an OBSERVE-phase step whose success criterion
/// matched. Created during execution, flushed to the store inline, never
/// mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub observation: String,
    pub severity: Severity,
    /// Bounded excerpt of the matching output.
    pub evidence: String,
    pub target_url: String,
    pub embedding: Option<Vec<f32>>,
    pub discovered_at: DateTime<Utc>,
}

/// Evidence excerpts are clipped to keep finding records small.
const MAX_EVIDENCE_CHARS: usize = 256;

impl Finding {
    pub fn new(
        observation: impl Into<String>,
        severity: Severity,
        evidence: &str,
        target_url: impl Into<String>,
    ) -> Self {
        Finding {
            id: Uuid::new_v4().to_string(),
            observation: observation.into(),
            severity,
            evidence: clip(evidence, MAX_EVIDENCE_CHARS),
            target_url: target_url.into(),
            embedding: None,
            discovered_at: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
