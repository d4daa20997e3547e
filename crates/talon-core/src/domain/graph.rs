//! Compiled attack plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;
use super::step::Step;

/// A compiled, replayable attack plan: a linear chain of typed steps tied to
/// a fingerprint.
///
/// Immutable once persisted except for the execution counters; repair never
/// rewrites a graph in place but supersedes it with a newer one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGraph {
    pub id: String,
    /// Exploit tag this graph was materialized from, e.g. `"idor_walk"`.
    pub vulnerability_type: String,
    pub description: String,
    /// Steps sorted by `order`; the first step is the entry.
    pub steps: Vec<Step>,
    /// Compiler confidence, clamped to `[0, 1]`.
    pub confidence: f64,
    pub times_executed: u64,
    pub times_succeeded: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionGraph {
    pub fn new(
        vulnerability_type: impl Into<String>,
        description: impl Into<String>,
        mut steps: Vec<Step>,
        confidence: f64,
    ) -> Self {
        steps.sort_by_key(|s| s.order);
        let now = Utc::now();
        ActionGraph {
            id: Uuid::new_v4().to_string(),
            vulnerability_type: vulnerability_type.into(),
            description: description.into(),
            steps,
            confidence: confidence.clamp(0.0, 1.0),
            times_executed: 0,
            times_succeeded: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Entry step of the chain.
    pub fn entry(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// Verify the chain invariant: non-empty, sorted, strictly increasing
    /// `order` values (a simple linear path with no duplicates).
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.steps.is_empty() {
            return Err(DomainError::InvalidGraph(format!(
                "graph {} has no steps",
                self.id
            )));
        }
        for pair in self.steps.windows(2) {
            if pair[1].order <= pair[0].order {
                return Err(DomainError::InvalidGraph(format!(
                    "graph {} step order {} follows {} (chain must be strictly increasing)",
                    self.id, pair[1].order, pair[0].order
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DomainError::InvalidGraph(format!(
                "graph {} confidence {} outside [0, 1]",
                self.id, self.confidence
            )));
        }
        if self.times_succeeded > self.times_executed {
            return Err(DomainError::InvalidGraph(format!(
                "graph {} succeeded {} > executed {}",
                self.id, self.times_succeeded, self.times_executed
            )));
        }
        Ok(())
    }
}
