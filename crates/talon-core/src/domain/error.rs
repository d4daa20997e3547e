//! Domain-level error taxonomy.

/// Errors raised by domain-model invariant checks.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("invalid attack graph: {0}")]
    InvalidGraph(String),

    #[error("invalid attack plan: {0}")]
    InvalidPlan(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
