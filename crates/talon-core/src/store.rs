//! Graph store abstraction.
//!
//! The orchestration core consumes persistence through this trait; the
//! SurrealDB driver lives in `talon-store`, and an in-memory fake for tests
//! and offline runs lives in [`crate::fakes`].
//!
//! Contract highlights:
//! - fingerprint upsert is idempotent by hash
//! - graph and finding creation is never deduplicated (one entity per call)
//! - "the current graph" for a fingerprint is the newest `created_at`,
//!   ties broken by id, which is how repaired graphs supersede broken ones

use async_trait::async_trait;

use crate::domain::{ActionGraph, Finding, Fingerprint};

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("schema setup failed: {0}")]
    Schema(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("graph not found: {0}")]
    GraphNotFound(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence operations the orchestration core requires.
///
/// Writes are expected to be transactional per call; the only cross-run
/// contention points are the idempotent fingerprint upsert and graph-version
/// ordering.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert the fingerprint if its hash is unknown. Returns `true` when
    /// the fingerprint already existed. Calling twice leaves the stored
    /// state unchanged.
    async fn upsert_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<bool>;

    /// Persist a compiled graph and its step chain under a fingerprint.
    /// Always creates a new entity.
    async fn save_graph(&self, fingerprint_hash: &str, graph: &ActionGraph) -> StoreResult<()>;

    /// The newest graph compiled for a fingerprint, with its steps, or
    /// `None` on cache miss.
    async fn most_recent_graph(&self, fingerprint_hash: &str) -> StoreResult<Option<ActionGraph>>;

    /// Record a finding produced by a graph. Flushed inline during
    /// execution, so findings survive later run failure.
    async fn append_finding(&self, graph_id: &str, finding: &Finding) -> StoreResult<()>;

    /// Increment `times_executed` (and `times_succeeded` when `success`)
    /// after a terminal run transition.
    async fn record_execution(&self, graph_id: &str, success: bool) -> StoreResult<()>;

    /// Persist `replacement` as a new graph under the same fingerprint and
    /// link each superseded step to its replacement with provenance edges.
    /// The superseded graph is preserved for audit.
    async fn save_repaired_graph(
        &self,
        fingerprint_hash: &str,
        superseded: &ActionGraph,
        replacement: &ActionGraph,
    ) -> StoreResult<()>;

    /// Findings recorded under a graph, in discovery order.
    async fn findings_for_graph(&self, graph_id: &str) -> StoreResult<Vec<Finding>>;
}
