//! Talon-Store: SurrealDB Backend for Talon
//!
//! Persistence layer for the attack engine: fingerprints, compiled graphs,
//! step chains, findings, and the relation edges between them.
//!
//! ## Key Components
//!
//! - `SurrealGraphStore`: embedded-engine implementation of the core
//!   `GraphStore` trait
//! - schema records mapping domain entities to SurrealDB tables
//!
//! Graph creation is transactional: graph, steps, and edges commit together.

mod handle;
mod schema;

pub use handle::SurrealGraphStore;
pub use schema::{
    chain_edges, EdgeKind, EdgeRecord, FindingRecord, FingerprintRecord, GraphRecord, StepRecord,
};
