//! SurrealDB-backed implementation of the core `GraphStore` contract.
//!
//! Each write method issues a single transaction; graph creation persists
//! the graph row, its step chain, and the relation edges atomically so a
//! partially-written graph can never be served from the cache.

use async_trait::async_trait;
use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use talon_core::{ActionGraph, Finding, Fingerprint, GraphStore, StoreError, StoreResult};

use crate::schema::{
    chain_edges, EdgeKind, EdgeRecord, FindingRecord, FingerprintRecord, GraphRecord, StepRecord,
};

/// SurrealDB connection handle for Talon.
pub struct SurrealGraphStore {
    db: Surreal<Db>,
}

fn query_err(err: surrealdb::Error) -> StoreError {
    StoreError::Query(err.to_string())
}

impl SurrealGraphStore {
    /// Connect to the embedded engine and set up the schema.
    #[instrument(skip_all)]
    pub async fn setup_db() -> StoreResult<Self> {
        info!("connecting to SurrealDB (in-memory)");

        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        db.use_ns("talon")
            .use_db("main")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = SurrealGraphStore { db };
        store.init_schema().await?;

        info!("SurrealDB connected and schema initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        debug!("initializing talon schema");

        let schema = r#"
            -- Fingerprints (cache keys)
            DEFINE TABLE fingerprints SCHEMAFULL;
            DEFINE FIELD hash ON fingerprints TYPE string;
            DEFINE FIELD tech_stack ON fingerprints TYPE string;
            DEFINE FIELD auth_model ON fingerprints TYPE string;
            DEFINE FIELD endpoint_pattern ON fingerprints TYPE string;
            DEFINE FIELD security_signals ON fingerprints TYPE array;
            DEFINE FIELD observation_text ON fingerprints TYPE string;
            DEFINE FIELD embedding ON fingerprints TYPE option<array>;
            DEFINE FIELD created_at ON fingerprints TYPE datetime;
            DEFINE INDEX idx_fingerprint_hash ON fingerprints FIELDS hash UNIQUE;

            -- Attack graphs
            DEFINE TABLE graphs SCHEMAFULL;
            DEFINE FIELD graph_id ON graphs TYPE string;
            DEFINE FIELD fingerprint_hash ON graphs TYPE string;
            DEFINE FIELD vulnerability_type ON graphs TYPE string;
            DEFINE FIELD description ON graphs TYPE string;
            DEFINE FIELD confidence ON graphs TYPE float;
            DEFINE FIELD times_executed ON graphs TYPE int;
            DEFINE FIELD times_succeeded ON graphs TYPE int;
            DEFINE FIELD created_at ON graphs TYPE datetime;
            DEFINE FIELD updated_at ON graphs TYPE datetime;
            DEFINE INDEX idx_graph_id ON graphs FIELDS graph_id UNIQUE;
            DEFINE INDEX idx_graph_fingerprint ON graphs FIELDS fingerprint_hash;

            -- Steps (owned by their graph)
            DEFINE TABLE steps SCHEMAFULL;
            DEFINE FIELD node_id ON steps TYPE string;
            DEFINE FIELD graph_id ON steps TYPE string;
            DEFINE FIELD seq ON steps TYPE int;
            DEFINE FIELD phase ON steps TYPE string;
            DEFINE FIELD kind ON steps TYPE string;
            DEFINE FIELD command ON steps TYPE string;
            DEFINE FIELD parameters ON steps FLEXIBLE TYPE object;
            DEFINE FIELD output_file ON steps TYPE option<string>;
            DEFINE FIELD success_criteria ON steps TYPE option<string>;
            DEFINE FIELD deterministic ON steps TYPE bool;
            DEFINE INDEX idx_step_node ON steps FIELDS node_id UNIQUE;
            DEFINE INDEX idx_step_graph ON steps FIELDS graph_id;

            -- Findings
            DEFINE TABLE findings SCHEMAFULL;
            DEFINE FIELD finding_id ON findings TYPE string;
            DEFINE FIELD graph_id ON findings TYPE string;
            DEFINE FIELD observation ON findings TYPE string;
            DEFINE FIELD severity ON findings TYPE string;
            DEFINE FIELD evidence ON findings TYPE string;
            DEFINE FIELD target_url ON findings TYPE string;
            DEFINE FIELD embedding ON findings TYPE option<array>;
            DEFINE FIELD discovered_at ON findings TYPE datetime;
            DEFINE INDEX idx_finding_id ON findings FIELDS finding_id UNIQUE;
            DEFINE INDEX idx_finding_graph ON findings FIELDS graph_id;

            -- Property-graph relations
            DEFINE TABLE edges SCHEMAFULL;
            DEFINE FIELD from_id ON edges TYPE string;
            DEFINE FIELD to_id ON edges TYPE string;
            DEFINE FIELD kind ON edges TYPE string;
            DEFINE FIELD created_at ON edges TYPE datetime;
            DEFINE INDEX idx_edge_from ON edges FIELDS from_id;
            DEFINE INDEX idx_edge_to ON edges FIELDS to_id;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| StoreError::Schema(e.to_string()))?;

        debug!("schema initialized");
        Ok(())
    }

    /// Create a graph row, its steps, and a set of edges in one transaction.
    async fn create_graph_tx(
        &self,
        record: GraphRecord,
        steps: Vec<StepRecord>,
        edges: Vec<EdgeRecord>,
    ) -> StoreResult<()> {
        let result = self
            .db
            .query(
                r#"
                BEGIN TRANSACTION;
                CREATE graphs CONTENT $graph;
                INSERT INTO steps $steps;
                INSERT INTO edges $edges;
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("graph", record))
            .bind(("steps", steps))
            .bind(("edges", edges))
            .await
            .map_err(query_err)?;

        result
            .check()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    /// Edges linking each superseded step to its positional replacement.
    fn repair_edges(superseded: &ActionGraph, replacement: &ActionGraph) -> Vec<EdgeRecord> {
        superseded
            .steps
            .iter()
            .zip(replacement.steps.iter())
            .map(|(old, new)| {
                EdgeRecord::new(
                    old.node_id(&superseded.id),
                    new.node_id(&replacement.id),
                    EdgeKind::RepairedTo,
                )
            })
            .collect()
    }

    /// All relation rows of a kind, oldest first (audit/test introspection).
    pub async fn edges_of_kind(&self, kind: EdgeKind) -> StoreResult<Vec<EdgeRecord>> {
        let kind_owned = kind;
        let mut result = self
            .db
            .query("SELECT * FROM edges WHERE kind = $kind ORDER BY created_at ASC")
            .bind(("kind", kind_owned))
            .await
            .map_err(query_err)?;

        result.take(0).map_err(query_err)
    }
}

#[async_trait]
impl GraphStore for SurrealGraphStore {
    /// Check-then-create keyed by hash; the unique index backstops
    /// concurrent upserts of the same fingerprint.
    #[instrument(skip_all, fields(hash = %fingerprint.short_hash()))]
    async fn upsert_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        let hash = fingerprint.hash().to_string();
        let mut result = self
            .db
            .query("SELECT * FROM fingerprints WHERE hash = $hash")
            .bind(("hash", hash))
            .await
            .map_err(query_err)?;

        let existing: Vec<FingerprintRecord> = result.take(0).map_err(query_err)?;
        if !existing.is_empty() {
            debug!("fingerprint already known");
            return Ok(true);
        }

        let record = FingerprintRecord::from_domain(fingerprint);
        let _created: Option<FingerprintRecord> = self
            .db
            .create("fingerprints")
            .content(record)
            .await
            .map_err(query_err)?;

        info!("fingerprint saved");
        Ok(false)
    }

    #[instrument(skip_all, fields(graph_id = %graph.id))]
    async fn save_graph(&self, fingerprint_hash: &str, graph: &ActionGraph) -> StoreResult<()> {
        let record = GraphRecord::from_domain(fingerprint_hash, graph);
        let steps: Vec<StepRecord> = graph
            .steps
            .iter()
            .map(|s| StepRecord::from_domain(&graph.id, s))
            .collect();
        let edges = chain_edges(fingerprint_hash, graph);

        self.create_graph_tx(record, steps, edges).await?;
        info!(steps = graph.steps.len(), "graph saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn most_recent_graph(&self, fingerprint_hash: &str) -> StoreResult<Option<ActionGraph>> {
        let hash_owned = fingerprint_hash.to_string();
        let mut result = self
            .db
            .query(
                "SELECT * FROM graphs WHERE fingerprint_hash = $hash \
                 ORDER BY created_at DESC, graph_id DESC LIMIT 1",
            )
            .bind(("hash", hash_owned))
            .await
            .map_err(query_err)?;

        let graphs: Vec<GraphRecord> = result.take(0).map_err(query_err)?;
        let Some(record) = graphs.into_iter().next() else {
            return Ok(None);
        };

        let graph_id = record.graph_id.clone();
        let mut result = self
            .db
            .query("SELECT * FROM steps WHERE graph_id = $id ORDER BY seq ASC")
            .bind(("id", graph_id))
            .await
            .map_err(query_err)?;
        let steps: Vec<StepRecord> = result.take(0).map_err(query_err)?;

        Ok(Some(record.into_domain(steps)))
    }

    #[instrument(skip_all, fields(graph_id = %graph_id, finding_id = %finding.id))]
    async fn append_finding(&self, graph_id: &str, finding: &Finding) -> StoreResult<()> {
        let record = FindingRecord::from_domain(graph_id, finding);
        let edge = EdgeRecord::new(finding.id.clone(), graph_id, EdgeKind::ProducedBy);

        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                CREATE findings CONTENT $finding;
                CREATE edges CONTENT $edge;
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("finding", record))
            .bind(("edge", edge))
            .await
            .map_err(query_err)?
            .check()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        info!("finding appended");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_execution(&self, graph_id: &str, success: bool) -> StoreResult<()> {
        let id_owned = graph_id.to_string();
        let increment: i64 = i64::from(success);
        let now = surrealdb::sql::Datetime::from(chrono::Utc::now());

        let mut result = self
            .db
            .query(
                "UPDATE graphs SET times_executed += 1, times_succeeded += $inc, \
                 updated_at = $now WHERE graph_id = $id",
            )
            .bind(("inc", increment))
            .bind(("now", now))
            .bind(("id", id_owned))
            .await
            .map_err(query_err)?;

        let updated: Vec<GraphRecord> = result.take(0).map_err(query_err)?;
        if updated.is_empty() {
            return Err(StoreError::GraphNotFound(graph_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(superseded = %superseded.id, replacement = %replacement.id))]
    async fn save_repaired_graph(
        &self,
        fingerprint_hash: &str,
        superseded: &ActionGraph,
        replacement: &ActionGraph,
    ) -> StoreResult<()> {
        let record = GraphRecord::from_domain(fingerprint_hash, replacement);
        let steps: Vec<StepRecord> = replacement
            .steps
            .iter()
            .map(|s| StepRecord::from_domain(&replacement.id, s))
            .collect();
        let mut edges = chain_edges(fingerprint_hash, replacement);
        edges.extend(Self::repair_edges(superseded, replacement));

        self.create_graph_tx(record, steps, edges).await?;
        info!("repaired graph saved with provenance");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn findings_for_graph(&self, graph_id: &str) -> StoreResult<Vec<Finding>> {
        let id_owned = graph_id.to_string();
        let mut result = self
            .db
            .query("SELECT * FROM findings WHERE graph_id = $id ORDER BY discovered_at ASC")
            .bind(("id", id_owned))
            .await
            .map_err(query_err)?;

        let records: Vec<FindingRecord> = result.take(0).map_err(query_err)?;
        Ok(records.into_iter().map(FindingRecord::into_domain).collect())
    }
}
