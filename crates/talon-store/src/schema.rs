//! Schema mapping between domain entities and SurrealDB tables.
//!
//! Tables:
//! - fingerprints: content-addressed target identities (unique by hash)
//! - graphs: compiled attack plans with execution counters
//! - steps: step chains, owned by their graph
//! - findings: positive observations, owned by their graph
//! - edges: property-graph relations (TRIGGERS, STARTS_WITH, NEXT,
//!   PRODUCED_BY, REPAIRED_TO)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use talon_core::{ActionGraph, Finding, Fingerprint, Phase, Severity, Step, StepKind};

/// Bridges `chrono::DateTime<Utc>` and the engine's native datetime value.
/// Without it, SCHEMAFULL `datetime` columns reject the records: chrono
/// serializes timestamps as RFC 3339 strings, which SurrealDB types as
/// `string`, not `datetime`. Applied per field via `#[serde(with = ...)]`.
mod sql_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        surrealdb::sql::Datetime::from(*value).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        surrealdb::sql::Datetime::deserialize(de).map(DateTime::from)
    }
}

/// Fingerprint row. The hash column is the cache key; payload fields are
/// stored for recon context reconstruction and similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub hash: String,
    pub tech_stack: String,
    pub auth_model: String,
    pub endpoint_pattern: String,
    pub security_signals: Vec<String>,
    pub observation_text: String,
    pub embedding: Option<Vec<f32>>,
    #[serde(with = "sql_datetime")]
    pub created_at: DateTime<Utc>,
}

impl FingerprintRecord {
    pub fn from_domain(fingerprint: &Fingerprint) -> Self {
        FingerprintRecord {
            id: None,
            hash: fingerprint.hash().to_string(),
            tech_stack: fingerprint.tech_stack.clone(),
            auth_model: fingerprint.auth_model.clone(),
            endpoint_pattern: fingerprint.endpoint_pattern.clone(),
            security_signals: fingerprint.security_signals.iter().cloned().collect(),
            observation_text: fingerprint.observation_text.clone(),
            embedding: fingerprint.embedding.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Graph row; the step chain lives in the steps table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub graph_id: String,
    pub fingerprint_hash: String,
    pub vulnerability_type: String,
    pub description: String,
    pub confidence: f64,
    pub times_executed: u64,
    pub times_succeeded: u64,
    #[serde(with = "sql_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "sql_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl GraphRecord {
    pub fn from_domain(fingerprint_hash: &str, graph: &ActionGraph) -> Self {
        GraphRecord {
            id: None,
            graph_id: graph.id.clone(),
            fingerprint_hash: fingerprint_hash.to_string(),
            vulnerability_type: graph.vulnerability_type.clone(),
            description: graph.description.clone(),
            confidence: graph.confidence,
            times_executed: graph.times_executed,
            times_succeeded: graph.times_succeeded,
            created_at: graph.created_at,
            updated_at: graph.updated_at,
        }
    }

    pub fn into_domain(self, steps: Vec<StepRecord>) -> ActionGraph {
        let mut steps: Vec<Step> = steps.into_iter().map(StepRecord::into_domain).collect();
        steps.sort_by_key(|s| s.order);
        ActionGraph {
            id: self.graph_id,
            vulnerability_type: self.vulnerability_type,
            description: self.description,
            steps,
            confidence: self.confidence,
            times_executed: self.times_executed,
            times_succeeded: self.times_succeeded,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Step row. `seq` is the chain order (named to stay clear of the SurrealQL
/// ORDER keyword); `node_id` is the stable identity provenance edges use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub node_id: String,
    pub graph_id: String,
    pub seq: u32,
    pub phase: Phase,
    pub kind: StepKind,
    pub command: String,
    pub parameters: serde_json::Value,
    pub output_file: Option<String>,
    pub success_criteria: Option<String>,
    pub deterministic: bool,
}

impl StepRecord {
    pub fn from_domain(graph_id: &str, step: &Step) -> Self {
        StepRecord {
            id: None,
            node_id: step.node_id(graph_id),
            graph_id: graph_id.to_string(),
            seq: step.order,
            phase: step.phase,
            kind: step.kind,
            command: step.command.clone(),
            parameters: serde_json::Value::Object(step.parameters.clone()),
            output_file: step.output_file.clone(),
            success_criteria: step.success_criteria.clone(),
            deterministic: step.deterministic,
        }
    }

    pub fn into_domain(self) -> Step {
        let parameters = match self.parameters {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Step {
            order: self.seq,
            phase: self.phase,
            kind: self.kind,
            command: self.command,
            parameters,
            output_file: self.output_file,
            success_criteria: self.success_criteria,
            deterministic: self.deterministic,
        }
    }
}

/// Finding row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub finding_id: String,
    pub graph_id: String,
    pub observation: String,
    pub severity: Severity,
    pub evidence: String,
    pub target_url: String,
    pub embedding: Option<Vec<f32>>,
    #[serde(with = "sql_datetime")]
    pub discovered_at: DateTime<Utc>,
}

impl FindingRecord {
    pub fn from_domain(graph_id: &str, finding: &Finding) -> Self {
        FindingRecord {
            id: None,
            finding_id: finding.id.clone(),
            graph_id: graph_id.to_string(),
            observation: finding.observation.clone(),
            severity: finding.severity,
            evidence: finding.evidence.clone(),
            target_url: finding.target_url.clone(),
            embedding: finding.embedding.clone(),
            discovered_at: finding.discovered_at,
        }
    }

    pub fn into_domain(self) -> Finding {
        Finding {
            id: self.finding_id,
            observation: self.observation,
            severity: self.severity,
            evidence: self.evidence,
            target_url: self.target_url,
            embedding: self.embedding,
            discovered_at: self.discovered_at,
        }
    }
}

/// Relation kinds of the persisted property graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// fingerprint -> graph
    Triggers,
    /// graph -> entry step
    StartsWith,
    /// step -> next step
    Next,
    /// finding -> graph
    ProducedBy,
    /// superseded step -> replacement step
    RepairedTo,
}

/// One relation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub from_id: String,
    pub to_id: String,
    pub kind: EdgeKind,
    #[serde(with = "sql_datetime")]
    pub created_at: DateTime<Utc>,
}

impl EdgeRecord {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, kind: EdgeKind) -> Self {
        EdgeRecord {
            id: None,
            from_id: from_id.into(),
            to_id: to_id.into(),
            kind,
            created_at: Utc::now(),
        }
    }
}

/// The TRIGGERS / STARTS_WITH / NEXT edge set for a freshly compiled graph.
pub fn chain_edges(fingerprint_hash: &str, graph: &ActionGraph) -> Vec<EdgeRecord> {
    let mut edges = vec![EdgeRecord::new(
        fingerprint_hash,
        graph.id.clone(),
        EdgeKind::Triggers,
    )];
    if let Some(entry) = graph.entry() {
        edges.push(EdgeRecord::new(
            graph.id.clone(),
            entry.node_id(&graph.id),
            EdgeKind::StartsWith,
        ));
    }
    for pair in graph.steps.windows(2) {
        edges.push(EdgeRecord::new(
            pair[0].node_id(&graph.id),
            pair[1].node_id(&graph.id),
            EdgeKind::Next,
        ));
    }
    edges
}
