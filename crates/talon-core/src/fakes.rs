//! In-memory graph store (testing and offline runs).
//!
//! Satisfies the [`GraphStore`] contract without external dependencies,
//! including version ordering and repair provenance, so dispatcher-level
//! scenarios run hermetically.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{ActionGraph, Finding, Fingerprint};
use crate::store::{GraphStore, StoreError, StoreResult};

/// A `REPAIRED_TO` provenance edge between step nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairEdge {
    pub from_step: String,
    pub to_step: String,
}

#[derive(Debug, Default)]
struct Inner {
    fingerprints: HashMap<String, Fingerprint>,
    /// graph id -> (owning fingerprint hash, graph)
    graphs: HashMap<String, (String, ActionGraph)>,
    findings: HashMap<String, Vec<Finding>>,
    repairs: Vec<RepairEdge>,
}

/// In-memory store backed by `Mutex<HashMap>`s.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    inner: Mutex<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of graphs stored under a fingerprint (test introspection).
    pub fn graph_count(&self, fingerprint_hash: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .graphs
            .values()
            .filter(|(hash, _)| hash == fingerprint_hash)
            .count()
    }

    /// Fetch a stored graph by id (test introspection).
    pub fn graph(&self, graph_id: &str) -> Option<ActionGraph> {
        let inner = self.inner.lock().unwrap();
        inner.graphs.get(graph_id).map(|(_, g)| g.clone())
    }

    /// All recorded repair provenance edges (test introspection).
    pub fn repair_edges(&self) -> Vec<RepairEdge> {
        self.inner.lock().unwrap().repairs.clone()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_fingerprint(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let existed = inner.fingerprints.contains_key(fingerprint.hash());
        if !existed {
            inner
                .fingerprints
                .insert(fingerprint.hash().to_string(), fingerprint.clone());
        }
        Ok(existed)
    }

    async fn save_graph(&self, fingerprint_hash: &str, graph: &ActionGraph) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.graphs.insert(
            graph.id.clone(),
            (fingerprint_hash.to_string(), graph.clone()),
        );
        Ok(())
    }

    async fn most_recent_graph(&self, fingerprint_hash: &str) -> StoreResult<Option<ActionGraph>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .graphs
            .values()
            .filter(|(hash, _)| hash == fingerprint_hash)
            .map(|(_, graph)| graph)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned())
    }

    async fn append_finding(&self, graph_id: &str, finding: &Finding) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.graphs.contains_key(graph_id) {
            return Err(StoreError::GraphNotFound(graph_id.to_string()));
        }
        inner
            .findings
            .entry(graph_id.to_string())
            .or_default()
            .push(finding.clone());
        Ok(())
    }

    async fn record_execution(&self, graph_id: &str, success: bool) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let (_, graph) = inner
            .graphs
            .get_mut(graph_id)
            .ok_or_else(|| StoreError::GraphNotFound(graph_id.to_string()))?;
        graph.times_executed += 1;
        if success {
            graph.times_succeeded += 1;
        }
        graph.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn save_repaired_graph(
        &self,
        fingerprint_hash: &str,
        superseded: &ActionGraph,
        replacement: &ActionGraph,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.graphs.insert(
            replacement.id.clone(),
            (fingerprint_hash.to_string(), replacement.clone()),
        );
        // Steps pair positionally; a shorter replacement leaves the tail of
        // the superseded chain without successors.
        for (old, new) in superseded.steps.iter().zip(replacement.steps.iter()) {
            inner.repairs.push(RepairEdge {
                from_step: old.node_id(&superseded.id),
                to_step: new.node_id(&replacement.id),
            });
        }
        Ok(())
    }

    async fn findings_for_graph(&self, graph_id: &str) -> StoreResult<Vec<Finding>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.findings.get(graph_id).cloned().unwrap_or_default())
    }
}
