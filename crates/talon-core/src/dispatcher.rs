//! Top-level run routing: cold start, warm start, repair.
//!
//! One `dispatch` call owns one run: it upserts the fingerprint, consults
//! the graph cache, compiles only on a miss, executes, and performs at most
//! one repair round on systemic failure. Warm starts never touch the agents.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::classify::FailureCategory;
use crate::compile::{CompilationCoordinator, CompileError};
use crate::config::OrchestratorConfig;
use crate::domain::{ActionGraph, ExecutionContext, Fingerprint};
use crate::engine::{EngineError, ExecutionEngine, RunOutcome};
use crate::generators::TargetProfile;
use crate::repair::{RepairCoordinator, RepairError};
use crate::store::{GraphStore, StoreError};

/// Which routing path a run took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPath {
    ColdStart,
    WarmStart,
}

/// Printed summary of one dispatcher invocation.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorResult {
    pub path: RunPath,
    /// Whether this run invoked the compiler at all (cold start or repair).
    pub compiled: bool,
    pub repaired: bool,
    pub success: bool,
    pub step_count: usize,
    /// Ids of findings persisted during the run(s).
    pub findings: Vec<String>,
    /// Failure category when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCategory>,
}

/// Dispatcher-level failures: infrastructure and compilation. Runs that
/// executed to a failed terminal state are not errors; they are results
/// with `success: false`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("compilation failed: {0}")]
    Compilation(#[from] CompileError),

    #[error("execution aborted: {0}")]
    Engine(#[from] EngineError),
}

impl From<RepairError> for OrchestratorError {
    fn from(err: RepairError) -> Self {
        match err {
            RepairError::Compile(e) => OrchestratorError::Compilation(e),
            RepairError::Store(e) => OrchestratorError::Store(e),
        }
    }
}

/// Top-level state machine selecting cold/warm/repair paths.
pub struct RunDispatcher {
    store: Arc<dyn GraphStore>,
    compiler: CompilationCoordinator,
    engine: ExecutionEngine,
    profile: TargetProfile,
    config: OrchestratorConfig,
}

impl RunDispatcher {
    pub fn new(
        store: Arc<dyn GraphStore>,
        compiler: CompilationCoordinator,
        engine: ExecutionEngine,
        profile: TargetProfile,
        config: OrchestratorConfig,
    ) -> Self {
        RunDispatcher {
            store,
            compiler,
            engine,
            profile,
            config,
        }
    }

    /// Run one attack against the configured target.
    #[instrument(skip_all, fields(fingerprint = %fingerprint.short_hash()))]
    pub async fn dispatch(
        &self,
        fingerprint: Fingerprint,
    ) -> Result<OrchestratorResult, OrchestratorError> {
        let known = self.store.upsert_fingerprint(&fingerprint).await?;
        debug!(known, "fingerprint upserted");

        let cached = self.store.most_recent_graph(fingerprint.hash()).await?;
        let (path, compiled, graph) = match cached {
            Some(graph) => {
                info!(graph_id = %graph.id, "warm start: cache hit, zero model calls");
                (RunPath::WarmStart, false, graph)
            }
            None => {
                info!("cold start: compiling attack graph");
                let recon_context = self.recon_context(&fingerprint);
                let graph = self
                    .compiler
                    .compile(&fingerprint, &self.profile, &recon_context)
                    .await?;
                self.store.save_graph(fingerprint.hash(), &graph).await?;
                (RunPath::ColdStart, true, graph)
            }
        };

        let mut ctx = ExecutionContext::new(self.config.target_url.clone(), fingerprint.clone());
        let outcome = self
            .engine
            .execute(&graph, &mut ctx, self.store.as_ref())
            .await?;

        match outcome {
            RunOutcome::Completed { findings } => {
                self.store.record_execution(&graph.id, true).await?;
                Ok(self.result(path, compiled, false, true, &graph, findings, None))
            }
            RunOutcome::Failed {
                category: FailureCategory::Auth,
                findings,
                ..
            } => {
                // Credentials are a configuration concern; repair cannot fix
                // them.
                self.store.record_execution(&graph.id, false).await?;
                Ok(self.result(
                    path,
                    compiled,
                    false,
                    false,
                    &graph,
                    findings,
                    Some(FailureCategory::Auth),
                ))
            }
            RunOutcome::Failed {
                failed,
                findings,
                prior_outputs,
                ..
            } => {
                if !self.config.repair_enabled {
                    warn!("systemic failure with repair disabled, terminal");
                    self.store.record_execution(&graph.id, false).await?;
                    return Ok(self.result(
                        path,
                        compiled,
                        false,
                        false,
                        &graph,
                        findings,
                        Some(FailureCategory::Systemic),
                    ));
                }

                info!(failed_order = failed.order, "systemic failure: repairing");
                let repairer = RepairCoordinator::new(&self.compiler, self.store.as_ref());
                let recon_context = self.recon_context(&fingerprint);
                let replacement = repairer
                    .repair(
                        &fingerprint,
                        &self.profile,
                        &recon_context,
                        &failed,
                        &prior_outputs,
                        &graph,
                    )
                    .await?;

                // Fresh context; the repaired chain replays from step 0.
                let mut retry_ctx =
                    ExecutionContext::new(self.config.target_url.clone(), fingerprint.clone());
                let second = self
                    .engine
                    .execute(&replacement, &mut retry_ctx, self.store.as_ref())
                    .await?;

                let success = second.success();
                self.store.record_execution(&replacement.id, success).await?;

                let mut all_findings = findings;
                all_findings.extend_from_slice(second.findings());
                let failure = match &second {
                    RunOutcome::Completed { .. } => None,
                    RunOutcome::Failed { category, .. } => Some(*category),
                };
                Ok(self.result(path, true, true, success, &replacement, all_findings, failure))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn result(
        &self,
        path: RunPath,
        compiled: bool,
        repaired: bool,
        success: bool,
        graph: &ActionGraph,
        findings: Vec<String>,
        failure: Option<FailureCategory>,
    ) -> OrchestratorResult {
        OrchestratorResult {
            path,
            compiled,
            repaired,
            success,
            step_count: graph.steps.len(),
            findings,
            failure,
        }
    }

    /// Recon context handed to the agent on cold starts; the repair path
    /// prepends its failure enrichment to this.
    fn recon_context(&self, fingerprint: &Fingerprint) -> String {
        let signals = fingerprint
            .security_signals
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Target: {}\nStack: {}\nAuth model: {}\nEndpoint pattern: {}\nSignals: {}\n\n{}",
            self.config.target_url,
            fingerprint.tech_stack,
            fingerprint.auth_model,
            fingerprint.endpoint_pattern,
            signals,
            fingerprint.observation_text
        )
    }
}
