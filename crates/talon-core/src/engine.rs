//! Attack graph execution engine.
//!
//! Walks the linear step chain single-threaded: interpolate, dispatch,
//! classify. Transient failures get one in-place retry; auth failures are
//! terminal; systemic failures return control so the dispatcher can decide
//! whether to repair. Findings are flushed to the store inline so they
//! survive later failures in the same run.

use tracing::{debug, info, instrument, warn};

use crate::classify::{classify_failure, FailureCategory};
use crate::domain::{
    severity_for, ActionGraph, ExecutionContext, Finding, Phase, Step, StepKind,
};
use crate::handlers::{HandlerError, HandlerRegistry, StepResult};
use crate::interpolate::interpolate_parameters;
use crate::store::{GraphStore, StoreError};

/// Fatal errors that abort a run outright (as opposed to per-step failures,
/// which are classified and handled by policy).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid attack graph: {0}")]
    InvalidGraph(String),
}

/// The step that stopped a run, with enough context for repair enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedStep {
    pub order: u32,
    pub phase: Phase,
    pub kind: StepKind,
    pub error_text: String,
    pub status_code: i32,
}

impl FailedStep {
    fn from_result(step: &Step, result: &StepResult) -> Self {
        FailedStep {
            order: step.order,
            phase: step.phase,
            kind: step.kind,
            error_text: result.stderr.clone(),
            status_code: result.status_code,
        }
    }
}

/// Terminal disposition of one graph walk.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every step succeeded.
    Completed { findings: Vec<String> },
    /// A step failed beyond policy: `Auth` is terminal, `Systemic` is a
    /// repair candidate. `prior_outputs` captures the context at failure
    /// for enrichment.
    Failed {
        category: FailureCategory,
        failed: FailedStep,
        findings: Vec<String>,
        prior_outputs: Vec<String>,
    },
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn findings(&self) -> &[String] {
        match self {
            RunOutcome::Completed { findings } => findings,
            RunOutcome::Failed { findings, .. } => findings,
        }
    }
}

/// Single-threaded, cooperative step-chain executor.
pub struct ExecutionEngine {
    registry: HandlerRegistry,
}

impl ExecutionEngine {
    pub fn new(registry: HandlerRegistry) -> Self {
        ExecutionEngine { registry }
    }

    /// Walk `graph` to a terminal outcome, mutating `ctx` as steps complete.
    ///
    /// The engine does not commit execution counters; the caller does so at
    /// terminal transitions only, so a run abandoned for repair leaves the
    /// failing graph's counters untouched.
    #[instrument(skip_all, fields(graph_id = %graph.id, vuln = %graph.vulnerability_type))]
    pub async fn execute(
        &self,
        graph: &ActionGraph,
        ctx: &mut ExecutionContext,
        store: &dyn GraphStore,
    ) -> Result<RunOutcome, EngineError> {
        graph
            .validate()
            .map_err(|e| EngineError::InvalidGraph(e.to_string()))?;

        let mut findings = Vec::new();
        let mut index = 0usize;
        let mut retried = false;

        while index < graph.steps.len() {
            let step = &graph.steps[index];

            let mut prepared = step.clone();
            prepared.parameters = interpolate_parameters(&step.parameters, &ctx.previous_outputs);

            let handler = self.registry.handler_for(step.kind)?;
            let result = handler.execute(&prepared, ctx).await;
            debug!(
                order = step.order,
                phase = %step.phase,
                kind = %step.kind,
                status = result.status_code,
                matched = result.matched,
                duration_ms = result.duration_ms,
                "step finished"
            );

            if result.success() {
                if step.phase == Phase::Observe && result.matched {
                    let finding = self.emit_finding(graph, step, &result, ctx, store).await?;
                    findings.push(finding);
                }
                ctx.previous_outputs.push(result.stdout);
                index += 1;
                retried = false;
                continue;
            }

            let category = classify_failure(&result.stderr, result.status_code);
            match category {
                FailureCategory::Transient if !retried => {
                    warn!(
                        order = step.order,
                        stderr = %result.stderr,
                        "transient failure, retrying step once"
                    );
                    retried = true;
                }
                FailureCategory::Auth => {
                    warn!(order = step.order, stderr = %result.stderr, "auth failure, terminal");
                    return Ok(RunOutcome::Failed {
                        category: FailureCategory::Auth,
                        failed: FailedStep::from_result(step, &result),
                        findings,
                        prior_outputs: ctx.previous_outputs.clone(),
                    });
                }
                // Systemic, or a transient that already used its retry.
                _ => {
                    warn!(
                        order = step.order,
                        stderr = %result.stderr,
                        "systemic failure, returning for repair decision"
                    );
                    return Ok(RunOutcome::Failed {
                        category: FailureCategory::Systemic,
                        failed: FailedStep::from_result(step, &result),
                        findings,
                        prior_outputs: ctx.previous_outputs.clone(),
                    });
                }
            }
        }

        info!(steps = graph.steps.len(), findings = findings.len(), "run completed");
        Ok(RunOutcome::Completed { findings })
    }

    async fn emit_finding(
        &self,
        graph: &ActionGraph,
        step: &Step,
        result: &StepResult,
        ctx: &ExecutionContext,
        store: &dyn GraphStore,
    ) -> Result<String, EngineError> {
        let observation = format!(
            "{}: success criterion matched on step {} ({})",
            graph.vulnerability_type, step.order, step.command
        );
        let finding = Finding::new(
            observation,
            severity_for(&graph.vulnerability_type),
            &result.stdout,
            &ctx.target_url,
        );
        info!(finding_id = %finding.id, severity = %finding.severity, "finding emitted");
        store.append_finding(&graph.id, &finding).await?;
        Ok(finding.id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::domain::Fingerprint;
    use crate::fakes::MemoryGraphStore;

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(HandlerRegistry::new(&OrchestratorConfig::default()))
    }

    fn ctx() -> ExecutionContext {
        let fp = Fingerprint::new("Express", "Bearer", "/api/*", BTreeSet::new(), "");
        ExecutionContext::new("http://localhost:0", fp)
    }

    fn regex_step(order: u32, phase: Phase, pattern: &str) -> Step {
        Step::new(order, phase, StepKind::RegexMatch, pattern)
    }

    async fn save_and_run(
        graph: &ActionGraph,
        ctx: &mut ExecutionContext,
    ) -> (RunOutcome, MemoryGraphStore) {
        let store = MemoryGraphStore::new();
        store.save_graph("fp-hash", graph).await.unwrap();
        let outcome = engine().execute(graph, ctx, &store).await.unwrap();
        (outcome, store)
    }

    #[tokio::test]
    async fn test_unimplemented_kind_is_fatal() {
        let graph = ActionGraph::new(
            "idor_walk",
            "",
            vec![Step::new(0, Phase::Capture, StepKind::JsonExtract, "x")],
            0.5,
        );
        let store = MemoryGraphStore::new();
        let err = engine()
            .execute(&graph, &mut ctx(), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Handler(HandlerError::UnimplementedKind(_))));
    }

    #[tokio::test]
    async fn test_shell_disabled_is_fatal() {
        let graph = ActionGraph::new(
            "idor_walk",
            "",
            vec![Step::new(0, Phase::Capture, StepKind::ShellCommand, "id")],
            0.5,
        );
        let store = MemoryGraphStore::new();
        let err = engine()
            .execute(&graph, &mut ctx(), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Handler(HandlerError::ShellDisabled)));
    }

    #[tokio::test]
    async fn test_empty_graph_is_invalid() {
        let graph = ActionGraph::new("idor_walk", "", vec![], 0.5);
        let store = MemoryGraphStore::new();
        let err = engine()
            .execute(&graph, &mut ctx(), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidGraph(_)));
    }

    #[tokio::test]
    async fn test_regex_no_source_classified_systemic() {
        // First step reads previous_outputs[-1] of an empty context.
        let graph = ActionGraph::new("idor_walk", "", vec![regex_step(0, Phase::Analyze, ".*")], 0.5);
        let (outcome, _) = save_and_run(&graph, &mut ctx()).await;
        match outcome {
            RunOutcome::Failed { category, failed, .. } => {
                assert_eq!(category, FailureCategory::Systemic);
                assert_eq!(failed.error_text, "no source");
                assert_eq!(failed.order, 0);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outputs_accumulate_per_completed_step() {
        let mut c = ctx();
        c.previous_outputs.push(r#"{"token":"T"}"#.to_string());

        let extract = regex_step(1, Phase::Analyze, r#""token"\s*:\s*"([^"]+)""#)
            .with_parameter("group", json!(1));
        let graph = ActionGraph::new("idor_walk", "", vec![extract], 0.5);

        let (outcome, _) = save_and_run(&graph, &mut c).await;
        assert!(outcome.success());
        assert_eq!(c.previous_outputs, vec![r#"{"token":"T"}"#.to_string(), "T".to_string()]);
    }

    #[tokio::test]
    async fn test_matched_observe_emits_finding_and_appends_output() {
        let mut c = ctx();
        c.previous_outputs.push(r#"{"id": 2}"#.to_string());

        let observe = regex_step(1, Phase::Observe, r#""id"\s*:\s*2"#);
        let graph = ActionGraph::new("idor_walk", "", vec![observe], 0.9);

        let (outcome, store) = save_and_run(&graph, &mut c).await;
        match &outcome {
            RunOutcome::Completed { findings } => assert_eq!(findings.len(), 1),
            other => panic!("expected completion, got {other:?}"),
        }
        // Output still appended: one entry per completed step.
        assert_eq!(c.previous_outputs.len(), 2);

        let stored = store.findings_for_graph(&graph.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, outcome.findings()[0]);
    }

    #[tokio::test]
    async fn test_unmatched_observe_emits_nothing() {
        let mut c = ctx();
        c.previous_outputs.push(r#"{"id": 1}"#.to_string());

        // OBSERVE step that does not match fails with "no match" -> systemic.
        let observe = regex_step(1, Phase::Observe, r#""id"\s*:\s*999"#);
        let graph = ActionGraph::new("idor_walk", "", vec![observe], 0.9);

        let (outcome, store) = save_and_run(&graph, &mut c).await;
        assert!(!outcome.success());
        assert!(store.findings_for_graph(&graph.id).await.unwrap().is_empty());
    }
}
