//! Self-repair on systemic failure.
//!
//! When a graph fails systemically, the failure is summarized into an
//! enrichment context, compilation re-runs with that context prepended, and
//! the repaired graph is persisted as a new entity under the same
//! fingerprint with step-level provenance edges. The broken graph is never
//! rewritten; audits can always walk the superseded chain.

use tracing::{info, instrument};

use crate::compile::{CompilationCoordinator, CompileError};
use crate::domain::{ActionGraph, Fingerprint};
use crate::engine::FailedStep;
use crate::generators::TargetProfile;
use crate::store::{GraphStore, StoreError};

/// Prior outputs quoted in the enrichment are clipped per entry.
const MAX_ENRICHMENT_OUTPUT_CHARS: usize = 200;

/// Errors from one repair attempt.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Textual failure summary handed back to the recon agent.
///
/// Shape: "step N (phase, kind) failed with ... Prior outputs: ...".
pub fn enrichment_context(failed: &FailedStep, prior_outputs: &[String]) -> String {
    let mut summary = format!(
        "Previous attack execution failed. Step {} ({}, {}) failed with {:?} (status {}).",
        failed.order, failed.phase, failed.kind, failed.error_text, failed.status_code
    );
    if prior_outputs.is_empty() {
        summary.push_str(" No prior outputs.");
    } else {
        summary.push_str(" Prior outputs:");
        for (index, output) in prior_outputs.iter().enumerate() {
            let clipped: String = output.chars().take(MAX_ENRICHMENT_OUTPUT_CHARS).collect();
            summary.push_str(&format!("\n  [{index}] {clipped}"));
        }
    }
    summary
}

/// One-shot repair: compile with enrichment, persist with provenance.
///
/// The caller re-executes the returned graph from step 0 with a fresh
/// execution context; a second systemic failure is terminal.
pub struct RepairCoordinator<'a> {
    compiler: &'a CompilationCoordinator,
    store: &'a dyn GraphStore,
}

impl<'a> RepairCoordinator<'a> {
    pub fn new(compiler: &'a CompilationCoordinator, store: &'a dyn GraphStore) -> Self {
        RepairCoordinator { compiler, store }
    }

    #[instrument(skip_all, fields(broken_graph = %broken.id, failed_order = failed.order))]
    pub async fn repair(
        &self,
        fingerprint: &Fingerprint,
        profile: &TargetProfile,
        recon_context: &str,
        failed: &FailedStep,
        prior_outputs: &[String],
        broken: &ActionGraph,
    ) -> Result<ActionGraph, RepairError> {
        let enriched = format!(
            "{}\n\n{}",
            enrichment_context(failed, prior_outputs),
            recon_context
        );

        let replacement = self
            .compiler
            .compile(fingerprint, profile, &enriched)
            .await?;
        self.store
            .save_repaired_graph(fingerprint.hash(), broken, &replacement)
            .await?;

        info!(
            replacement_graph = %replacement.id,
            "repaired graph persisted with provenance"
        );
        Ok(replacement)
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{Phase, StepKind};

    use super::*;

    fn failed_step() -> FailedStep {
        FailedStep {
            order: 2,
            phase: Phase::Mutate,
            kind: StepKind::HttpRequest,
            error_text: "HTTP 404".to_string(),
            status_code: 404,
        }
    }

    #[test]
    fn test_enrichment_names_step_and_error() {
        let text = enrichment_context(&failed_step(), &[]);
        assert!(text.contains("Step 2 (MUTATE, HTTP_REQUEST)"));
        assert!(text.contains("HTTP 404"));
        assert!(text.contains("status 404"));
        assert!(text.contains("No prior outputs"));
    }

    #[test]
    fn test_enrichment_lists_prior_outputs_clipped() {
        let outputs = vec!["short".to_string(), "y".repeat(500)];
        let text = enrichment_context(&failed_step(), &outputs);
        assert!(text.contains("[0] short"));
        assert!(text.contains("[1] "));
        // Entry 1 is clipped to the cap.
        let line = text.lines().last().unwrap();
        assert!(line.len() < 300);
    }
}
