//! Compilation: actor/critic refinement plus plan materialization.
//!
//! Drives the external recon agent and critic for a bounded number of
//! rounds under a cumulative token budget, then lowers the accepted plan
//! into an [`ActionGraph`] via the step-generator registry. The coordinator
//! observes agent pass/fail and token counts only; it never touches a model.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::agents::{AgentError, Critic, ReconAgent};
use crate::domain::{ActionGraph, AttackPlan, Fingerprint};
use crate::generators::{generator_for, TargetProfile};

/// Compilation failures. All are terminal for the run; none are treated as
/// systemic step failures.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("compilation token budget exhausted: spent {spent} of {budget}")]
    BudgetExhausted { spent: u64, budget: u64 },

    #[error("malformed attack plan: {0}")]
    MalformedPlan(String),

    #[error("no opportunity produced an executable step chain")]
    NoViableOpportunity,
}

/// Bounds on one compilation.
#[derive(Debug, Clone)]
pub struct CompileConfig {
    pub max_rounds: u32,
    pub token_budget: u64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            max_rounds: 3,
            token_budget: 100_000,
        }
    }
}

/// Orchestrates recon/critic rounds and materializes the result.
pub struct CompilationCoordinator {
    recon: Arc<dyn ReconAgent>,
    critic: Arc<dyn Critic>,
    config: CompileConfig,
}

impl CompilationCoordinator {
    pub fn new(recon: Arc<dyn ReconAgent>, critic: Arc<dyn Critic>, config: CompileConfig) -> Self {
        CompilationCoordinator {
            recon,
            critic,
            config,
        }
    }

    /// Compile an attack graph for `fingerprint` from `recon_context`
    /// (already enriched by the caller on the repair path).
    #[instrument(skip_all, fields(fingerprint = %fingerprint.short_hash()))]
    pub async fn compile(
        &self,
        fingerprint: &Fingerprint,
        profile: &TargetProfile,
        recon_context: &str,
    ) -> Result<ActionGraph, CompileError> {
        let mut spent: u64 = 0;
        let mut accepted_plan: Option<AttackPlan> = None;

        for round in 1..=self.config.max_rounds {
            debug!(round, spent, "compilation round started");

            let response = self.recon.produce_plan(recon_context).await?;
            spent = self.charge(spent, response.tokens_used)?;

            let verdict = self.critic.refine_plan(&response.plan).await?;
            spent = self.charge(spent, verdict.tokens_used)?;

            accepted_plan = Some(verdict.plan);
            if verdict.accepted {
                info!(round, spent, "critic accepted plan");
                break;
            }
            warn!(round, "critic rejected plan, refining");
        }

        let plan = accepted_plan.ok_or(CompileError::NoViableOpportunity)?;
        let graph = self.materialize(&plan, profile)?;
        info!(
            graph_id = %graph.id,
            vuln = %graph.vulnerability_type,
            steps = graph.steps.len(),
            tokens = spent,
            "attack graph compiled"
        );
        Ok(graph)
    }

    fn charge(&self, spent: u64, tokens: u64) -> Result<u64, CompileError> {
        let spent = spent.saturating_add(tokens);
        if spent > self.config.token_budget {
            return Err(CompileError::BudgetExhausted {
                spent,
                budget: self.config.token_budget,
            });
        }
        Ok(spent)
    }

    /// Walk opportunities in order; the first whose exploit tag has a
    /// registered generator yielding a non-empty chain wins, and the rest of
    /// the plan is discarded. Only a selected opportunity has its target
    /// validated; a malformed target elsewhere in the plan never runs and
    /// never rejects it.
    fn materialize(
        &self,
        plan: &AttackPlan,
        profile: &TargetProfile,
    ) -> Result<ActionGraph, CompileError> {
        if plan.opportunities.is_empty() {
            return Err(CompileError::MalformedPlan("plan has no opportunities".into()));
        }

        for opportunity in &plan.opportunities {
            // Selection criterion is generator existence; opportunities
            // without one are skipped, not validated.
            let Some(generator) = generator_for(opportunity.recommended_exploit) else {
                continue;
            };

            opportunity
                .validate_target()
                .map_err(|e| CompileError::MalformedPlan(e.to_string()))?;

            let steps = generator(
                &opportunity.exploit_target,
                &opportunity.observation,
                profile,
            );
            if steps.is_empty() {
                continue;
            }

            let description = if opportunity.opportunity.is_empty() {
                format!(
                    "{} against {}",
                    opportunity.recommended_exploit, opportunity.exploit_target
                )
            } else {
                opportunity.opportunity.clone()
            };

            let graph = ActionGraph::new(
                opportunity.recommended_exploit.to_string(),
                description,
                steps,
                plan.confidence,
            );
            graph
                .validate()
                .map_err(|e| CompileError::MalformedPlan(e.to_string()))?;
            return Ok(graph);
        }

        Err(CompileError::NoViableOpportunity)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::agents::{ScriptedCritic, ScriptedReconAgent};
    use crate::domain::{ExploitKind, Opportunity};
    use crate::generators::{AuthMechanism, Credentials};

    fn fingerprint() -> Fingerprint {
        Fingerprint::new("Express", "Bearer", "/api/*", BTreeSet::new(), "api")
    }

    fn profile() -> TargetProfile {
        TargetProfile {
            auth: AuthMechanism::BearerToken,
            login_path: "/rest/user/login".to_string(),
            username_field: "email".to_string(),
            password_field: "password".to_string(),
            cookie_name: None,
            token_json_path: "token".to_string(),
            csrf_field: None,
            primary: Credentials {
                username: "a@t".to_string(),
                password: "pa".to_string(),
            },
            secondary: Credentials {
                username: "b@t".to_string(),
                password: "pb".to_string(),
            },
        }
    }

    fn opportunity(kind: ExploitKind, target: &str) -> Opportunity {
        Opportunity {
            recommended_exploit: kind,
            exploit_target: target.to_string(),
            observation: "numeric ids".to_string(),
            opportunity: "adjacent records readable".to_string(),
        }
    }

    fn coordinator(
        plans: Vec<AttackPlan>,
        critic: ScriptedCritic,
        config: CompileConfig,
    ) -> CompilationCoordinator {
        CompilationCoordinator::new(
            Arc::new(ScriptedReconAgent::new(plans)),
            Arc::new(critic),
            config,
        )
    }

    #[tokio::test]
    async fn test_single_round_when_critic_accepts() {
        let plan = AttackPlan::new(vec![opportunity(ExploitKind::IdorWalk, "/api/Users/1")]);
        let recon = Arc::new(ScriptedReconAgent::new(vec![plan]));
        let critic = Arc::new(ScriptedCritic::accepting());
        let coordinator = CompilationCoordinator::new(
            recon.clone(),
            critic.clone(),
            CompileConfig::default(),
        );

        let graph = coordinator
            .compile(&fingerprint(), &profile(), "ctx")
            .await
            .unwrap();

        assert_eq!(graph.vulnerability_type, "idor_walk");
        assert_eq!(graph.steps.len(), 5);
        assert_eq!(recon.calls(), 1);
        assert_eq!(critic.calls(), 1);
    }

    #[tokio::test]
    async fn test_rounds_repeat_until_acceptance() {
        let plan = AttackPlan::new(vec![opportunity(ExploitKind::IdorWalk, "/api/Users/1")]);
        let recon = Arc::new(ScriptedReconAgent::new(vec![plan.clone(), plan.clone(), plan]));
        let critic = Arc::new(ScriptedCritic::accept_from(2));
        let coordinator = CompilationCoordinator::new(
            recon.clone(),
            critic.clone(),
            CompileConfig::default(),
        );

        coordinator
            .compile(&fingerprint(), &profile(), "ctx")
            .await
            .unwrap();
        assert_eq!(recon.calls(), 2);
        assert_eq!(critic.calls(), 2);
    }

    #[tokio::test]
    async fn test_unaccepted_final_round_still_materializes() {
        let plan = AttackPlan::new(vec![opportunity(ExploitKind::TokenSwap, "/api/Users/1")]);
        let coordinator = coordinator(
            vec![plan.clone(), plan.clone(), plan],
            ScriptedCritic::accept_from(99),
            CompileConfig::default(),
        );

        let graph = coordinator
            .compile(&fingerprint(), &profile(), "ctx")
            .await
            .unwrap();
        assert_eq!(graph.vulnerability_type, "token_swap");
    }

    #[tokio::test]
    async fn test_budget_exhaustion_mid_loop() {
        let plan = AttackPlan::new(vec![opportunity(ExploitKind::IdorWalk, "/api/Users/1")]);
        let recon = ScriptedReconAgent::new(vec![plan.clone(), plan.clone(), plan])
            .with_tokens_per_call(600);
        let critic = ScriptedCritic::accept_from(99).with_tokens_per_call(600);
        let coordinator = CompilationCoordinator::new(
            Arc::new(recon),
            Arc::new(critic),
            CompileConfig {
                max_rounds: 3,
                token_budget: 2_000,
            },
        );

        // Round 1 spends 1200; the second recon call crosses 2000.
        let err = coordinator
            .compile(&fingerprint(), &profile(), "ctx")
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::BudgetExhausted { spent: 2400, budget: 2000 }));
    }

    #[tokio::test]
    async fn test_templated_target_is_malformed_plan() {
        let plan = AttackPlan::new(vec![opportunity(ExploitKind::IdorWalk, "/api/Users/{id}")]);
        let coordinator = coordinator(vec![plan], ScriptedCritic::accepting(), CompileConfig::default());

        let err = coordinator
            .compile(&fingerprint(), &profile(), "ctx")
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::MalformedPlan(_)));
    }

    #[tokio::test]
    async fn test_empty_plan_is_malformed() {
        let coordinator = coordinator(
            vec![AttackPlan::new(vec![])],
            ScriptedCritic::accepting(),
            CompileConfig::default(),
        );

        let err = coordinator
            .compile(&fingerprint(), &profile(), "ctx")
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::MalformedPlan(_)));
    }

    #[tokio::test]
    async fn test_malformed_target_after_selection_point_is_ignored() {
        // The walk selects the first opportunity; the templated target on
        // the second is never validated and never rejects the plan.
        let plan = AttackPlan::new(vec![
            opportunity(ExploitKind::IdorWalk, "/api/Users/1"),
            opportunity(ExploitKind::TokenSwap, "/api/Users/{id}"),
        ]);
        let coordinator = coordinator(vec![plan], ScriptedCritic::accepting(), CompileConfig::default());

        let graph = coordinator
            .compile(&fingerprint(), &profile(), "ctx")
            .await
            .unwrap();
        assert_eq!(graph.vulnerability_type, "idor_walk");
    }

    #[tokio::test]
    async fn test_first_viable_opportunity_wins() {
        let plan = AttackPlan::new(vec![
            opportunity(ExploitKind::AuthStrip, "/api/Users/1"),
            opportunity(ExploitKind::IdorWalk, "/api/Users/1"),
        ]);
        let coordinator = coordinator(vec![plan], ScriptedCritic::accepting(), CompileConfig::default());

        let graph = coordinator
            .compile(&fingerprint(), &profile(), "ctx")
            .await
            .unwrap();
        assert_eq!(graph.vulnerability_type, "auth_strip");
    }
}
