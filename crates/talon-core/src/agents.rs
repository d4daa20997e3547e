//! External recon and critic agent interfaces.
//!
//! The core never speaks a model protocol: it consumes plans through these
//! traits and observes per-call token usage for the compilation budget.
//! Production wires [`RemoteAgentClient`] to an external agent service;
//! tests and offline runs use the scripted fakes, which also record call
//! counts so warm starts can be proven model-free.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::AttackPlan;

/// Errors from the agent boundary.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent transport error: {0}")]
    Transport(String),

    #[error("agent rejected credentials: {0}")]
    Unauthorized(String),

    #[error("agent returned an invalid plan: {0}")]
    InvalidPlan(String),
}

/// A plan plus the model tokens spent producing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResponse {
    pub plan: AttackPlan,
    #[serde(default)]
    pub tokens_used: u64,
}

/// The critic's refined plan with its embedded acceptance signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticVerdict {
    pub plan: AttackPlan,
    pub accepted: bool,
    #[serde(default)]
    pub tokens_used: u64,
}

/// Produces an [`AttackPlan`] from a textual recon context.
#[async_trait]
pub trait ReconAgent: Send + Sync {
    async fn produce_plan(&self, recon_context: &str) -> Result<PlanResponse, AgentError>;
}

/// Refines a plan and signals whether it is accepted.
#[async_trait]
pub trait Critic: Send + Sync {
    async fn refine_plan(&self, plan: &AttackPlan) -> Result<CriticVerdict, AgentError>;
}

// ---------------------------------------------------------------------------
// Scripted fakes
// ---------------------------------------------------------------------------

/// Deterministic recon agent replaying a queue of canned plans.
///
/// Each call pops the next plan; the final plan repeats once the queue is
/// drained (so a repair compile after the scripted sequence still answers).
pub struct ScriptedReconAgent {
    plans: Mutex<VecDeque<AttackPlan>>,
    last: Mutex<Option<AttackPlan>>,
    tokens_per_call: u64,
    calls: AtomicU32,
}

impl ScriptedReconAgent {
    pub fn new(plans: Vec<AttackPlan>) -> Self {
        ScriptedReconAgent {
            plans: Mutex::new(plans.into()),
            last: Mutex::new(None),
            tokens_per_call: 1_000,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    /// How many times `produce_plan` ran.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReconAgent for ScriptedReconAgent {
    async fn produce_plan(&self, recon_context: &str) -> Result<PlanResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        debug!(context_len = recon_context.len(), "scripted recon agent invoked");

        let next = self.plans.lock().unwrap().pop_front();
        let plan = match next {
            Some(plan) => {
                *self.last.lock().unwrap() = Some(plan.clone());
                plan
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AgentError::InvalidPlan("no scripted plan available".into()))?,
        };

        Ok(PlanResponse {
            plan,
            tokens_used: self.tokens_per_call,
        })
    }
}

/// Deterministic critic accepting from the `accept_from`-th call onward
/// (1-based); earlier calls return the plan unmodified but unaccepted.
pub struct ScriptedCritic {
    accept_from: u32,
    tokens_per_call: u64,
    calls: AtomicU32,
}

impl ScriptedCritic {
    pub fn accepting() -> Self {
        Self::accept_from(1)
    }

    pub fn accept_from(call: u32) -> Self {
        ScriptedCritic {
            accept_from: call.max(1),
            tokens_per_call: 500,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Critic for ScriptedCritic {
    async fn refine_plan(&self, plan: &AttackPlan) -> Result<CriticVerdict, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(CriticVerdict {
            plan: plan.clone(),
            accepted: call >= self.accept_from,
            tokens_used: self.tokens_per_call,
        })
    }
}

// ---------------------------------------------------------------------------
// Remote agent service client
// ---------------------------------------------------------------------------

/// HTTP client for an external agent service exposing `POST /plan` and
/// `POST /refine`. Transport only; prompting and model choice live on the
/// service side.
pub struct RemoteAgentClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    recon_context: &'a str,
}

#[derive(Serialize)]
struct RefineRequest<'a> {
    plan: &'a AttackPlan,
}

impl RemoteAgentClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("talon/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        RemoteAgentClient {
            base_url: base_url.into(),
            token,
            client,
        }
    }

    async fn post<Req: Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> Result<Resp, AgentError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AgentError::Unauthorized(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(AgentError::Transport(format!("HTTP {status} from {url}")));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| AgentError::InvalidPlan(e.to_string()))
    }
}

#[async_trait]
impl ReconAgent for RemoteAgentClient {
    async fn produce_plan(&self, recon_context: &str) -> Result<PlanResponse, AgentError> {
        self.post("plan", &PlanRequest { recon_context }).await
    }
}

#[async_trait]
impl Critic for RemoteAgentClient {
    async fn refine_plan(&self, plan: &AttackPlan) -> Result<CriticVerdict, AgentError> {
        self.post("refine", &RefineRequest { plan }).await
    }
}
