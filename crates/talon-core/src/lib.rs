//! Talon Core Library
//!
//! Orchestration core of the Talon attack engine: compiles recon reasoning
//! into cached, replayable attack graphs and executes them with bounded
//! self-repair. Persistence and the CLI wrapper live in sibling crates.

pub mod agents;
pub mod classify;
pub mod compile;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod fakes;
pub mod generators;
pub mod handlers;
pub mod interpolate;
pub mod probe;
pub mod repair;
pub mod store;
pub mod telemetry;

pub use agents::{
    AgentError, Critic, CriticVerdict, PlanResponse, ReconAgent, RemoteAgentClient,
    ScriptedCritic, ScriptedReconAgent,
};
pub use classify::{classify_failure, FailureCategory};
pub use compile::{CompilationCoordinator, CompileConfig, CompileError};
pub use config::OrchestratorConfig;
pub use dispatcher::{OrchestratorError, OrchestratorResult, RunDispatcher, RunPath};
pub use domain::{
    severity_for, ActionGraph, AttackPlan, DomainError, ExecutionContext, ExploitKind, Finding,
    Fingerprint, Opportunity, Phase, Severity, Step, StepKind,
};
pub use engine::{EngineError, ExecutionEngine, FailedStep, RunOutcome};
pub use fakes::MemoryGraphStore;
pub use generators::{
    generator_for, AuthMechanism, Credentials, StepGenerator, TargetProfile,
};
pub use handlers::{HandlerError, HandlerRegistry, StepHandler, StepResult};
pub use interpolate::interpolate_parameters;
pub use probe::{fingerprint_from_capture, CaptureError, ProbeFingerprinter};
pub use repair::{enrichment_context, RepairCoordinator, RepairError};
pub use store::{GraphStore, StoreError, StoreResult};
pub use telemetry::init_tracing;

/// Talon version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
