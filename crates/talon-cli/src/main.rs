//! Talon - graph-compiled web attack engine CLI
//!
//! One invocation resolves a fingerprint (capture export or live probe),
//! routes it through the run dispatcher, and prints the orchestrator result
//! as JSON. Exit code 0 means the engine ran to a verdict - including "the
//! attack found nothing"; non-zero is reserved for infrastructure failures
//! (store unreachable, agent credentials rejected, compilation budget).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use talon_core::{
    fingerprint_from_capture, init_tracing, AttackPlan, CompilationCoordinator, CompileConfig,
    Critic, ExecutionEngine, Fingerprint, GraphStore, HandlerRegistry, MemoryGraphStore,
    OrchestratorConfig, ProbeFingerprinter, ReconAgent, RemoteAgentClient, RunDispatcher,
    ScriptedCritic, ScriptedReconAgent, TargetProfile,
};
use talon_store::SurrealGraphStore;

#[derive(Parser)]
#[command(name = "talon")]
#[command(version = talon_core::VERSION)]
#[command(about = "Compile recon reasoning into cached, replayable attack graphs", long_about = None)]
struct Cli {
    /// Base URL of the target application
    #[arg(long, env = "TALON_TARGET_URL")]
    target: String,

    /// Target profile JSON (auth mechanism, login shape, credentials)
    #[arg(long, env = "TALON_PROFILE")]
    profile: PathBuf,

    /// Fingerprint export from the capture extractor; omit to probe live
    #[arg(long, env = "TALON_CAPTURE")]
    capture: Option<PathBuf>,

    /// Canned attack plan JSON for offline/deterministic runs
    #[arg(long, env = "TALON_PLAN_FILE")]
    plan_file: Option<PathBuf>,

    /// Agent service base URL (POST /plan, POST /refine)
    #[arg(long, env = "TALON_AGENT_URL")]
    agent_url: Option<String>,

    /// Bearer token for the agent service
    #[arg(long, env = "TALON_AGENT_TOKEN", hide_env_values = true)]
    agent_token: Option<String>,

    /// Graph store backend: "embedded" (SurrealDB) or "memory"
    #[arg(long, env = "TALON_DB", default_value = "embedded")]
    db: String,

    /// Compilation token budget override
    #[arg(long, env = "TALON_TOKEN_BUDGET")]
    token_budget: Option<u64>,

    /// Disable the self-repair path
    #[arg(long)]
    no_repair: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let mut config = OrchestratorConfig::from_env().with_target_url(&cli.target);
    if let Some(budget) = cli.token_budget {
        config.token_budget = budget;
    }
    if cli.no_repair {
        config.repair_enabled = false;
    }

    let profile = load_profile(&cli.profile)?;
    let fingerprint = resolve_fingerprint(&cli, &config).await?;
    info!(fingerprint = %fingerprint, "fingerprint resolved");

    let store = build_store(&cli.db).await?;
    let (recon, critic) = build_agents(&cli)?;

    let compile_config = CompileConfig {
        max_rounds: config.max_rounds,
        token_budget: config.token_budget,
    };
    let compiler = CompilationCoordinator::new(recon, critic, compile_config);
    let engine = ExecutionEngine::new(HandlerRegistry::new(&config));
    let dispatcher = RunDispatcher::new(store, compiler, engine, profile, config);

    let result = dispatcher
        .dispatch(fingerprint)
        .await
        .context("run failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn load_profile(path: &PathBuf) -> Result<TargetProfile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read target profile {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid target profile {}", path.display()))
}

async fn resolve_fingerprint(cli: &Cli, config: &OrchestratorConfig) -> Result<Fingerprint> {
    if let Some(capture) = &cli.capture {
        return fingerprint_from_capture(capture)
            .with_context(|| format!("cannot load capture export {}", capture.display()));
    }

    let prober = ProbeFingerprinter::new(config.insecure_probe);
    match prober.quick_fingerprint(&cli.target).await {
        Some(fingerprint) => Ok(fingerprint),
        None => bail!("target {} answered no fingerprint probes", cli.target),
    }
}

async fn build_store(backend: &str) -> Result<Arc<dyn GraphStore>> {
    match backend {
        "memory" => Ok(Arc::new(MemoryGraphStore::new())),
        "embedded" => {
            let store = SurrealGraphStore::setup_db()
                .await
                .context("graph store unavailable")?;
            Ok(Arc::new(store))
        }
        other => bail!("unknown graph store backend {other:?} (use embedded or memory)"),
    }
}

fn build_agents(cli: &Cli) -> Result<(Arc<dyn ReconAgent>, Arc<dyn Critic>)> {
    if let Some(plan_file) = &cli.plan_file {
        let plans = load_plans(plan_file)?;
        info!(plans = plans.len(), "using scripted agents from plan file");
        return Ok((
            Arc::new(ScriptedReconAgent::new(plans)),
            Arc::new(ScriptedCritic::accepting()),
        ));
    }

    if let Some(agent_url) = &cli.agent_url {
        let recon = Arc::new(RemoteAgentClient::new(agent_url, cli.agent_token.clone()));
        let critic = Arc::new(RemoteAgentClient::new(agent_url, cli.agent_token.clone()));
        return Ok((recon, critic));
    }

    bail!("no agent backend configured: set TALON_AGENT_URL or TALON_PLAN_FILE")
}

/// A plan file holds one plan or a sequence (the sequence feeds successive
/// compilations, e.g. a repair round).
fn load_plans(path: &PathBuf) -> Result<Vec<AttackPlan>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read plan file {}", path.display()))?;
    if let Ok(plans) = serde_json::from_str::<Vec<AttackPlan>>(&raw) {
        return Ok(plans);
    }
    let single: AttackPlan = serde_json::from_str(&raw)
        .with_context(|| format!("invalid plan file {}", path.display()))?;
    Ok(vec![single])
}
