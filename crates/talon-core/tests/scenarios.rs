//! End-to-end dispatcher scenarios: cold start, warm start, repair, auth
//! failure, transient retry, and budget exhaustion, all against a local mock
//! target, scripted agents, and the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talon_core::{
    ActionGraph, AttackPlan, AuthMechanism, CompilationCoordinator, CompileConfig, CompileError,
    Credentials, ExecutionEngine, ExploitKind, FailureCategory, Fingerprint, GraphStore,
    HandlerRegistry, MemoryGraphStore, Opportunity, OrchestratorConfig, OrchestratorError,
    RunDispatcher, RunPath, ScriptedCritic, ScriptedReconAgent, TargetProfile,
};

fn fingerprint() -> Fingerprint {
    Fingerprint::new(
        "Express",
        "Bearer",
        "/api/*",
        BTreeSet::new(),
        "Express API with numeric user ids",
    )
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
            username: "alice@test".to_string(),
            password: "pw-a".to_string(),
        },
        secondary: Credentials {
            username: "bob@test".to_string(),
            password: "pw-b".to_string(),
        },
    }
}

fn idor_plan(target: &str) -> AttackPlan {
    AttackPlan::new(vec![Opportunity {
        recommended_exploit: ExploitKind::IdorWalk,
        exploit_target: target.to_string(),
        observation: "sequential numeric ids".to_string(),
        opportunity: "adjacent user records readable".to_string(),
    }])
}

struct Harness {
    store: Arc<MemoryGraphStore>,
    recon: Arc<ScriptedReconAgent>,
    critic: Arc<ScriptedCritic>,
    dispatcher: RunDispatcher,
}

fn harness(target_url: &str, plans: Vec<AttackPlan>) -> Harness {
    harness_with(target_url, plans, CompileConfig::default(), true)
}

fn harness_with(
    target_url: &str,
    plans: Vec<AttackPlan>,
    compile_config: CompileConfig,
    repair_enabled: bool,
) -> Harness {
    let store = Arc::new(MemoryGraphStore::new());
    let recon = Arc::new(ScriptedReconAgent::new(plans));
    let critic = Arc::new(ScriptedCritic::accepting());

    let config = OrchestratorConfig {
        target_url: target_url.to_string(),
        repair_enabled,
        ..OrchestratorConfig::default()
    };
    let compiler = CompilationCoordinator::new(recon.clone(), critic.clone(), compile_config);
    let engine = ExecutionEngine::new(HandlerRegistry::new(&config));
    let dispatcher = RunDispatcher::new(store.clone(), compiler, engine, profile(), config);

    Harness {
        store,
        recon,
        critic,
        dispatcher,
    }
}

/// Mock target where login yields a bearer token and two user records are
/// readable with it.
async fn mount_idor_target(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/user/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "T"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Users/1"))
        .and(header("Authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Users/2"))
        .and(header("Authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 2})))
        .mount(server)
        .await;
}

// S1 - cold start, IDOR success.
#[tokio::test]
async fn test_cold_start_idor_success() {
    let server = MockServer::start().await;
    mount_idor_target(&server).await;

    let h = harness(&server.uri(), vec![idor_plan("/api/Users/1")]);
    let result = h.dispatcher.dispatch(fingerprint()).await.unwrap();

    assert_eq!(result.path, RunPath::ColdStart);
    assert!(result.compiled);
    assert!(!result.repaired);
    assert!(result.success);
    assert_eq!(result.step_count, 5);
    assert_eq!(result.findings.len(), 1);

    // Graph persisted and counters committed.
    let fp = fingerprint();
    let graph = h.store.most_recent_graph(fp.hash()).await.unwrap().unwrap();
    assert_eq!(graph.times_executed, 1);
    assert_eq!(graph.times_succeeded, 1);

    let findings = h.store.findings_for_graph(&graph.id).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].id, result.findings[0]);
}

// S2 - warm start: same fingerprint, cache hit, zero model calls.
#[tokio::test]
async fn test_warm_start_zero_model_calls() {
    let server = MockServer::start().await;
    mount_idor_target(&server).await;

    let h = harness(&server.uri(), vec![idor_plan("/api/Users/1")]);
    let cold = h.dispatcher.dispatch(fingerprint()).await.unwrap();
    assert_eq!(cold.path, RunPath::ColdStart);
    assert_eq!(h.recon.calls(), 1);

    let warm = h.dispatcher.dispatch(fingerprint()).await.unwrap();
    assert_eq!(warm.path, RunPath::WarmStart);
    assert!(!warm.compiled);
    assert!(!warm.repaired);
    assert!(warm.success);
    assert_eq!(warm.step_count, 5);

    // Neither agent ran again.
    assert_eq!(h.recon.calls(), 1);
    assert_eq!(h.critic.calls(), 1);

    // Still a single graph; counters accumulated across both runs.
    let fp = fingerprint();
    assert_eq!(h.store.graph_count(fp.hash()), 1);
    let graph = h.store.most_recent_graph(fp.hash()).await.unwrap().unwrap();
    assert_eq!(graph.times_executed, 2);
    assert_eq!(graph.times_succeeded, 2);
}

// S3 - systemic repair: the cached graph points at an endpoint that now
// 404s; repair compiles a corrected graph and re-executes from step 0.
#[tokio::test]
async fn test_systemic_failure_triggers_repair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/user/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "T"})))
        .mount(&server)
        .await;
    // The old endpoint is gone.
    Mock::given(method("GET"))
        .and(path("/api/Users/1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // The corrected endpoint works.
    Mock::given(method("GET"))
        .and(path("/api/Customers/1"))
        .and(header("Authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Customers/2"))
        .and(header("Authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 2})))
        .mount(&server)
        .await;

    // The scripted agent answers the repair compile with the corrected path.
    let h = harness(&server.uri(), vec![idor_plan("/api/Customers/1")]);

    // Seed the cache with the stale graph so the run warm-starts.
    let fp = fingerprint();
    let stale = {
        let generator = talon_core::generator_for(ExploitKind::IdorWalk).unwrap();
        ActionGraph::new(
            "idor_walk",
            "stale chain",
            generator("/api/Users/1", "", &profile()),
            0.8,
        )
    };
    h.store.save_graph(fp.hash(), &stale).await.unwrap();

    let result = h.dispatcher.dispatch(fingerprint()).await.unwrap();

    assert_eq!(result.path, RunPath::WarmStart);
    assert!(result.repaired);
    assert!(result.compiled);
    assert!(result.success);
    assert_eq!(result.findings.len(), 1);

    // A second graph exists, newer than the stale one, linked by provenance.
    assert_eq!(h.store.graph_count(fp.hash()), 2);
    let current = h.store.most_recent_graph(fp.hash()).await.unwrap().unwrap();
    assert_ne!(current.id, stale.id);
    assert!(current.created_at > stale.created_at);

    let edges = h.store.repair_edges();
    assert_eq!(edges.len(), 5);
    assert!(edges
        .iter()
        .any(|e| e.from_step == format!("{}:2", stale.id)
            && e.to_step == format!("{}:2", current.id)));

    // Counters: only the repaired graph's run was terminal.
    assert_eq!(h.store.graph(&stale.id).unwrap().times_executed, 0);
    assert_eq!(current.times_executed, 1);
    assert_eq!(current.times_succeeded, 1);
}

// S4 - auth failure is terminal; no repair, no compilation retry.
#[tokio::test]
async fn test_auth_failure_no_repair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/user/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), vec![]);

    let fp = fingerprint();
    let generator = talon_core::generator_for(ExploitKind::IdorWalk).unwrap();
    let graph = ActionGraph::new(
        "idor_walk",
        "",
        generator("/api/Users/1", "", &profile()),
        0.8,
    );
    h.store.save_graph(fp.hash(), &graph).await.unwrap();

    let result = h.dispatcher.dispatch(fingerprint()).await.unwrap();

    assert!(!result.success);
    assert!(!result.repaired);
    assert_eq!(result.failure, Some(FailureCategory::Auth));
    assert_eq!(h.recon.calls(), 0);
    assert_eq!(h.critic.calls(), 0);

    let stored = h.store.graph(&graph.id).unwrap();
    assert_eq!(stored.times_executed, 1);
    assert_eq!(stored.times_succeeded, 0);
}

// S5 - transient retry: first attempt rate-limited, retry succeeds; the run
// counts once and succeeds.
#[tokio::test]
async fn test_transient_retry_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("steady"))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), vec![]);

    let fp = fingerprint();
    let graph = ActionGraph::new(
        "namespace_probe",
        "",
        vec![talon_core::Step::new(
            0,
            talon_core::Phase::Capture,
            talon_core::StepKind::HttpRequest,
            "/api/status",
        )],
        0.5,
    );
    h.store.save_graph(fp.hash(), &graph).await.unwrap();

    let result = h.dispatcher.dispatch(fingerprint()).await.unwrap();

    assert!(result.success);
    assert!(!result.repaired);

    // Exactly one terminal transition despite two HTTP attempts.
    let stored = h.store.graph(&graph.id).unwrap();
    assert_eq!(stored.times_executed, 1);
    assert_eq!(stored.times_succeeded, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

// S6 - budget exhaustion during a cold start compile: distinct error, no
// graph persisted, no execution attempted.
#[tokio::test]
async fn test_budget_exhaustion_cold_start() {
    let server = MockServer::start().await;

    let h = harness_with(
        &server.uri(),
        vec![idor_plan("/api/Users/1"), idor_plan("/api/Users/1")],
        CompileConfig {
            max_rounds: 3,
            token_budget: 1_000,
        },
        true,
    );

    let err = h.dispatcher.dispatch(fingerprint()).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Compilation(CompileError::BudgetExhausted { .. })
    ));

    let fp = fingerprint();
    assert_eq!(h.store.graph_count(fp.hash()), 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

// Repair disabled: systemic failure is terminal with failed counters.
#[tokio::test]
async fn test_repair_disabled_systemic_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness_with(&server.uri(), vec![], CompileConfig::default(), false);

    let fp = fingerprint();
    let graph = ActionGraph::new(
        "namespace_probe",
        "",
        vec![talon_core::Step::new(
            0,
            talon_core::Phase::Capture,
            talon_core::StepKind::HttpRequest,
            "/api/gone",
        )],
        0.5,
    );
    h.store.save_graph(fp.hash(), &graph).await.unwrap();

    let result = h.dispatcher.dispatch(fingerprint()).await.unwrap();
    assert!(!result.success);
    assert!(!result.repaired);
    assert_eq!(result.failure, Some(FailureCategory::Systemic));
    assert_eq!(h.recon.calls(), 0);

    let stored = h.store.graph(&graph.id).unwrap();
    assert_eq!(stored.times_executed, 1);
    assert_eq!(stored.times_succeeded, 0);
}

// Repeated systemic failure on the repaired graph is terminal.
#[tokio::test]
async fn test_second_systemic_failure_is_terminal() {
    let server = MockServer::start().await;
    // Everything 404s, including whatever the repair compiles.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), vec![idor_plan("/api/Users/1")]);

    let fp = fingerprint();
    let graph = ActionGraph::new(
        "namespace_probe",
        "",
        vec![talon_core::Step::new(
            0,
            talon_core::Phase::Capture,
            talon_core::StepKind::HttpRequest,
            "/api/broken",
        )],
        0.5,
    );
    h.store.save_graph(fp.hash(), &graph).await.unwrap();

    let result = h.dispatcher.dispatch(fingerprint()).await.unwrap();

    assert!(!result.success);
    assert!(result.repaired);
    assert_eq!(result.failure, Some(FailureCategory::Systemic));
    // One repair attempt only: exactly one compile happened.
    assert_eq!(h.recon.calls(), 1);
    assert_eq!(h.store.graph_count(fp.hash()), 2);
}
