//! Orchestrator configuration.
//!
//! Environment variables drive the defaults so the CLI and daemon wrappers
//! share one configuration surface; flags may override individual fields.

use serde::{Deserialize, Serialize};

/// Runtime configuration for one orchestrator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Base URL of the target application.
    pub target_url: String,
    /// Cumulative model-token ceiling for one compilation.
    pub token_budget: u64,
    /// Maximum actor/critic refinement rounds.
    pub max_rounds: u32,
    /// Shell steps are an injection surface; off unless explicitly enabled.
    pub allow_shell: bool,
    /// Whether systemic failures may trigger one repair compilation.
    pub repair_enabled: bool,
    /// Default per-request HTTP timeout (seconds).
    pub http_timeout_secs: u64,
    /// Default shell step timeout (seconds).
    pub shell_timeout_secs: u64,
    /// Disable TLS verification for fingerprint probes only.
    pub insecure_probe: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            target_url: "http://localhost:3000".to_string(),
            token_budget: 100_000,
            max_rounds: 3,
            allow_shell: false,
            repair_enabled: true,
            http_timeout_secs: 30,
            shell_timeout_secs: 120,
            insecure_probe: false,
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from `TALON_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        OrchestratorConfig {
            target_url: std::env::var("TALON_TARGET_URL").unwrap_or(defaults.target_url),
            token_budget: env_parse("TALON_TOKEN_BUDGET", defaults.token_budget),
            max_rounds: env_parse("TALON_MAX_ROUNDS", defaults.max_rounds),
            allow_shell: env_flag("TALON_ALLOW_SHELL", defaults.allow_shell),
            repair_enabled: env_flag("TALON_REPAIR", defaults.repair_enabled),
            http_timeout_secs: env_parse("TALON_HTTP_TIMEOUT", defaults.http_timeout_secs),
            shell_timeout_secs: env_parse("TALON_SHELL_TIMEOUT", defaults.shell_timeout_secs),
            insecure_probe: env_flag("TALON_INSECURE_PROBE", defaults.insecure_probe),
        }
    }

    pub fn with_target_url(mut self, target_url: impl Into<String>) -> Self {
        self.target_url = target_url.into();
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_flag(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => fallback,
    }
}
