//! Typed step handlers and their dispatch registry.
//!
//! One handler per executable [`StepKind`]; dispatch is an exhaustive match
//! so adding a kind without deciding its handler is a compile error.
//! Handlers never propagate failures as `Err`; every expected failure lands
//! in [`StepResult::stderr`] for the classifier.

mod http;
mod regex_match;
mod shell;

pub use http::HttpHandler;
pub use regex_match::RegexMatchHandler;
pub use shell::ShellHandler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::domain::{ExecutionContext, Step, StepKind};

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub stdout: String,
    /// Empty on success; failure reason otherwise.
    pub stderr: String,
    /// HTTP status, or -1 for non-HTTP steps.
    pub status_code: i32,
    /// Whether the success criterion matched; meaningful for OBSERVE steps.
    pub matched: bool,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn success(&self) -> bool {
        self.stderr.is_empty() && (self.status_code == -1 || self.status_code < 400)
    }

    pub(crate) fn failed(stderr: impl Into<String>, status_code: i32, duration_ms: u64) -> Self {
        StepResult {
            stdout: String::new(),
            stderr: stderr.into(),
            status_code,
            matched: false,
            duration_ms,
        }
    }
}

/// A typed executor for one step kind.
///
/// Receives a mutable borrow of the run context for the duration of a single
/// step; it must not retain the borrow or spawn work that outlives the step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult;
}

/// Dispatch errors are fatal: the run aborts rather than silently skipping
/// a step it cannot execute.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("no handler registered for step kind {0}")]
    UnimplementedKind(StepKind),

    #[error("shell steps are disabled; set TALON_ALLOW_SHELL=1 to enable them")]
    ShellDisabled,
}

/// Startup-time map from step kind to handler.
pub struct HandlerRegistry {
    http: HttpHandler,
    shell: ShellHandler,
    regex: RegexMatchHandler,
    shell_enabled: bool,
}

impl HandlerRegistry {
    pub fn new(config: &OrchestratorConfig) -> Self {
        HandlerRegistry {
            http: HttpHandler::new(config.http_timeout_secs),
            shell: ShellHandler::new(config.shell_timeout_secs),
            regex: RegexMatchHandler::new(),
            shell_enabled: config.allow_shell,
        }
    }

    pub fn handler_for(&self, kind: StepKind) -> Result<&dyn StepHandler, HandlerError> {
        match kind {
            StepKind::HttpRequest => Ok(&self.http),
            StepKind::ShellCommand if self.shell_enabled => Ok(&self.shell),
            StepKind::ShellCommand => Err(HandlerError::ShellDisabled),
            StepKind::RegexMatch => Ok(&self.regex),
            StepKind::JsonExtract | StepKind::ResponseCompare => {
                Err(HandlerError::UnimplementedKind(kind))
            }
        }
    }
}

/// Render a JSON parameter value as header/form/env text.
pub(crate) fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Handler outputs are capped to bound per-run memory.
pub(crate) const MAX_OUTPUT_BYTES: usize = 1 << 20;

/// Truncate to the cap on a char boundary.
pub(crate) fn clip_output(text: String) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text;
    }
    let mut end = MAX_OUTPUT_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(allow_shell: bool) -> HandlerRegistry {
        let cfg = OrchestratorConfig {
            allow_shell,
            ..OrchestratorConfig::default()
        };
        HandlerRegistry::new(&cfg)
    }

    #[test]
    fn test_executable_kinds_have_handlers() {
        let reg = registry(true);
        assert!(reg.handler_for(StepKind::HttpRequest).is_ok());
        assert!(reg.handler_for(StepKind::ShellCommand).is_ok());
        assert!(reg.handler_for(StepKind::RegexMatch).is_ok());
    }

    #[test]
    fn test_reserved_kinds_rejected() {
        let reg = registry(true);
        assert!(matches!(
            reg.handler_for(StepKind::JsonExtract),
            Err(HandlerError::UnimplementedKind(StepKind::JsonExtract))
        ));
        assert!(matches!(
            reg.handler_for(StepKind::ResponseCompare),
            Err(HandlerError::UnimplementedKind(StepKind::ResponseCompare))
        ));
    }

    #[test]
    fn test_shell_gated_by_capability() {
        let reg = registry(false);
        assert!(matches!(
            reg.handler_for(StepKind::ShellCommand),
            Err(HandlerError::ShellDisabled)
        ));
    }

    #[test]
    fn test_success_requires_empty_stderr_and_ok_status() {
        let ok = StepResult {
            stdout: "body".into(),
            stderr: String::new(),
            status_code: 399,
            matched: false,
            duration_ms: 1,
        };
        assert!(ok.success());

        let non_http = StepResult { status_code: -1, ..ok.clone() };
        assert!(non_http.success());

        let client_err = StepResult { status_code: 400, ..ok.clone() };
        assert!(!client_err.success());

        let stderr_set = StepResult { stderr: "boom".into(), ..ok };
        assert!(!stderr_set.success());
    }

    #[test]
    fn test_clip_output_respects_char_boundaries() {
        let text = "é".repeat(MAX_OUTPUT_BYTES); // 2 bytes per char
        let clipped = clip_output(text);
        assert!(clipped.len() <= MAX_OUTPUT_BYTES);
        assert!(clipped.chars().all(|c| c == 'é'));
    }
}
