//! Regex step execution.
//!
//! Matches `step.command` (the pattern) against a prior step's output and
//! extracts a capture group. Performs no I/O.

use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::{StepHandler, StepResult};
use crate::domain::{ExecutionContext, Step};

#[derive(Default)]
pub struct RegexMatchHandler;

impl RegexMatchHandler {
    pub fn new() -> Self {
        RegexMatchHandler
    }
}

#[async_trait]
impl StepHandler for RegexMatchHandler {
    async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult {
        let started = Instant::now();
        let params = &step.parameters;

        // `source` is "last", or an integer with Python-style indexing
        // (-1 is the most recent output). Default: last.
        let source_index = match params.get("source") {
            None => -1,
            Some(Value::String(s)) if s == "last" => -1,
            Some(Value::String(s)) => match s.parse::<i64>() {
                Ok(idx) => idx,
                Err(_) => {
                    return StepResult::failed(
                        format!("invalid source {s:?}"),
                        -1,
                        elapsed_ms(started),
                    )
                }
            },
            Some(Value::Number(n)) => match n.as_i64() {
                Some(idx) => idx,
                None => {
                    return StepResult::failed(
                        format!("invalid source {n}"),
                        -1,
                        elapsed_ms(started),
                    )
                }
            },
            Some(other) => {
                return StepResult::failed(
                    format!("invalid source {other}"),
                    -1,
                    elapsed_ms(started),
                )
            }
        };

        let Some(text) = ctx.output_at(source_index).map(str::to_string) else {
            return StepResult::failed("no source", -1, elapsed_ms(started));
        };

        let group = params
            .get("group")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let pattern = match Regex::new(&step.command) {
            Ok(re) => re,
            Err(err) => {
                return StepResult::failed(
                    format!("invalid pattern: {err}"),
                    -1,
                    elapsed_ms(started),
                )
            }
        };

        match pattern.captures(&text) {
            None => StepResult::failed("no match", -1, elapsed_ms(started)),
            Some(captures) => match captures.get(group) {
                None => StepResult::failed(
                    format!("no capture group {group}"),
                    -1,
                    elapsed_ms(started),
                ),
                Some(matched) => StepResult {
                    stdout: matched.as_str().to_string(),
                    stderr: String::new(),
                    status_code: -1,
                    matched: true,
                    duration_ms: elapsed_ms(started),
                },
            },
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::domain::{Fingerprint, Phase, StepKind};

    fn ctx_with(outputs: &[&str]) -> ExecutionContext {
        let fp = Fingerprint::new("Express", "Bearer", "/api/*", BTreeSet::new(), "");
        let mut ctx = ExecutionContext::new("http://localhost", fp);
        ctx.previous_outputs = outputs.iter().map(|s| s.to_string()).collect();
        ctx
    }

    fn regex_step(pattern: &str) -> Step {
        Step::new(1, Phase::Analyze, StepKind::RegexMatch, pattern)
    }

    #[tokio::test]
    async fn test_extracts_capture_group() {
        let handler = RegexMatchHandler::new();
        let step = regex_step(r#""token"\s*:\s*"([^"]+)""#)
            .with_parameter("source", json!("last"))
            .with_parameter("group", json!(1));
        let mut ctx = ctx_with(&[r#"{"token":"T-42"}"#]);

        let result = handler.execute(&step, &mut ctx).await;
        assert!(result.success());
        assert!(result.matched);
        assert_eq!(result.stdout, "T-42");
    }

    #[tokio::test]
    async fn test_group_zero_is_whole_match() {
        let handler = RegexMatchHandler::new();
        let step = regex_step(r"\d+");
        let mut ctx = ctx_with(&["answer is 42"]);

        let result = handler.execute(&step, &mut ctx).await;
        assert_eq!(result.stdout, "42");
    }

    #[tokio::test]
    async fn test_integer_source_indexing() {
        let handler = RegexMatchHandler::new();
        let step = regex_step("first").with_parameter("source", json!(0));
        let mut ctx = ctx_with(&["first output", "second output"]);

        let result = handler.execute(&step, &mut ctx).await;
        assert!(result.matched);
    }

    #[tokio::test]
    async fn test_no_match_reported() {
        let handler = RegexMatchHandler::new();
        let step = regex_step("absent");
        let mut ctx = ctx_with(&["some text"]);

        let result = handler.execute(&step, &mut ctx).await;
        assert!(!result.success());
        assert_eq!(result.stderr, "no match");
        assert!(!result.matched);
    }

    #[tokio::test]
    async fn test_empty_outputs_is_no_source() {
        let handler = RegexMatchHandler::new();
        let step = regex_step(".*");
        let mut ctx = ctx_with(&[]);

        let result = handler.execute(&step, &mut ctx).await;
        assert_eq!(result.stderr, "no source");
    }

    #[tokio::test]
    async fn test_out_of_range_source_is_no_source() {
        let handler = RegexMatchHandler::new();
        let step = regex_step(".*").with_parameter("source", json!(5));
        let mut ctx = ctx_with(&["only one"]);

        let result = handler.execute(&step, &mut ctx).await;
        assert_eq!(result.stderr, "no source");
    }

    #[tokio::test]
    async fn test_invalid_pattern_reported() {
        let handler = RegexMatchHandler::new();
        let step = regex_step("(unclosed");
        let mut ctx = ctx_with(&["text"]);

        let result = handler.execute(&step, &mut ctx).await;
        assert!(result.stderr.starts_with("invalid pattern"));
    }

    #[tokio::test]
    async fn test_missing_capture_group_reported() {
        let handler = RegexMatchHandler::new();
        let step = regex_step("(a)").with_parameter("group", json!(3));
        let mut ctx = ctx_with(&["a"]);

        let result = handler.execute(&step, &mut ctx).await;
        assert_eq!(result.stderr, "no capture group 3");
    }
}
