//! Shell step execution.
//!
//! Runs `step.command` through the platform shell with a mandatory timeout
//! and bounded output capture. Commands are compiler-generated, not
//! user-supplied; the handler does not sanitize them, which is why the
//! registry keeps this handler behind an explicit capability flag.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{clip_output, StepHandler, StepResult};
use crate::domain::{ExecutionContext, Step};

pub struct ShellHandler {
    default_timeout: Duration,
}

impl ShellHandler {
    pub fn new(default_timeout_secs: u64) -> Self {
        ShellHandler {
            default_timeout: Duration::from_secs(default_timeout_secs),
        }
    }
}

#[async_trait]
impl StepHandler for ShellHandler {
    async fn execute(&self, step: &Step, _ctx: &mut ExecutionContext) -> StepResult {
        let started = Instant::now();
        let params = &step.parameters;

        let timeout_secs = params
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_timeout.as_secs());
        if timeout_secs == 0 {
            return StepResult::failed("timeout", -1, elapsed_ms(started));
        }

        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&step.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Step env merges over the inherited process environment.
        if let Some(env) = params.get("env").and_then(Value::as_object) {
            for (name, value) in env {
                command.env(name, super::stringify(value));
            }
        }
        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            command.current_dir(cwd);
        }

        debug!(command = %step.command, timeout_secs, "running shell step");
        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            command.output(),
        )
        .await
        {
            Err(_elapsed) => return StepResult::failed("timeout", -1, elapsed_ms(started)),
            Ok(Err(err)) => {
                return StepResult::failed(format!("spawn error: {err}"), -1, elapsed_ms(started))
            }
            Ok(Ok(output)) => output,
        };

        let stdout = clip_output(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = if output.status.success() {
            String::new()
        } else {
            let captured = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if captured.is_empty() {
                format!(
                    "exit status {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                clip_output(captured)
            }
        };

        StepResult {
            stdout,
            stderr,
            status_code: -1,
            matched: false,
            duration_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
