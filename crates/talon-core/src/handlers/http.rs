//! HTTP step execution.
//!
//! Sends one request per step, threading session headers and the cookie jar
//! from the execution context, and harvesting `Set-Cookie` / bearer tokens
//! back into it. Transport errors never propagate; they land in `stderr`
//! for the failure classifier.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use super::{clip_output, stringify, StepHandler, StepResult};
use crate::domain::{ExecutionContext, Step};

pub struct HttpHandler {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpHandler {
    /// TLS verification stays on; cookies are tracked in the execution
    /// context rather than a client-level store so the engine controls
    /// exactly what each step sends.
    pub fn new(default_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("talon/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        HttpHandler {
            client,
            default_timeout: Duration::from_secs(default_timeout_secs),
        }
    }
}

#[async_trait]
impl StepHandler for HttpHandler {
    async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult {
        let started = Instant::now();
        let params = &step.parameters;

        let raw_target = params
            .get("url")
            .or_else(|| params.get("path"))
            .and_then(Value::as_str)
            .unwrap_or(&step.command);
        let url = resolve_url(&ctx.target_url, raw_target);

        let method_name = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = match Method::from_bytes(method_name.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return StepResult::failed(
                    format!("invalid method {method_name:?}"),
                    -1,
                    elapsed_ms(started),
                )
            }
        };

        let timeout_secs = params
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_timeout.as_secs());
        if timeout_secs == 0 {
            return StepResult::failed("timeout", -1, elapsed_ms(started));
        }

        // Precedence: step headers override session state, so session
        // tokens and the cookie jar are inserted first and step entries
        // replace, including an explicit step-level Cookie.
        let mut header_map = HeaderMap::new();
        for (name, value) in &ctx.session_tokens {
            insert_header(&mut header_map, name, value);
        }

        let skip_cookies = params
            .get("skip_cookies")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !skip_cookies && !ctx.cookies.is_empty() {
            insert_header(&mut header_map, "cookie", &cookie_header(ctx));
        }

        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                insert_header(&mut header_map, name, &stringify(value));
            }
        }

        let mut request = self.client.request(method, &url).headers(header_map);

        if let Some(body) = params.get("body") {
            let as_json = params.get("json").and_then(Value::as_bool).unwrap_or(false);
            request = match (as_json, body) {
                (true, _) => request.json(body),
                (false, Value::Object(fields)) => {
                    let form: Vec<(String, String)> = fields
                        .iter()
                        .map(|(k, v)| (k.clone(), stringify(v)))
                        .collect();
                    request.form(&form)
                }
                (false, other) => request.body(stringify(other)),
            };
        }

        request = request.timeout(Duration::from_secs(timeout_secs));

        debug!(url = %url, "sending http step");
        let response = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                let stderr = if err.is_timeout() {
                    "timeout".to_string()
                } else {
                    format!("request error: {err}")
                };
                return StepResult::failed(stderr, -1, elapsed_ms(started));
            }
        };

        let status_code = i32::from(response.status().as_u16());

        for header in response.headers().get_all(SET_COOKIE) {
            if let Some((name, value)) = parse_set_cookie(header.to_str().unwrap_or_default()) {
                ctx.cookies.insert(name, value);
            }
        }

        let stdout = match response.text().await {
            Ok(body) => clip_output(body),
            Err(err) => {
                return StepResult::failed(
                    format!("body read error: {err}"),
                    status_code,
                    elapsed_ms(started),
                )
            }
        };

        if let Some(token_path) = params.get("extract_token_path").and_then(Value::as_str) {
            match extract_token(&stdout, token_path) {
                Some(token) => {
                    ctx.session_tokens
                        .insert("Authorization".to_string(), format!("Bearer {token}"));
                }
                None => debug!(token_path, "token path not present in response body"),
            }
        }

        if let Some(path) = &step.output_file {
            if let Err(err) = tokio::fs::write(path, &stdout).await {
                warn!(path, error = %err, "failed to write step output file");
            }
        }

        let stderr = if status_code >= 400 {
            format!("HTTP {status_code}")
        } else {
            String::new()
        };

        let matched = match evaluate_criteria(step.success_criteria.as_deref(), &stdout) {
            Ok(m) => m,
            Err(err) => {
                return StepResult::failed(err, status_code, elapsed_ms(started));
            }
        };

        StepResult {
            stdout,
            stderr,
            status_code,
            matched,
            duration_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Relative paths are resolved against the configured target base; absolute
/// URLs pass through untouched.
fn resolve_url(base: &str, target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        target.trim_start_matches('/')
    )
}

/// Insert (replace, not append) a header; invalid names or values are
/// dropped with a log line rather than failing the step.
fn insert_header(map: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            map.insert(name, value);
        }
        _ => debug!(header = name, "dropping invalid header"),
    }
}

fn cookie_header(ctx: &ExecutionContext) -> String {
    ctx.cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// First `name=value` pair of a `Set-Cookie` header; attributes discarded.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Follow a dotted path (`"authentication.token"`) through a JSON body.
fn extract_token(body: &str, path: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let mut cursor = &parsed;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    cursor.as_str().map(str::to_string)
}

fn evaluate_criteria(criteria: Option<&str>, stdout: &str) -> Result<bool, String> {
    match criteria {
        None => Ok(false),
        Some(pattern) => Regex::new(pattern)
            .map(|re| re.is_match(stdout))
            .map_err(|err| format!("invalid success_criteria: {err}")),
    }
}
