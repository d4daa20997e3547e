//! Fingerprint sources.
//!
//! `quick_fingerprint` derives a target identity live from up to three
//! deterministic probe requests; `fingerprint_from_capture` loads the
//! fingerprint document exported by the external capture extractor. Both
//! feed the same content-addressed [`Fingerprint`], so cache identity does
//! not depend on how the target was observed.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, SET_COOKIE, WWW_AUTHENTICATE};
use tracing::{debug, info, warn};

use crate::domain::Fingerprint;

/// Fixed probe order keeps the derived fingerprint stable across runs.
const PROBE_PATHS: [&str; 3] = ["/", "/api/", "/rest/"];

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Header names recorded as security signals when present.
const SIGNAL_HEADERS: [&str; 5] = [
    "content-security-policy",
    "strict-transport-security",
    "x-content-type-options",
    "x-frame-options",
    "x-xss-protection",
];

/// Errors loading an exported capture fingerprint.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot read capture export {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capture export is not a fingerprint document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load the fingerprint document exported by the capture-side extractor.
/// Any `hash` field in the document is ignored and re-derived.
pub fn fingerprint_from_capture(path: &Path) -> Result<Fingerprint, CaptureError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CaptureError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let fingerprint = serde_json::from_str(&raw)?;
    Ok(fingerprint)
}

/// Live probe fingerprinter.
///
/// `insecure` disables TLS verification for the probe client only; the
/// attack execution client always verifies.
pub struct ProbeFingerprinter {
    client: reqwest::Client,
}

impl ProbeFingerprinter {
    pub fn new(insecure: bool) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("talon/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(insecure)
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        ProbeFingerprinter { client }
    }

    /// Issue up to 3 deterministic GET probes and derive a fingerprint.
    /// Returns `None` when the target answers none of them.
    pub async fn quick_fingerprint(&self, target_url: &str) -> Option<Fingerprint> {
        let base = target_url.trim_end_matches('/');

        let mut tech_stack: Option<String> = None;
        let mut auth_model: Option<String> = None;
        let mut endpoint_pattern: Option<String> = None;
        let mut signals = BTreeSet::new();
        let mut observations = Vec::new();
        let mut answered = false;

        for path in PROBE_PATHS {
            let url = format!("{base}{path}");
            let response = match self.client.get(&url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    debug!(url, error = %err, "probe failed");
                    continue;
                }
            };
            answered = true;

            let status = response.status().as_u16();
            let headers = response.headers();

            if tech_stack.is_none() {
                tech_stack = detect_tech(headers);
            }
            if auth_model.is_none() {
                auth_model = detect_auth(headers);
            }
            let is_json = headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("json"))
                .unwrap_or(false);
            if endpoint_pattern.is_none() && path != "/" && status != 404 && is_json {
                endpoint_pattern = Some(format!("{path}*"));
            }
            collect_signals(headers, &mut signals);
            observations.push(format!(
                "GET {path} -> {status}{}",
                if is_json { " (json)" } else { "" }
            ));
        }

        if !answered {
            warn!(target_url, "target answered no probes");
            return None;
        }

        let fingerprint = Fingerprint::new(
            tech_stack.unwrap_or_else(|| "Unknown".to_string()),
            auth_model.unwrap_or_else(|| "Unknown".to_string()),
            endpoint_pattern.unwrap_or_else(|| "/*".to_string()),
            signals,
            observations.join("; "),
        );
        info!(fingerprint = %fingerprint, "live fingerprint derived");
        Some(fingerprint)
    }
}

fn detect_tech(headers: &HeaderMap) -> Option<String> {
    for header in ["x-powered-by", "server"] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            // "Express/4.17.1" -> "Express"
            let name = value.split(['/', ' ']).next().unwrap_or(value).trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn detect_auth(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(WWW_AUTHENTICATE).and_then(|v| v.to_str().ok()) {
        let scheme = value.split_whitespace().next().unwrap_or(value);
        return Some(scheme.to_string());
    }
    if headers.contains_key(SET_COOKIE) {
        return Some("Cookie".to_string());
    }
    None
}

fn collect_signals(headers: &HeaderMap, signals: &mut BTreeSet<String>) {
    for name in SIGNAL_HEADERS {
        if headers.contains_key(name) {
            signals.insert(name.to_string());
        }
    }
}
