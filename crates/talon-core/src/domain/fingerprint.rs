//! Content-addressed target identity.
//!
//! A [`Fingerprint`] is produced once per observed target and never mutated.
//! Its `hash` is derived from the three identity fields on construction and
//! cannot be supplied by a caller: deserialization ignores any incoming
//! `hash` and re-derives it, so a stored or tampered hash can never poison
//! the graph cache.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator byte between identity fields when hashing.
const HASH_SEPARATOR: &[u8] = b"|";

/// Observed identity of a web target.
///
/// Identity is the triple `(tech_stack, auth_model, endpoint_pattern)`;
/// `security_signals`, `observation_text`, and `embedding` are descriptive
/// payload and do not participate in the hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FingerprintParts")]
pub struct Fingerprint {
    /// Detected technology stack, e.g. `"Express"`.
    pub tech_stack: String,
    /// Authentication model: `"Bearer"`, `"Basic"`, `"Cookie"`, `"Unknown"`, ...
    pub auth_model: String,
    /// Dominant endpoint shape, e.g. `"/api/*"`.
    pub endpoint_pattern: String,
    /// Short security-relevant observations (header names, quirks).
    pub security_signals: BTreeSet<String>,
    /// Human-readable recon summary, fed to the recon agent.
    pub observation_text: String,
    /// Optional sentence embedding of `observation_text` (typically 384-dim).
    pub embedding: Option<Vec<f32>>,
    hash: String,
}

impl Fingerprint {
    pub fn new(
        tech_stack: impl Into<String>,
        auth_model: impl Into<String>,
        endpoint_pattern: impl Into<String>,
        security_signals: BTreeSet<String>,
        observation_text: impl Into<String>,
    ) -> Self {
        let tech_stack = tech_stack.into();
        let auth_model = auth_model.into();
        let endpoint_pattern = endpoint_pattern.into();
        let hash = derive_hash(&tech_stack, &auth_model, &endpoint_pattern);

        Fingerprint {
            tech_stack,
            auth_model,
            endpoint_pattern,
            security_signals,
            observation_text: observation_text.into(),
            embedding: None,
            hash,
        }
    }

    /// Attach a sentence embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// The derived content hash (64-char lowercase hex).
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Short form of the hash for log lines.
    pub fn short_hash(&self) -> &str {
        &self.hash[..12.min(self.hash.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{} / {} / {}]",
            self.short_hash(),
            self.tech_stack,
            self.auth_model,
            self.endpoint_pattern
        )
    }
}

fn derive_hash(tech_stack: &str, auth_model: &str, endpoint_pattern: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tech_stack.as_bytes());
    hasher.update(HASH_SEPARATOR);
    hasher.update(auth_model.as_bytes());
    hasher.update(HASH_SEPARATOR);
    hasher.update(endpoint_pattern.as_bytes());
    hex::encode(hasher.finalize())
}

/// Wire shape of a fingerprint. Any `hash` field in the input is ignored;
/// the hash is re-derived by `From`.
#[derive(Deserialize)]
struct FingerprintParts {
    tech_stack: String,
    auth_model: String,
    endpoint_pattern: String,
    #[serde(default)]
    security_signals: BTreeSet<String>,
    #[serde(default)]
    observation_text: String,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

impl From<FingerprintParts> for Fingerprint {
    fn from(parts: FingerprintParts) -> Self {
        let mut fp = Fingerprint::new(
            parts.tech_stack,
            parts.auth_model,
            parts.endpoint_pattern,
            parts.security_signals,
            parts.observation_text,
        );
        fp.embedding = parts.embedding;
        fp
    }
}
