//! Per-run mutable execution state.

use std::collections::BTreeMap;

use super::fingerprint::Fingerprint;

/// State threaded through one execution run: cookies, bearer tokens, and the
/// stdout of every completed step.
///
/// Owned exclusively by the engine; handlers receive a mutable borrow for
/// the duration of a single step and may not retain it. Discarded when the
/// run ends.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Base URL relative step paths are resolved against.
    pub target_url: String,
    fingerprint: Fingerprint,
    /// Headers (name -> value) attached to every HTTP step, e.g.
    /// `Authorization -> Bearer <token>`.
    pub session_tokens: BTreeMap<String, String>,
    /// Cookie jar (name -> value) accumulated from `Set-Cookie` responses.
    pub cookies: BTreeMap<String, String>,
    /// Append-only: `previous_outputs[i]` is the stdout of the i-th step
    /// that successfully completed in this run.
    pub previous_outputs: Vec<String>,
}

impl ExecutionContext {
    pub fn new(target_url: impl Into<String>, fingerprint: Fingerprint) -> Self {
        ExecutionContext {
            target_url: target_url.into(),
            fingerprint,
            session_tokens: BTreeMap::new(),
            cookies: BTreeMap::new(),
            previous_outputs: Vec::new(),
        }
    }

    /// Read-only view of the fingerprint this run was dispatched for.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Resolve a Python-style index (`-1` is the last entry) into
    /// `previous_outputs`. Returns `None` when out of range.
    pub fn output_at(&self, index: i64) -> Option<&str> {
        resolve_index(self.previous_outputs.len(), index)
            .map(|i| self.previous_outputs[i].as_str())
    }
}

/// Python-style list index resolution shared by the regex handler and the
/// parameter interpolator.
pub(crate) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        Some(resolved as usize)
    } else {
        None
    }
}
