//! Executable attack steps and their CAMRO phase tags.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a step within the capture/analyze/mutate/replay/observe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Capture,
    Analyze,
    Mutate,
    Replay,
    Observe,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Capture => "CAPTURE",
            Phase::Analyze => "ANALYZE",
            Phase::Mutate => "MUTATE",
            Phase::Replay => "REPLAY",
            Phase::Observe => "OBSERVE",
        };
        write!(f, "{s}")
    }
}

/// Kind of executable instruction.
///
/// `JsonExtract` and `ResponseCompare` are reserved wire tags with no
/// handler; the registry rejects them as unimplemented rather than guessing
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    HttpRequest,
    ShellCommand,
    RegexMatch,
    JsonExtract,
    ResponseCompare,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepKind::HttpRequest => "HTTP_REQUEST",
            StepKind::ShellCommand => "SHELL_COMMAND",
            StepKind::RegexMatch => "REGEX_MATCH",
            StepKind::JsonExtract => "JSON_EXTRACT",
            StepKind::ResponseCompare => "RESPONSE_COMPARE",
        };
        write!(f, "{s}")
    }
}

/// A single executable instruction inside an attack graph.
///
/// `parameters` is a JSON-shaped tree with handler-specific schemas; string
/// values may carry `{{previous_outputs[N]}}` templates which the engine
/// interpolates immediately before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Position in the chain; unique and strictly increasing per graph.
    pub order: u32,
    pub phase: Phase,
    pub kind: StepKind,
    /// URL path, shell command line, or regex pattern depending on `kind`.
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Optional side-channel: handlers write their stdout here when set.
    #[serde(default)]
    pub output_file: Option<String>,
    /// Regex evaluated against the step's stdout to set `matched`.
    #[serde(default)]
    pub success_criteria: Option<String>,
    #[serde(default = "default_deterministic")]
    pub deterministic: bool,
}

fn default_deterministic() -> bool {
    true
}

impl Step {
    pub fn new(order: u32, phase: Phase, kind: StepKind, command: impl Into<String>) -> Self {
        Step {
            order,
            phase,
            kind,
            command: command.into(),
            parameters: Map::new(),
            output_file: None,
            success_criteria: None,
            deterministic: true,
        }
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_success_criteria(mut self, pattern: impl Into<String>) -> Self {
        self.success_criteria = Some(pattern.into());
        self
    }

    /// Stable node identity for persisted provenance edges.
    pub fn node_id(&self, graph_id: &str) -> String {
        format!("{}:{}", graph_id, self.order)
    }
}
