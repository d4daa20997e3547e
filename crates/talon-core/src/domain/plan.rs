//! Attack plans produced by the external recon agent.
//!
//! The core never calls a model; it receives plans over this wire shape,
//! validates them, and materializes the first viable opportunity into an
//! [`crate::domain::graph::ActionGraph`].

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Known exploit tags with registered step generators.
///
/// Deserializing an unknown tag fails, which surfaces as a malformed-plan
/// compilation error rather than a guessed exploit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploitKind {
    IdorWalk,
    TokenSwap,
    AuthStrip,
    RoleTamper,
    NamespaceProbe,
}

impl std::fmt::Display for ExploitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExploitKind::IdorWalk => "idor_walk",
            ExploitKind::TokenSwap => "token_swap",
            ExploitKind::AuthStrip => "auth_strip",
            ExploitKind::RoleTamper => "role_tamper",
            ExploitKind::NamespaceProbe => "namespace_probe",
        };
        write!(f, "{s}")
    }
}

/// One attack opportunity inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub recommended_exploit: ExploitKind,
    /// Concrete URL path (no templates, no absolute URLs).
    pub exploit_target: String,
    pub observation: String,
    pub opportunity: String,
}

impl Opportunity {
    /// Enforce the agent contract: `exploit_target` must be a concrete
    /// server-relative path.
    pub fn validate_target(&self) -> Result<(), DomainError> {
        let target = &self.exploit_target;
        if !target.starts_with('/') {
            return Err(DomainError::InvalidPlan(format!(
                "exploit_target {target:?} is not a server-relative path"
            )));
        }
        if target.contains("://") {
            return Err(DomainError::InvalidPlan(format!(
                "exploit_target {target:?} is an absolute URL"
            )));
        }
        if target.contains('{') || target.contains('}') {
            return Err(DomainError::InvalidPlan(format!(
                "exploit_target {target:?} contains a placeholder"
            )));
        }
        Ok(())
    }
}

/// Ordered list of opportunities from the recon agent, refined by the critic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackPlan {
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    /// Agent-reported confidence, clamped downstream to `[0, 1]`.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl AttackPlan {
    pub fn new(opportunities: Vec<Opportunity>) -> Self {
        AttackPlan {
            opportunities,
            confidence: default_confidence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opportunity(target: &str) -> Opportunity {
        Opportunity {
            recommended_exploit: ExploitKind::IdorWalk,
            exploit_target: target.to_string(),
            observation: "sequential ids".to_string(),
            opportunity: "walk adjacent user records".to_string(),
        }
    }

    #[test]
    fn test_concrete_path_accepted() {
        assert!(opportunity("/api/Users/1").validate_target().is_ok());
    }

    #[test]
    fn test_templated_path_rejected() {
        assert!(opportunity("/api/Users/{id}").validate_target().is_err());
    }

    #[test]
    fn test_absolute_url_rejected() {
        assert!(opportunity("http://evil/api").validate_target().is_err());
        assert!(opportunity("/redirect?to=http://evil").validate_target().is_err());
    }

    #[test]
    fn test_relative_fragment_rejected() {
        assert!(opportunity("api/Users/1").validate_target().is_err());
    }

    #[test]
    fn test_unknown_exploit_tag_fails_deserialization() {
        let json = r#"{
            "recommended_exploit": "zero_day_magic",
            "exploit_target": "/api",
            "observation": "",
            "opportunity": ""
        }"#;
        assert!(serde_json::from_str::<Opportunity>(json).is_err());
    }

    #[test]
    fn test_exploit_tag_wire_format() {
        assert_eq!(
            serde_json::to_string(&ExploitKind::IdorWalk).unwrap(),
            "\"idor_walk\""
        );
        assert_eq!(ExploitKind::NamespaceProbe.to_string(), "namespace_probe");
    }

    #[test]
    fn test_plan_confidence_defaults() {
        let plan: AttackPlan = serde_json::from_str(r#"{"opportunities":[]}"#).unwrap();
        assert_eq!(plan.confidence, 0.5);
    }
}
