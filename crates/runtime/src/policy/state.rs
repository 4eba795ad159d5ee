//! Policy decision and per-incident state types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Environment;

/// The policy engine's verdict on a proposed action.
///
/// A closed sum type with an attached human-readable reason; exhaustive
/// matching at every call site is the point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PolicyDecision {
    /// The action may execute.
    Allow { reason: String },
    /// The action must not execute.
    Block { reason: String },
    /// Hand the incident to a human; the action does not execute.
    Escalate { reason: String },
    /// Suspend until a human approves or denies this action.
    WaitApproval { reason: String },
}

impl PolicyDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self::Allow {
            reason: reason.into(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self::Block {
            reason: reason.into(),
        }
    }

    pub fn escalate(reason: impl Into<String>) -> Self {
        Self::Escalate {
            reason: reason.into(),
        }
    }

    pub fn wait_approval(reason: impl Into<String>) -> Self {
        Self::WaitApproval {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::Allow { .. } => DecisionKind::Allow,
            Self::Block { .. } => DecisionKind::Block,
            Self::Escalate { .. } => DecisionKind::Escalate,
            Self::WaitApproval { .. } => DecisionKind::WaitApproval,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Allow { reason }
            | Self::Block { reason }
            | Self::Escalate { reason }
            | Self::WaitApproval { reason } => reason,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Discriminant of a [`PolicyDecision`], for logging and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Allow,
    Block,
    Escalate,
    WaitApproval,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionKind::Allow => "allow",
            DecisionKind::Block => "block",
            DecisionKind::Escalate => "escalate",
            DecisionKind::WaitApproval => "wait_approval",
        };
        write!(f, "{}", s)
    }
}

/// An action proposed by the model, after schema validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Tool id from the registry.
    pub tool: String,
    /// Tool arguments as emitted by the model.
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    /// The model's chain of thought for this choice.
    #[serde(default)]
    pub reasoning: String,
    /// Model self-reported confidence on a 0-100 scale.
    #[serde(default = "default_model_confidence", rename = "confidence")]
    pub model_confidence: f64,
}

fn default_model_confidence() -> f64 {
    100.0
}

impl ProposedAction {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: serde_json::Map::new(),
            reasoning: String::new(),
            model_confidence: default_model_confidence(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.model_confidence = confidence;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Canonical JSON of tool + args (reasoning and confidence excluded),
    /// used for reasoning-hash computation.
    pub fn canonical_json(&self) -> String {
        // serde_json::Map preserves insertion order; re-key through a BTreeMap
        // so the hash is independent of the model's argument ordering.
        let args: std::collections::BTreeMap<&String, &serde_json::Value> =
            self.args.iter().collect();
        serde_json::json!({ "args": args, "tool": self.tool }).to_string()
    }
}

/// Per-tool trust state within one incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolState {
    /// Trust scalar, clamped to [0.10, 1.00] on every update.
    pub confidence: f64,
    pub failure_count: u32,
    pub usage_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Sticky for the incident's lifetime once set.
    pub is_blacklisted: bool,
    /// The first reason that triggered blacklisting.
    pub blacklist_reason: Option<String>,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            failure_count: 0,
            usage_count: 0,
            last_used_at: None,
            is_blacklisted: false,
            blacklist_reason: None,
        }
    }
}

/// Mutable state of one incident's agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub actions_taken: u32,
    pub max_actions: u32,
    pub environment: Environment,
    pub escalation_count: u32,
    pub last_action_failed: bool,
    pub tool_states: HashMap<String, ToolState>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            actions_taken: 0,
            max_actions: 3,
            environment: Environment::Development,
            escalation_count: 0,
            last_action_failed: false,
            tool_states: HashMap::new(),
        }
    }
}

impl AgentState {
    pub fn new(environment: Environment, max_actions: u32) -> Self {
        Self {
            environment,
            max_actions,
            ..Self::default()
        }
    }

    /// Get or create the tool state for a tool id.
    pub fn tool_state_mut(&mut self, tool: &str) -> &mut ToolState {
        self.tool_states.entry(tool.to_string()).or_default()
    }

    pub fn tool_state(&self, tool: &str) -> Option<&ToolState> {
        self.tool_states.get(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_kind_and_reason_accessors() {
        let decision = PolicyDecision::block("Schema validation failed");
        assert_eq!(decision.kind(), DecisionKind::Block);
        assert_eq!(decision.reason(), "Schema validation failed");
        assert!(!decision.is_allow());
        assert!(PolicyDecision::allow("ok").is_allow());
    }

    #[test]
    fn decision_serde_is_tagged() {
        let decision = PolicyDecision::wait_approval("high risk");
        let json = serde_json::to_string(&decision).unwrap();
        assert!(json.contains("\"decision\":\"wait_approval\""));
    }

    #[test]
    fn canonical_json_is_order_independent() {
        let a = ProposedAction::new("scale_pod")
            .with_arg("replicas", serde_json::json!(3))
            .with_arg("deployment", serde_json::json!("api"));
        let b = ProposedAction::new("scale_pod")
            .with_arg("deployment", serde_json::json!("api"))
            .with_arg("replicas", serde_json::json!(3));
        assert_eq!(a.canonical_json(), b.canonical_json());
    }

    #[test]
    fn proposed_action_parses_model_json() {
        let raw = r#"{
            "reasoning": "service is flapping, restart it",
            "confidence": 95,
            "tool": "restart_service",
            "args": {"service": "api"}
        }"#;
        let action: ProposedAction = serde_json::from_str(raw).unwrap();
        assert_eq!(action.tool, "restart_service");
        assert_eq!(action.model_confidence, 95.0);
        assert_eq!(action.args["service"], "api");
    }

    #[test]
    fn default_tool_state_is_neutral() {
        let state = ToolState::default();
        assert_eq!(state.confidence, 0.5);
        assert!(!state.is_blacklisted);
        assert_eq!(state.failure_count, 0);
    }
}
