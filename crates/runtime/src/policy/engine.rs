//! Policy engine implementation
//!
//! Rules run in a fixed order, first match wins, and every decision is
//! recorded in an in-memory decision log so it can be audited after the
//! fact. Evaluation itself never fails: malformed proposals surface as
//! BLOCK decisions. The only error path is an invariant breach on an ALLOW
//! verdict, which is a bug and aborts the incident.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;
use crate::registry::ToolRegistry;
use crate::types::{PolicyError, RiskLevel, RuntimeError};

use super::state::{AgentState, DecisionKind, PolicyDecision, ProposedAction, ToolState};

/// Stable rule identifiers, used as policy-memory keys.
pub mod rule_ids {
    pub const BLACKLIST: &str = "rule_blacklist";
    pub const ACTION_LIMIT: &str = "rule_action_limit";
    pub const PROD_BLOCK: &str = "rule_environment_block";
    pub const HIGH_RISK_APPROVAL: &str = "rule_high_risk_approval";
    pub const FAILURE_ESCALATION: &str = "rule_failure_escalation";
    pub const MEDIUM_RISK_CONFIDENCE: &str = "rule_medium_risk_confidence";
    pub const SCHEMA_VALIDATION: &str = "rule_schema_validation";
}

/// One entry in the engine's decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub tool: String,
    pub model_confidence: f64,
    pub decision: DecisionKind,
    /// The rule that produced the decision, if any rule short-circuited.
    pub matched_rule: Option<String>,
    pub actions_taken: u32,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
}

/// Deterministic policy engine.
///
/// Shared across the process behind an `Arc`; the tool registry is immutable
/// and the decision log is guarded by a short-lived lock.
pub struct PolicyEngine {
    registry: Arc<ToolRegistry>,
    config: PolicyConfig,
    decision_log: Mutex<Vec<DecisionRecord>>,
}

impl PolicyEngine {
    pub fn new(registry: Arc<ToolRegistry>, config: PolicyConfig) -> Self {
        Self {
            registry,
            config,
            decision_log: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Validate a proposal against the registry schema.
    ///
    /// Fails when the tool is unknown or any required input key is absent.
    fn validate_schema(&self, action: &ProposedAction) -> Result<(), PolicyError> {
        let spec = self
            .registry
            .get(&action.tool)
            .ok_or_else(|| PolicyError::UnknownTool(action.tool.clone()))?;

        for key in &spec.required_input_keys {
            if !action.args.contains_key(key) {
                return Err(PolicyError::MissingRequiredInput {
                    tool: action.tool.clone(),
                    input: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Evaluate a proposed action against the policy rules.
    ///
    /// Returns the decision; the only error is an invariant breach detected
    /// on an ALLOW verdict, which callers must treat as fatal for the
    /// incident.
    pub fn evaluate(
        &self,
        action: &ProposedAction,
        state: &mut AgentState,
    ) -> Result<PolicyDecision, RuntimeError> {
        self.evaluate_with_rule(action, state)
            .map(|(decision, _)| decision)
    }

    /// Evaluate and also report which rule short-circuited, so callers can
    /// feed policy memory. `None` means no rule matched (plain ALLOW).
    pub fn evaluate_with_rule(
        &self,
        action: &ProposedAction,
        state: &mut AgentState,
    ) -> Result<(PolicyDecision, Option<&'static str>), RuntimeError> {
        // Schema pre-check: unknown tools and missing inputs fail closed.
        if let Err(detail) = self.validate_schema(action) {
            tracing::warn!(tool = %action.tool, error = %detail, "schema validation failed");
            let decision = PolicyDecision::block("Schema validation failed");
            self.log_decision(action, state, &decision, Some(rule_ids::SCHEMA_VALIDATION));
            return Ok((decision, Some(rule_ids::SCHEMA_VALIDATION)));
        }

        // The registry lookup above guarantees the spec exists.
        let spec = self
            .registry
            .get(&action.tool)
            .cloned()
            .ok_or_else(|| RuntimeError::Internal("registry mutated during evaluation".into()))?;

        state
            .tool_states
            .entry(action.tool.clone())
            .or_insert_with(ToolState::default);

        let (decision, rule) = self.apply_rules(action, &spec.risk, spec.prod_allowed, state);

        if decision.is_allow() {
            // Runtime assertions: an ALLOW must never reach a blacklisted
            // tool, nor a prod-disallowed tool in production.
            let tool_state = state
                .tool_state(&action.tool)
                .ok_or_else(|| RuntimeError::Internal("tool state vanished".into()))?;
            if tool_state.is_blacklisted {
                return Err(RuntimeError::InvariantBreach(format!(
                    "policy allowed blacklisted tool '{}'",
                    action.tool
                )));
            }
            if state.environment.is_production() && !spec.prod_allowed {
                return Err(RuntimeError::InvariantBreach(format!(
                    "policy allowed non-production tool '{}' in production",
                    action.tool
                )));
            }
        }

        self.log_decision(action, state, &decision, rule);
        Ok((decision, rule))
    }

    /// The decision ladder. First match wins; each arm is independently
    /// auditable via its rule id.
    fn apply_rules(
        &self,
        action: &ProposedAction,
        risk: &RiskLevel,
        prod_allowed: bool,
        state: &AgentState,
    ) -> (PolicyDecision, Option<&'static str>) {
        let tool_state = state
            .tool_state(&action.tool)
            .cloned()
            .unwrap_or_default();

        // Rule 1: blacklisted tools are blocked outright.
        if tool_state.is_blacklisted {
            let reason = tool_state
                .blacklist_reason
                .unwrap_or_else(|| "blacklisted".to_string());
            tracing::warn!(tool = %action.tool, %reason, "blacklisted tool proposed");
            return (
                PolicyDecision::block(format!("Tool '{}' is blacklisted: {}", action.tool, reason)),
                Some(rule_ids::BLACKLIST),
            );
        }

        // Rule 2: action budget.
        if state.actions_taken >= state.max_actions {
            tracing::warn!(
                max_actions = state.max_actions,
                "action limit reached, escalating"
            );
            return (
                PolicyDecision::escalate(format!(
                    "Action limit reached ({}/{})",
                    state.actions_taken, state.max_actions
                )),
                Some(rule_ids::ACTION_LIMIT),
            );
        }

        // Rule 3: production environment gate.
        if state.environment.is_production() && !prod_allowed {
            tracing::warn!(tool = %action.tool, "tool not allowed in production");
            return (
                PolicyDecision::block(format!(
                    "Tool '{}' is not allowed in production",
                    action.tool
                )),
                Some(rule_ids::PROD_BLOCK),
            );
        }

        // Rule 4: high and critical risk require a human.
        if risk.requires_approval() && self.config.high_risk_requires_approval {
            return (
                PolicyDecision::wait_approval(format!(
                    "Tool '{}' is {} risk and waiting for approval",
                    action.tool, risk
                )),
                Some(rule_ids::HIGH_RISK_APPROVAL),
            );
        }

        // Rule 5: repeated failures escalate.
        if state.last_action_failed && state.escalation_count >= 2 {
            return (
                PolicyDecision::escalate("Multiple consecutive failures".to_string()),
                Some(rule_ids::FAILURE_ESCALATION),
            );
        }

        // Rule 6: medium risk needs both model and tool confidence.
        if *risk == RiskLevel::Medium {
            if action.model_confidence < self.config.medium_risk_min_model_confidence {
                return (
                    PolicyDecision::escalate(format!(
                        "Medium-risk tool '{}' has insufficient model confidence ({:.0})",
                        action.tool, action.model_confidence
                    )),
                    Some(rule_ids::MEDIUM_RISK_CONFIDENCE),
                );
            }
            if tool_state.confidence < self.config.medium_risk_min_tool_confidence {
                return (
                    PolicyDecision::escalate(format!(
                        "Medium-risk tool '{}' has insufficient tool confidence ({:.2})",
                        action.tool, tool_state.confidence
                    )),
                    Some(rule_ids::MEDIUM_RISK_CONFIDENCE),
                );
            }
        }

        // Rule 7: everything passed.
        tracing::debug!(tool = %action.tool, confidence = action.model_confidence, "action allowed");
        (
            PolicyDecision::allow(format!(
                "Tool '{}' allowed with model confidence {:.0}",
                action.tool, action.model_confidence
            )),
            None,
        )
    }

    /// Update tool confidence and blacklist state after an execution.
    ///
    /// The used tool is boosted on success or decayed on failure; every
    /// other registered tool decays slightly for being idle. Blacklisting is
    /// checked for all tools afterwards and the first triggering reason
    /// sticks.
    pub fn update_tool_stats(&self, state: &mut AgentState, used_tool: &str, success: bool) {
        let config = &self.config;

        let used = state.tool_state_mut(used_tool);
        used.usage_count += 1;
        used.last_used_at = Some(Utc::now());
        if success {
            used.confidence = (used.confidence * config.boost_factor).min(1.0);
        } else {
            used.failure_count += 1;
            used.confidence = (used.confidence * config.decay_factor_failed).max(config.min_confidence);
        }

        // Idle decay for every other registered tool.
        for id in self.registry.tool_ids() {
            if id == used_tool {
                continue;
            }
            let tool_state = state.tool_state_mut(id);
            tool_state.confidence =
                (tool_state.confidence * config.decay_factor_unused).max(config.min_confidence);
        }

        // Dynamic blacklist sweep. Once set, the flag never clears within
        // the incident.
        for (name, tool_state) in state.tool_states.iter_mut() {
            if tool_state.is_blacklisted {
                continue;
            }
            if tool_state.failure_count >= config.blacklist_failure_count {
                tool_state.is_blacklisted = true;
                tool_state.blacklist_reason =
                    Some(format!("Too many failures ({})", tool_state.failure_count));
            } else if tool_state.confidence <= config.blacklist_min_confidence {
                tool_state.is_blacklisted = true;
                tool_state.blacklist_reason =
                    Some(format!("Confidence too low ({:.2})", tool_state.confidence));
            }
            if tool_state.is_blacklisted {
                tracing::warn!(
                    tool = %name,
                    reason = tool_state.blacklist_reason.as_deref().unwrap_or(""),
                    "tool dynamically blacklisted"
                );
            }
        }
    }

    fn log_decision(
        &self,
        action: &ProposedAction,
        state: &AgentState,
        decision: &PolicyDecision,
        rule: Option<&'static str>,
    ) {
        self.decision_log.lock().push(DecisionRecord {
            tool: action.tool.clone(),
            model_confidence: action.model_confidence,
            decision: decision.kind(),
            matched_rule: rule.map(String::from),
            actions_taken: state.actions_taken,
            environment: state.environment.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Snapshot of the decision log.
    pub fn decision_log(&self) -> Vec<DecisionRecord> {
        self.decision_log.lock().clone()
    }
}
