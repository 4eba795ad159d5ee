//! The autonomy loop driver
//!
//! One instance per incident, driven sequentially. The model is ordered to
//! choose an action; the policy engine decides whether it runs; approval
//! and shadow simulation are suspension points; the kill switch unblocks
//! everything. Observations pass through the sanitizer before anything
//! reaches an external model, and every step feeds all four memory layers:
//! episodic (the step record), policy (rule effectiveness), economic (the
//! budget charge), and semantic (tool effectiveness per context).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::approval::{ApprovalGate, ApprovalStatus};
use crate::config::StorageConfig;
use crate::executor::{Outcome, ToolExecutor};
use crate::memory::{FinalOutcome, MemoryLayers, PolicyApplication};
use crate::outcomes::{OutcomeScorer, ScoreContext};
use crate::policy::{
    rule_ids, AgentState, DecisionKind, PolicyDecision, PolicyEngine, ProposedAction,
};
use crate::reasoning::parse::parse_proposed_action;
use crate::reasoning::{ReasoningOrchestrator, TaskType};
use crate::sanitize::Sanitizer;
use crate::shadow::ShadowRunner;
use crate::types::{ActionId, IncidentId, MemoryError, RiskLevel, RuntimeError, Severity};

use super::kill_switch::KillSwitch;
use super::trace::{CognitiveTraceWriter, ReplayBuffer};
use super::Observation;

/// Loop-level rule id for the low-model-confidence consultation override,
/// tracked in policy memory alongside the engine's rules.
const LOW_CONFIDENCE_RULE: &str = "rule_low_confidence_consultation";

/// Result of one loop tick: the policy decision, and the outcome when a
/// tool actually ran.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub decision: PolicyDecision,
    pub outcome: Option<Outcome>,
}

impl StepResult {
    fn decided(decision: PolicyDecision) -> Self {
        Self {
            decision,
            outcome: None,
        }
    }
}

/// The per-incident autonomy loop.
pub struct AutonomyLoop {
    policy: Arc<PolicyEngine>,
    orchestrator: Arc<ReasoningOrchestrator>,
    executor: Arc<dyn ToolExecutor>,
    scorer: Arc<OutcomeScorer>,
    sanitizer: Arc<Sanitizer>,
    memories: MemoryLayers,
    approval: Arc<ApprovalGate>,
    kill_switch: Arc<KillSwitch>,
    trace: CognitiveTraceWriter,
    replay: ReplayBuffer,
    state: AgentState,
    incident_id: Option<IncidentId>,
    started_at: Option<DateTime<Utc>>,
    tenant: String,
}

impl AutonomyLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: Arc<PolicyEngine>,
        orchestrator: Arc<ReasoningOrchestrator>,
        executor: Arc<dyn ToolExecutor>,
        scorer: Arc<OutcomeScorer>,
        sanitizer: Arc<Sanitizer>,
        memories: MemoryLayers,
        approval: Arc<ApprovalGate>,
        kill_switch: Arc<KillSwitch>,
        storage: &StorageConfig,
    ) -> Result<Self, RuntimeError> {
        let config = policy.config();
        let state = AgentState::new(config.environment, config.max_actions);
        register_policy_rules(&memories);
        Ok(Self {
            trace: CognitiveTraceWriter::new(storage.cognitive_trace_dir())
                .map_err(RuntimeError::Memory)?,
            replay: ReplayBuffer::new(storage.replay_buffer_dir()).map_err(RuntimeError::Memory)?,
            policy,
            orchestrator,
            executor,
            scorer,
            sanitizer,
            memories,
            approval,
            kill_switch,
            state,
            incident_id: None,
            started_at: None,
            tenant: "default".to_string(),
        })
    }

    /// Charge actions against this tenant's budget instead of the default.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    /// Reset for a new incident: fresh agent state, fresh incident memory.
    pub fn reset(&mut self, incident_id: IncidentId) {
        let config = self.policy.config();
        self.state = AgentState::new(config.environment, config.max_actions);
        self.memories.episodic.start_incident(&incident_id);
        self.started_at = Some(Utc::now());
        tracing::info!(incident = %incident_id, "autonomy loop reset");
        self.incident_id = Some(incident_id);
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn incident_id(&self) -> Option<&IncidentId> {
        self.incident_id.as_ref()
    }

    pub fn memories(&self) -> &MemoryLayers {
        &self.memories
    }

    /// Close the current incident's memory.
    pub fn close(&self, outcome: FinalOutcome) -> Result<(), RuntimeError> {
        if let Some(incident_id) = &self.incident_id {
            self.memories
                .episodic
                .close_incident(incident_id, outcome)
                .map_err(RuntimeError::Memory)?;
        }
        Ok(())
    }

    /// Build the reasoning prompt from already-sanitized observation text.
    fn build_prompt(&self, sanitized_content: &str, source: &str) -> String {
        format!(
            "SYSTEM:\n\
             You are an autonomous infrastructure agent.\n\
             Your job: choose the next action. Nothing else.\n\n\
             INPUT:\n{}\n\n\
             SOURCE: {}\n\n\
             TOOLS AVAILABLE:\n{}\n\n\
             Previous actions taken: {}\n\
             Last action failed: {}\n\n\
             OUTPUT (JSON ONLY):\n\
             {{\n  \"reasoning\": \"why this action\",\n  \"confidence\": 0-100,\n  \"tool\": \"tool_name\",\n  \"args\": {{}}\n}}",
            sanitized_content,
            source,
            self.policy.registry().describe_for_prompt(),
            self.state.actions_taken,
            self.state.last_action_failed,
        )
    }

    /// Execute one full tick of the loop.
    ///
    /// Returns the policy decision and, when a tool executed, its outcome.
    /// The only `Err` is an invariant breach, which aborts the incident.
    pub async fn run_step(&mut self, observation: &Observation) -> Result<StepResult, RuntimeError> {
        let incident_id = self
            .incident_id
            .clone()
            .ok_or_else(|| RuntimeError::Internal("reset() must be called before run_step".into()))?;

        if self.kill_switch.is_active() {
            return Ok(StepResult::decided(PolicyDecision::block(
                "Kill switch active",
            )));
        }

        // Perceive. The sanitizer is the only path to an external model:
        // the raw observation never leaves the process. Restricted content
        // is not sent at all, redacted or otherwise.
        let sanitized = self.sanitizer.sanitize(&observation.content, false);
        if sanitized.requires_approval {
            tracing::warn!(
                incident = %incident_id,
                hash = %sanitized.original_hash,
                "observation contains restricted content, not sent to model"
            );
            let decision = PolicyDecision::escalate(format!(
                "Observation contains restricted content (reference {})",
                sanitized.original_hash
            ));
            self.record_episode(observation, None, &decision, 0.0, None, None);
            return Ok(StepResult::decided(decision));
        }
        if !sanitized.redactions.is_empty() {
            tracing::info!(
                redactions = sanitized.redactions.len(),
                sensitivity = ?sanitized.sensitivity_detected,
                "observation redacted before reasoning"
            );
        }

        // Reason.
        let prompt = self.build_prompt(&sanitized.sanitized_text, &observation.source);
        let response = match self
            .orchestrator
            .generate(&prompt, TaskType::Reasoning, None)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "model call failed");
                let decision = PolicyDecision::escalate(format!("Model call failed: {}", e));
                self.record_episode(observation, None, &decision, 0.0, None, None);
                return Ok(StepResult::decided(decision));
            }
        };

        let action = match parse_proposed_action(&response.content) {
            Ok(action) => action,
            Err(e) => {
                tracing::error!(error = %e, "model proposal unusable");
                let decision = PolicyDecision::escalate(format!("Model proposal unusable: {}", e));
                self.record_episode(observation, None, &decision, 0.0, None, None);
                return Ok(StepResult::decided(decision));
            }
        };

        tracing::info!(
            tool = %action.tool,
            confidence = action.model_confidence,
            "model proposed action"
        );

        if let Err(e) = self.trace.record(
            &observation.content,
            &action.reasoning,
            action.model_confidence,
            &action,
        ) {
            tracing::error!(error = %e, "failed to store cognitive trace");
        }

        // Policy.
        let (mut decision, matched_rule) =
            self.policy.evaluate_with_rule(&action, &mut self.state)?;
        let mut applied_rule = matched_rule;

        // Low model confidence turns an ALLOW into a consultation.
        if decision.is_allow() && action.model_confidence < 70.0 {
            decision = PolicyDecision::wait_approval(format!(
                "Low confidence ({:.0}%) requires consultation",
                action.model_confidence
            ));
            applied_rule = Some(LOW_CONFIDENCE_RULE);
        }

        // Approval suspension point.
        if decision.kind() == DecisionKind::WaitApproval {
            tracing::warn!(
                reason = decision.reason(),
                incident = %incident_id,
                "waiting for approval"
            );
            let approved = self.wait_for_approval(&incident_id, &action, observation).await;

            // A human overriding the gate means the rule was bypassed; a
            // denial means it held.
            if let Some(rule) = applied_rule {
                self.record_policy_application(
                    rule,
                    if approved {
                        PolicyApplication::Bypassed
                    } else {
                        PolicyApplication::Effective
                    },
                );
            }

            if approved {
                tracing::info!("action allowed after approval");
                decision = PolicyDecision::allow("Approved by human review");
            } else {
                let decision = PolicyDecision::block("Approval denied, expired, or killed");
                self.record_episode(
                    observation,
                    Some(&action),
                    &decision,
                    action.model_confidence,
                    None,
                    None,
                );
                return Ok(StepResult::decided(decision));
            }
        }

        match decision.kind() {
            DecisionKind::Block => {
                tracing::warn!(reason = decision.reason(), "action blocked");
                if let Some(rule) = applied_rule {
                    self.record_policy_application(rule, PolicyApplication::Effective);
                }
                self.record_episode(
                    observation,
                    Some(&action),
                    &decision,
                    action.model_confidence,
                    None,
                    None,
                );
                return Ok(StepResult::decided(decision));
            }
            DecisionKind::Escalate => {
                tracing::warn!(reason = decision.reason(), "action escalated");
                self.state.escalation_count += 1;
                if let Some(rule) = applied_rule {
                    self.record_policy_application(rule, PolicyApplication::Effective);
                }
                self.record_episode(
                    observation,
                    Some(&action),
                    &decision,
                    action.model_confidence,
                    None,
                    None,
                );
                return Ok(StepResult::decided(decision));
            }
            DecisionKind::Allow | DecisionKind::WaitApproval => {}
        }

        let spec = self.policy.registry().get(&action.tool).cloned();

        // Shadow suspension point.
        if spec.as_ref().is_some_and(|s| s.shadow_before_prod) {
            if self.kill_switch.is_active() {
                return Ok(StepResult::decided(PolicyDecision::block(
                    "Kill switch active",
                )));
            }
            let risk = spec.as_ref().map_or(RiskLevel::Medium, |s| s.risk);
            let runner = ShadowRunner::new(self.executor.as_ref(), &self.scorer);
            let simulation = runner.simulate(&action.tool, &action.args, risk).await;
            if !simulation.passed() {
                let decision = PolicyDecision::block(format!(
                    "Shadow simulation failed (score {:.0}, {})",
                    simulation.score.score, simulation.score.category
                ));
                self.record_episode(
                    observation,
                    Some(&action),
                    &decision,
                    action.model_confidence,
                    None,
                    None,
                );
                return Ok(StepResult::decided(decision));
            }
            tracing::info!(tool = %action.tool, "shadow simulation passed");
        }

        // Execute.
        if self.kill_switch.is_active() {
            return Ok(StepResult::decided(PolicyDecision::block(
                "Kill switch active",
            )));
        }

        // Budget gate: the afford-check and the cost record are one atomic
        // operation, so concurrent incidents cannot oversubscribe.
        let action_id = ActionId::new();
        let severity: Severity = observation
            .metadata
            .get("severity")
            .and_then(|s| serde_json::from_value(serde_json::Value::String(s.clone())).ok())
            .unwrap_or_default();
        match self.memories.economic.charge_action(
            &self.tenant,
            &action_id.to_string(),
            &action.tool,
            0.0,
            severity,
            0.0,
        ) {
            Ok(_) => {}
            Err(MemoryError::BudgetExhausted { reason, .. }) => {
                tracing::warn!(tenant = %self.tenant, %reason, "action not affordable");
                self.state.escalation_count += 1;
                let decision = PolicyDecision::escalate(format!("Budget exhausted: {}", reason));
                self.record_episode(
                    observation,
                    Some(&action),
                    &decision,
                    action.model_confidence,
                    None,
                    None,
                );
                return Ok(StepResult::decided(decision));
            }
            Err(e) => {
                // Accounting persistence failures must not stop remediation.
                tracing::error!(error = %e, "failed to record action cost");
            }
        }

        let attempt = self
            .state
            .tool_state(&action.tool)
            .map_or(0, |t| t.usage_count)
            + 1;

        let outcome = match self.executor.execute(&action.tool, &action.args).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(tool = %action.tool, error = %e, "tool execution failed");
                Outcome::failure(e)
            }
        };

        // Score and memorize.
        self.state.actions_taken += 1;
        self.state.last_action_failed = !outcome.success;
        self.policy
            .update_tool_stats(&mut self.state, &action.tool, outcome.success);

        if let Err(e) = self.memories.semantic.learn_tool_pattern(
            &action.tool,
            &observation.source,
            outcome.success,
        ) {
            tracing::error!(error = %e, "failed to learn tool pattern");
        }

        let context = ScoreContext {
            attempt_number: attempt,
            risk_level: spec.as_ref().map_or(RiskLevel::Medium, |s| s.risk),
            environment: self.state.environment,
            historical_data_points: attempt.saturating_sub(1),
            tool_known: spec.is_some(),
        };
        let score = self.scorer.score(&outcome, &context);
        self.scorer.update_baseline(&outcome);

        self.record_episode(
            observation,
            Some(&action),
            &decision,
            action.model_confidence,
            Some(&outcome),
            Some(score.score),
        );

        if let Some(started_at) = self.started_at {
            let resolution_seconds = (Utc::now() - started_at).num_seconds();
            if let Err(e) = self.replay.record(
                &incident_id,
                &observation.content,
                &action,
                &outcome,
                resolution_seconds,
            ) {
                tracing::error!(error = %e, "failed to persist replay entry");
            }
        }

        Ok(StepResult {
            decision,
            outcome: Some(outcome),
        })
    }

    /// Drive steps until resolution, escalation, block, or kill.
    pub async fn run_until_resolved<O, R>(
        &mut self,
        mut observe_fn: O,
        mut is_resolved_fn: R,
    ) -> Result<bool, RuntimeError>
    where
        O: FnMut() -> Option<Observation>,
        R: FnMut() -> bool,
    {
        while !is_resolved_fn() {
            if self.kill_switch.is_active() {
                tracing::error!("kill switch activated, terminating loop");
                break;
            }

            let Some(observation) = observe_fn() else {
                tracing::info!("no more observations, exiting loop");
                break;
            };

            let result = self.run_step(&observation).await?;
            match result.decision.kind() {
                DecisionKind::Block | DecisionKind::Escalate => {
                    tracing::warn!(decision = %result.decision.kind(), "loop terminated by policy");
                    return Ok(false);
                }
                _ => {}
            }
        }
        Ok(is_resolved_fn())
    }

    /// Suspend until the approval gate (or the legacy file token) delivers
    /// a decision, or the kill switch fires.
    async fn wait_for_approval(
        &self,
        incident_id: &IncidentId,
        action: &ProposedAction,
        observation: &Observation,
    ) -> bool {
        let risk = self
            .policy
            .registry()
            .get(&action.tool)
            .map_or(RiskLevel::Medium, |s| s.risk);

        let mut context = HashMap::new();
        context.insert("source".to_string(), observation.source.clone());
        context.insert("environment".to_string(), self.state.environment.to_string());
        context.insert("incident".to_string(), incident_id.to_string());

        let request_id = self.approval.enqueue(incident_id, action, risk, &context);
        let mut kill_rx = self.kill_switch.subscribe();
        let mut file_poll = tokio::time::interval(Duration::from_secs(1));

        loop {
            if self.kill_switch.is_active() {
                tracing::error!("kill switch activated while waiting for approval");
                return false;
            }

            tokio::select! {
                status = self.approval.wait_for_decision(request_id) => {
                    return matches!(
                        status,
                        Ok(ApprovalStatus::Approved | ApprovalStatus::AutoApproved)
                    );
                }
                _ = kill_rx.changed() => {
                    // Re-check at the top of the loop.
                }
                _ = file_poll.tick() => {
                    if self.approval.legacy_file_approval(incident_id) {
                        tracing::info!(incident = %incident_id, "legacy approval file found, resuming");
                        return true;
                    }
                }
            }
        }
    }

    fn record_policy_application(&self, rule: &str, application: PolicyApplication) {
        if let Err(e) = self.memories.policy.record_application(rule, application) {
            tracing::error!(error = %e, rule, "failed to record policy application");
        }
    }

    fn record_episode(
        &self,
        observation: &Observation,
        action: Option<&ProposedAction>,
        decision: &PolicyDecision,
        confidence: f64,
        outcome: Option<&Outcome>,
        score: Option<f64>,
    ) {
        let Some(incident_id) = &self.incident_id else {
            return;
        };

        let mut system_state = HashMap::new();
        system_state.insert(
            "environment".to_string(),
            serde_json::json!(self.state.environment.to_string()),
        );
        system_state.insert(
            "actions_taken".to_string(),
            serde_json::json!(self.state.actions_taken),
        );
        system_state.insert(
            "escalation_count".to_string(),
            serde_json::json!(self.state.escalation_count),
        );
        if let Some(score) = score {
            system_state.insert("outcome_score".to_string(), serde_json::json!(score));
        }

        self.memories.episodic.record_episode(
            incident_id,
            &observation.content,
            system_state,
            action.cloned(),
            decision.kind(),
            confidence,
            outcome.cloned(),
        );
    }
}

/// Register the deterministic rules (and the loop's consultation override)
/// with policy memory so every application lands on a known record.
fn register_policy_rules(memories: &MemoryLayers) {
    let rules = [
        (
            rule_ids::SCHEMA_VALIDATION,
            "schema_validation",
            "Unknown tools and missing required inputs fail closed",
        ),
        (
            rule_ids::BLACKLIST,
            "risk_gate",
            "Blacklisted tools are blocked for the incident's lifetime",
        ),
        (
            rule_ids::ACTION_LIMIT,
            "action_limit",
            "Escalate once the per-incident action budget is spent",
        ),
        (
            rule_ids::PROD_BLOCK,
            "environment_block",
            "Prod-disallowed tools never run in production",
        ),
        (
            rule_ids::HIGH_RISK_APPROVAL,
            "risk_gate",
            "High and critical risk actions wait for a human",
        ),
        (
            rule_ids::FAILURE_ESCALATION,
            "failure_escalation",
            "Escalate after repeated consecutive failures",
        ),
        (
            rule_ids::MEDIUM_RISK_CONFIDENCE,
            "risk_gate",
            "Medium risk needs both model and tool confidence",
        ),
        (
            LOW_CONFIDENCE_RULE,
            "consultation",
            "Low model confidence forces a consultation",
        ),
    ];
    for (id, rule_type, description) in rules {
        if let Err(e) = memories.policy.register_policy(id, rule_type, description) {
            tracing::error!(error = %e, rule = id, "failed to register policy rule");
        }
    }
}
