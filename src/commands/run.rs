//! `opshield run` - drive one incident through the autonomy loop.
//!
//! This is a dry-run harness: tools do not touch real infrastructure.
//! Proposals come from a deterministic heuristic proposer (no external
//! model is contacted) and the executor simulates execution, so operators
//! can validate policy rules, sanitization, approval flow, and memory
//! wiring end to end.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use opshield_runtime::approval::ApprovalGate;
use opshield_runtime::autonomy::{AutonomyLoop, KillSwitch, Observation};
use opshield_runtime::executor::{Outcome, ToolExecutor};
use opshield_runtime::memory::{FinalOutcome, MemoryLayers};
use opshield_runtime::outcomes::OutcomeScorer;
use opshield_runtime::policy::{DecisionKind, PolicyEngine};
use opshield_runtime::reasoning::{ModelProvider, ModelResponse, ReasoningOrchestrator, TaskType};
use opshield_runtime::registry::{ToolRegistry, ToolSpec};
use opshield_runtime::sanitize::Sanitizer;
use opshield_runtime::types::{IncidentId, RiskLevel};

use crate::exit_codes;

/// Simulated executor: every tool call succeeds quickly unless listed in
/// `--fail-tools`.
struct DryRunExecutor {
    failing_tools: HashSet<String>,
}

#[async_trait]
impl ToolExecutor for DryRunExecutor {
    async fn execute(
        &self,
        tool_id: &str,
        _args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Outcome, String> {
        if self.failing_tools.contains(tool_id) {
            Ok(Outcome::failure(format!(
                "simulated failure of '{}'",
                tool_id
            )))
        } else {
            Ok(Outcome::success(25))
        }
    }
}

/// Deterministic proposer standing in for an external model.
///
/// Picks the tool named in the observation's `tool=` hint when present,
/// otherwise the first registered tool, always at high confidence. The
/// prompt's tool menu is parsed back, so proposals stay within the
/// registry.
struct HeuristicProposer {
    tools: Vec<String>,
}

#[async_trait]
impl ModelProvider for HeuristicProposer {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        prompt: &str,
        _task_type: TaskType,
        _temperature: f64,
        _max_tokens: Option<u32>,
    ) -> Result<ModelResponse, String> {
        let hinted = prompt
            .lines()
            .find_map(|line| line.split_once("tool=").map(|(_, t)| t.trim().to_string()))
            .filter(|tool| self.tools.iter().any(|t| t == tool));
        let tool = hinted
            .or_else(|| self.tools.first().cloned())
            .ok_or_else(|| "no tools registered".to_string())?;

        let proposal = serde_json::json!({
            "reasoning": "dry-run heuristic proposal",
            "confidence": 90,
            "tool": tool,
            "args": {},
        });
        Ok(ModelResponse {
            content: proposal.to_string(),
            tokens_used: 0,
            latency_ms: 0,
        })
    }
}

fn seed_registry() -> ToolRegistry {
    ToolRegistry::from_specs([
        ToolSpec::new("get_logs", RiskLevel::None, true)
            .with_description("Fetch recent logs for a service"),
        ToolSpec::new("run_diagnostic", RiskLevel::Low, true)
            .with_description("Run a read-only diagnostic"),
        ToolSpec::new("restart_service", RiskLevel::Low, true)
            .with_description("Restart a service"),
        ToolSpec::new("update_config", RiskLevel::Medium, true)
            .with_description("Apply a configuration change"),
        ToolSpec::new("scale_pod", RiskLevel::Medium, true)
            .with_description("Scale a deployment"),
        ToolSpec::new("rollback_deploy", RiskLevel::High, true)
            .with_description("Roll back to the previous deployment"),
    ])
}

pub async fn run(matches: &clap::ArgMatches) -> i32 {
    let config = match super::load_config(matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let incident_arg = matches
        .get_one::<String>("incident")
        .map(String::as_str)
        .unwrap_or_default();
    let incident_id = IncidentId::new(incident_arg);

    let observations_path = matches
        .get_one::<String>("observations")
        .map(String::as_str)
        .unwrap_or_default();
    let observations: Vec<Observation> = match std::fs::read_to_string(observations_path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
    {
        Ok(observations) => observations,
        Err(e) => {
            eprintln!("incident {}: failed to load observations: {}", incident_id, e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let failing_tools: HashSet<String> = matches
        .get_one::<String>("fail-tools")
        .map(|list| list.split(',').map(|t| t.trim().to_string()).collect())
        .unwrap_or_default();

    let registry = Arc::new(seed_registry());
    let policy = Arc::new(PolicyEngine::new(registry.clone(), config.policy.clone()));

    let mut orchestrator = ReasoningOrchestrator::new(config.model.clone());
    orchestrator.register_provider(Arc::new(HeuristicProposer {
        tools: registry.tool_ids().iter().map(|t| t.to_string()).collect(),
    }));

    let memories = match MemoryLayers::open(&config.storage) {
        Ok(memories) => memories,
        Err(e) => {
            eprintln!("incident {}: storage error: {}", incident_id, e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    // Seed budgets from configuration so the economic gate is live.
    if memories.economic.get_budget("default").is_none() {
        if let Err(e) = memories.economic.set_budget(
            "default",
            config.budget.daily_limit,
            config.budget.monthly_limit,
        ) {
            eprintln!("incident {}: budget error: {}", incident_id, e);
            return exit_codes::INTERNAL_ERROR;
        }
    }
    for (tenant, limits) in &config.budget.tenants {
        if let Err(e) =
            memories
                .economic
                .set_budget(tenant, limits.daily_limit, limits.monthly_limit)
        {
            eprintln!("incident {}: budget error: {}", incident_id, e);
            return exit_codes::INTERNAL_ERROR;
        }
    }

    let approval = Arc::new(ApprovalGate::new(
        config.approval.clone(),
        config.storage.approvals_dir(),
    ));
    let kill_switch = Arc::new(KillSwitch::new());

    let mut agent_loop = match AutonomyLoop::new(
        policy,
        Arc::new(orchestrator),
        Arc::new(DryRunExecutor { failing_tools }),
        Arc::new(OutcomeScorer::new()),
        Arc::new(Sanitizer::new()),
        memories,
        approval,
        kill_switch.clone(),
        &config.storage,
    ) {
        Ok(agent_loop) => agent_loop,
        Err(e) => {
            eprintln!("incident {}: {}", incident_id, e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    agent_loop.reset(incident_id.clone());

    let mut last_decision = None;
    for observation in &observations {
        match agent_loop.run_step(observation).await {
            Ok(result) => {
                println!(
                    "incident {}: {} - {}",
                    incident_id,
                    result.decision.kind(),
                    result.decision.reason()
                );
                let kind = result.decision.kind();
                last_decision = Some(kind);
                if matches!(kind, DecisionKind::Block | DecisionKind::Escalate) {
                    break;
                }
            }
            Err(e) => {
                eprintln!("incident {}: aborted: {}", incident_id, e);
                let _ = agent_loop.close(FinalOutcome::Failed);
                return exit_codes::INTERNAL_ERROR;
            }
        }
    }

    if kill_switch.is_active() {
        let _ = agent_loop.close(FinalOutcome::Failed);
        return exit_codes::KILLED;
    }

    match last_decision {
        Some(DecisionKind::Block) => {
            let _ = agent_loop.close(FinalOutcome::Failed);
            exit_codes::BLOCKED
        }
        Some(DecisionKind::Escalate) => {
            let _ = agent_loop.close(FinalOutcome::Escalated);
            exit_codes::ESCALATED
        }
        _ => {
            let _ = agent_loop.close(FinalOutcome::Resolved);
            exit_codes::RESOLVED
        }
    }
}
