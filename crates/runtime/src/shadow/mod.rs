//! Shadow runner
//!
//! Validates an action against a digital twin before it may touch
//! production. The same tool executor runs with `_execution_mode = "shadow"`
//! injected into its arguments; the outcome is scored under the shadow
//! environment and the simulation passes only on a clean success.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::{Outcome, ToolExecutor, EXECUTION_MODE_KEY, EXECUTION_MODE_SHADOW};
use crate::outcomes::{OutcomeCategory, OutcomeScore, OutcomeScorer, ScoreContext};
use crate::types::{Environment, RiskLevel};

/// Result of one shadow simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub outcome: Outcome,
    pub score: OutcomeScore,
    pub simulated_at: DateTime<Utc>,
}

impl SimulationResult {
    /// The simulation bar: a successful outcome scored as a success.
    pub fn passed(&self) -> bool {
        self.outcome.success && self.score.category == OutcomeCategory::Success
    }
}

/// Runs tools against the digital twin.
pub struct ShadowRunner<'a> {
    executor: &'a dyn ToolExecutor,
    scorer: &'a OutcomeScorer,
}

impl<'a> ShadowRunner<'a> {
    pub fn new(executor: &'a dyn ToolExecutor, scorer: &'a OutcomeScorer) -> Self {
        Self { executor, scorer }
    }

    /// Simulate one tool invocation.
    ///
    /// Executor errors become synthetic failure outcomes; twin teardown
    /// always runs.
    pub async fn simulate(
        &self,
        tool: &str,
        args: &serde_json::Map<String, serde_json::Value>,
        risk: RiskLevel,
    ) -> SimulationResult {
        tracing::info!(tool, "starting shadow simulation");

        self.provision_twin();

        let mut shadow_args = args.clone();
        shadow_args.insert(
            EXECUTION_MODE_KEY.to_string(),
            serde_json::json!(EXECUTION_MODE_SHADOW),
        );

        let outcome = match self.executor.execute(tool, &shadow_args).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(tool, error = %e, "simulation executor failed");
                Outcome::failure(e)
            }
        };

        let context = ScoreContext {
            attempt_number: 1,
            risk_level: risk,
            environment: Environment::Shadow,
            historical_data_points: 0,
            tool_known: true,
        };
        let score = self.scorer.score(&outcome, &context);

        self.teardown_twin();

        tracing::info!(
            tool,
            score = score.score,
            category = %score.category,
            "simulation complete"
        );

        SimulationResult {
            outcome,
            score,
            simulated_at: Utc::now(),
        }
    }

    // Twin provisioning is owned by the embedding platform; these hooks
    // mark the simulation boundary.
    fn provision_twin(&self) {
        tracing::debug!("provisioning digital twin");
    }

    fn teardown_twin(&self) {
        tracing::debug!("tearing down digital twin");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Executor that records the args it was called with.
    struct RecordingExecutor {
        outcome: Outcome,
        seen_args: Mutex<Option<serde_json::Map<String, serde_json::Value>>>,
        fail_with: Option<String>,
    }

    impl RecordingExecutor {
        fn succeeding() -> Self {
            Self {
                outcome: Outcome::success(50),
                seen_args: Mutex::new(None),
                fail_with: None,
            }
        }

        fn erroring(message: &str) -> Self {
            Self {
                outcome: Outcome::success(50),
                seen_args: Mutex::new(None),
                fail_with: Some(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for RecordingExecutor {
        async fn execute(
            &self,
            _tool_id: &str,
            args: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<Outcome, String> {
            *self.seen_args.lock() = Some(args.clone());
            match &self.fail_with {
                Some(message) => Err(message.clone()),
                None => Ok(self.outcome.clone()),
            }
        }
    }

    fn args() -> serde_json::Map<String, serde_json::Value> {
        serde_json::json!({"service": "api"})
            .as_object()
            .cloned()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn injects_shadow_execution_mode() {
        let executor = RecordingExecutor::succeeding();
        let scorer = OutcomeScorer::new();
        let runner = ShadowRunner::new(&executor, &scorer);

        let result = runner.simulate("restart_service", &args(), RiskLevel::Low).await;
        assert!(result.passed());

        let seen = executor.seen_args.lock().clone().unwrap();
        assert_eq!(seen[EXECUTION_MODE_KEY], EXECUTION_MODE_SHADOW);
        assert_eq!(seen["service"], "api");
    }

    #[tokio::test]
    async fn original_args_are_not_mutated() {
        let executor = RecordingExecutor::succeeding();
        let scorer = OutcomeScorer::new();
        let runner = ShadowRunner::new(&executor, &scorer);

        let original = args();
        let _ = runner.simulate("restart_service", &original, RiskLevel::Low).await;
        assert!(!original.contains_key(EXECUTION_MODE_KEY));
    }

    #[tokio::test]
    async fn executor_error_becomes_failed_simulation() {
        let executor = RecordingExecutor::erroring("twin unreachable");
        let scorer = OutcomeScorer::new();
        let runner = ShadowRunner::new(&executor, &scorer);

        let result = runner.simulate("rollback_deploy", &args(), RiskLevel::High).await;
        assert!(!result.passed());
        assert!(!result.outcome.success);
        assert_eq!(result.outcome.error.as_deref(), Some("twin unreachable"));
    }

    #[tokio::test]
    async fn failing_outcome_does_not_pass() {
        let executor = RecordingExecutor {
            outcome: Outcome::failure("config drift detected"),
            seen_args: Mutex::new(None),
            fail_with: None,
        };
        let scorer = OutcomeScorer::new();
        let runner = ShadowRunner::new(&executor, &scorer);

        let result = runner.simulate("apply_patch", &args(), RiskLevel::Medium).await;
        assert!(!result.passed());
        assert_ne!(result.score.category, OutcomeCategory::Success);
    }
}
