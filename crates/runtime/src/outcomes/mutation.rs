//! Mutation engine
//!
//! When a tool fails, propose a modified invocation instead of giving up:
//! double timeouts on timeout failures, retry transient failures unchanged,
//! and for validation failures optionally ask a model to rewrite the
//! arguments. A model rewrite is accepted only if it decodes to a JSON
//! object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::reasoning::parse::extract_json_object;
use crate::types::Environment;

use super::classifier::{FailureClassifier, FailureType};

/// Strategy the mutation engine applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStrategy {
    None,
    SimpleRetry,
    TimeoutIncrease,
    ModelCorrection,
}

/// Result of a mutation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResult {
    pub should_retry: bool,
    pub new_args: serde_json::Map<String, serde_json::Value>,
    pub strategy: MutationStrategy,
    pub reason: String,
}

impl MutationResult {
    fn no_retry(reason: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            new_args: serde_json::Map::new(),
            strategy: MutationStrategy::None,
            reason: reason.into(),
        }
    }
}

/// Model hook used for validation-failure repair.
#[async_trait]
pub trait RewriteModel: Send + Sync {
    /// Ask the model to rewrite failing arguments; returns raw model text.
    async fn rewrite(&self, prompt: &str) -> Result<String, String>;
}

/// Proposes mutated arguments for failed tool executions.
pub struct MutationEngine {
    classifier: FailureClassifier,
}

impl Default for MutationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationEngine {
    pub fn new() -> Self {
        Self {
            classifier: FailureClassifier::new(),
        }
    }

    /// Suggest a mutation for a failed tool execution.
    pub async fn mutate(
        &self,
        tool: &str,
        original_args: &serde_json::Map<String, serde_json::Value>,
        error: &str,
        attempt: u32,
        environment: Environment,
        model: Option<&dyn RewriteModel>,
    ) -> MutationResult {
        let classification = self
            .classifier
            .classify(error, environment, attempt.saturating_sub(1));

        if !classification.is_recoverable && attempt > 1 {
            return MutationResult::no_retry("failure classified as non-recoverable");
        }

        match classification.failure_type {
            FailureType::Timeout | FailureType::Transient => {
                if !self.classifier.should_retry(&classification, attempt) {
                    return MutationResult::no_retry(format!(
                        "max retries reached for {}",
                        classification.failure_type
                    ));
                }

                if classification.failure_type == FailureType::Timeout {
                    if let Some(doubled) = double_timeout_arg(original_args) {
                        return MutationResult {
                            should_retry: true,
                            new_args: doubled,
                            strategy: MutationStrategy::TimeoutIncrease,
                            reason: "increased timeout after timeout failure".into(),
                        };
                    }
                }

                MutationResult {
                    should_retry: true,
                    new_args: original_args.clone(),
                    strategy: MutationStrategy::SimpleRetry,
                    reason: "transient failure, retrying unchanged".into(),
                }
            }
            FailureType::Validation => {
                // Validation failures are only retried when a model can
                // repair the arguments.
                let Some(model) = model else {
                    return MutationResult::no_retry("validation failure and no rewrite model");
                };

                let prompt = format!(
                    "The tool '{}' failed with the following error:\n{}\n\n\
                     The arguments used were:\n{}\n\n\
                     Correct the arguments to fix the error. \
                     Return ONLY the JSON of the new arguments.",
                    tool,
                    error,
                    serde_json::Value::Object(original_args.clone())
                );

                match model.rewrite(&prompt).await {
                    Ok(response) => match extract_json_object(&response) {
                        Some(new_args) => MutationResult {
                            should_retry: true,
                            new_args,
                            strategy: MutationStrategy::ModelCorrection,
                            reason: "model suggested parameter fix".into(),
                        },
                        None => {
                            MutationResult::no_retry("model response did not decode to a JSON object")
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "model mutation failed");
                        MutationResult::no_retry(format!("rewrite model failed: {}", e))
                    }
                }
            }
            _ => MutationResult::no_retry("no mutation strategy for this failure type"),
        }
    }
}

/// Double a numeric or numeric-string `timeout` argument, if present.
fn double_timeout_arg(
    args: &serde_json::Map<String, serde_json::Value>,
) -> Option<serde_json::Map<String, serde_json::Value>> {
    let current = args.get("timeout")?;
    let doubled = match current {
        serde_json::Value::Number(n) => {
            let value = n.as_u64()?;
            serde_json::json!(value * 2)
        }
        serde_json::Value::String(s) => {
            let value: u64 = s.parse().ok()?;
            serde_json::json!((value * 2).to_string())
        }
        _ => return None,
    };
    let mut new_args = args.clone();
    new_args.insert("timeout".to_string(), doubled);
    Some(new_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedModel(String);

    #[async_trait]
    impl RewriteModel for FixedModel {
        async fn rewrite(&self, _prompt: &str) -> Result<String, String> {
            Ok(self.0.clone())
        }
    }

    fn args(json: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        json.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn timeout_failure_doubles_timeout_arg() {
        let engine = MutationEngine::new();
        let original = args(serde_json::json!({"timeout": 30, "service": "api"}));
        let result = engine
            .mutate("run_diagnostic", &original, "operation timed out", 1, Environment::Development, None)
            .await;
        assert!(result.should_retry);
        assert_eq!(result.strategy, MutationStrategy::TimeoutIncrease);
        assert_eq!(result.new_args["timeout"], 60);
        assert_eq!(result.new_args["service"], "api");
    }

    #[tokio::test]
    async fn timeout_without_timeout_arg_retries_unchanged() {
        let engine = MutationEngine::new();
        let original = args(serde_json::json!({"service": "api"}));
        let result = engine
            .mutate("run_diagnostic", &original, "deadline exceeded", 1, Environment::Development, None)
            .await;
        assert!(result.should_retry);
        assert_eq!(result.strategy, MutationStrategy::SimpleRetry);
        assert_eq!(result.new_args, original);
    }

    #[tokio::test]
    async fn transient_failure_retries_unchanged() {
        let engine = MutationEngine::new();
        let original = args(serde_json::json!({"service": "api"}));
        let result = engine
            .mutate("restart_service", &original, "connection refused", 2, Environment::Development, None)
            .await;
        assert!(result.should_retry);
        assert_eq!(result.strategy, MutationStrategy::SimpleRetry);
    }

    #[tokio::test]
    async fn retries_exhaust_after_third_attempt() {
        let engine = MutationEngine::new();
        let original = args(serde_json::json!({}));
        let result = engine
            .mutate("restart_service", &original, "connection refused", 3, Environment::Development, None)
            .await;
        assert!(!result.should_retry);
    }

    #[tokio::test]
    async fn validation_failure_without_model_does_not_retry() {
        let engine = MutationEngine::new();
        let original = args(serde_json::json!({"replicas": "three"}));
        let result = engine
            .mutate("scale_pod", &original, "invalid value for replicas", 1, Environment::Development, None)
            .await;
        assert!(!result.should_retry);
        assert_eq!(result.strategy, MutationStrategy::None);
    }

    #[tokio::test]
    async fn validation_failure_with_model_accepts_json_object() {
        let engine = MutationEngine::new();
        let model = FixedModel("```json\n{\"replicas\": 3}\n```".into());
        let original = args(serde_json::json!({"replicas": "three"}));
        let result = engine
            .mutate(
                "scale_pod",
                &original,
                "invalid value for replicas",
                1,
                Environment::Development,
                Some(&model),
            )
            .await;
        assert!(result.should_retry);
        assert_eq!(result.strategy, MutationStrategy::ModelCorrection);
        assert_eq!(result.new_args["replicas"], 3);
    }

    #[tokio::test]
    async fn validation_failure_rejects_non_json_model_output() {
        let engine = MutationEngine::new();
        let model = FixedModel("I think you should use a number instead.".into());
        let original = args(serde_json::json!({"replicas": "three"}));
        let result = engine
            .mutate(
                "scale_pod",
                &original,
                "invalid value for replicas",
                1,
                Environment::Development,
                Some(&model),
            )
            .await;
        assert!(!result.should_retry);
    }

    #[tokio::test]
    async fn permission_failure_never_retries() {
        let engine = MutationEngine::new();
        let result = engine
            .mutate("apply_patch", &args(serde_json::json!({})), "permission denied", 1, Environment::Development, None)
            .await;
        assert!(!result.should_retry);
    }

    #[test]
    fn double_timeout_handles_string_values() {
        let original = args(serde_json::json!({"timeout": "45"}));
        let doubled = double_timeout_arg(&original).unwrap();
        assert_eq!(doubled["timeout"], "90");

        let bad = args(serde_json::json!({"timeout": true}));
        assert!(double_timeout_arg(&bad).is_none());
    }
}
