//! Model provider contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Task types for provider routing.
///
/// Each task type maps to a (primary, fallback) provider pair in the
/// orchestrator's routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Reasoning,
    Search,
    CodeGeneration,
    Code,
    TestGeneration,
    ConfigGeneration,
    RootCause,
    RiskAssessment,
    Prioritization,
    Explanation,
    CveLookup,
    StandardsCheck,
    General,
    Chat,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Reasoning => "reasoning",
            TaskType::Search => "search",
            TaskType::CodeGeneration => "code_generation",
            TaskType::Code => "code",
            TaskType::TestGeneration => "test_generation",
            TaskType::ConfigGeneration => "config_generation",
            TaskType::RootCause => "root_cause",
            TaskType::RiskAssessment => "risk_assessment",
            TaskType::Prioritization => "prioritization",
            TaskType::Explanation => "explanation",
            TaskType::CveLookup => "cve_lookup",
            TaskType::StandardsCheck => "standards_check",
            TaskType::General => "general",
            TaskType::Chat => "chat",
        };
        write!(f, "{}", s)
    }
}

/// Response from a model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub tokens_used: u32,
    pub latency_ms: u64,
}

/// A single external model provider (cloud or local).
///
/// Providers are supplied by the embedder; the runtime never constructs
/// HTTP clients itself. Availability is checked before routing so an
/// unconfigured provider is simply skipped.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider name used in the routing table (e.g. "openai").
    fn name(&self) -> &str;

    /// Whether the provider is configured and reachable.
    fn is_available(&self) -> bool;

    /// Generate a completion.
    async fn generate(
        &self,
        prompt: &str,
        task_type: TaskType,
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<ModelResponse, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskType::CveLookup).unwrap(),
            "\"cve_lookup\""
        );
        let back: TaskType = serde_json::from_str("\"risk_assessment\"").unwrap();
        assert_eq!(back, TaskType::RiskAssessment);
    }

    #[test]
    fn task_type_display_matches_serde() {
        assert_eq!(TaskType::CodeGeneration.to_string(), "code_generation");
        assert_eq!(TaskType::Chat.to_string(), "chat");
    }
}
