//! Reasoning orchestrator
//!
//! Routes reasoning requests to the right provider per task type, with a
//! fallback provider and an emergency any-available sweep. Every call is
//! bounded by a per-provider timeout; the local provider gets a longer one
//! because it may be paging in weights.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ModelConfig;
use crate::types::ReasoningError;

use super::provider::{ModelProvider, ModelResponse, TaskType};

/// Name of the local provider, which uses the longer timeout.
const LOCAL_PROVIDER: &str = "local";

/// Routing table: task type → (primary, fallback) provider names.
fn route_for(task_type: TaskType) -> (&'static str, &'static str) {
    match task_type {
        TaskType::Reasoning
        | TaskType::RootCause
        | TaskType::RiskAssessment
        | TaskType::Prioritization
        | TaskType::Explanation => ("openai", "claude"),
        TaskType::CveLookup | TaskType::StandardsCheck | TaskType::Search => ("gemini", "openai"),
        TaskType::CodeGeneration
        | TaskType::Code
        | TaskType::TestGeneration
        | TaskType::ConfigGeneration => ("claude", "openai"),
        TaskType::General => ("openai", "gemini"),
        TaskType::Chat => ("openai", LOCAL_PROVIDER),
    }
}

/// Routes reasoning tasks to model providers.
pub struct ReasoningOrchestrator {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    config: ModelConfig,
    usage: Mutex<HashMap<String, u64>>,
}

impl ReasoningOrchestrator {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            providers: HashMap::new(),
            config,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Register a provider. Called at startup before the orchestrator is
    /// shared.
    pub fn register_provider(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Provider names that currently report availability.
    pub fn available_providers(&self) -> Vec<String> {
        self.providers
            .values()
            .filter(|p| p.is_available())
            .map(|p| p.name().to_string())
            .collect()
    }

    fn select_provider(
        &self,
        task_type: TaskType,
    ) -> Result<Arc<dyn ModelProvider>, ReasoningError> {
        let (primary, fallback) = route_for(task_type);

        if let Some(provider) = self.providers.get(primary) {
            if provider.is_available() {
                return Ok(provider.clone());
            }
        }

        if let Some(provider) = self.providers.get(fallback) {
            if provider.is_available() {
                tracing::info!(primary, fallback, "primary provider unavailable, using fallback");
                return Ok(provider.clone());
            }
        }

        // Emergency: any available provider beats none.
        for provider in self.providers.values() {
            if provider.is_available() {
                tracing::warn!(
                    provider = provider.name(),
                    "using emergency fallback provider"
                );
                return Ok(provider.clone());
            }
        }

        Err(ReasoningError::NoProviderAvailable(task_type.to_string()))
    }

    fn timeout_for(&self, provider_name: &str) -> Duration {
        if provider_name == LOCAL_PROVIDER {
            self.config.local_provider_timeout
        } else {
            self.config.provider_timeout
        }
    }

    /// Generate a completion for a task, with routing, fallback, and
    /// timeout.
    pub async fn generate(
        &self,
        prompt: &str,
        task_type: TaskType,
        max_tokens: Option<u32>,
    ) -> Result<ModelResponse, ReasoningError> {
        let provider = self.select_provider(task_type)?;
        let name = provider.name().to_string();
        let timeout = self.timeout_for(&name);

        let result = tokio::time::timeout(
            timeout,
            provider.generate(prompt, task_type, self.config.temperature, max_tokens),
        )
        .await;

        *self.usage.lock().entry(name.clone()).or_insert(0) += 1;

        match result {
            Ok(Ok(response)) => {
                tracing::debug!(
                    provider = %name,
                    tokens = response.tokens_used,
                    latency_ms = response.latency_ms,
                    "model call completed"
                );
                Ok(response)
            }
            Ok(Err(message)) => Err(ReasoningError::ProviderFailed {
                provider: name,
                message,
            }),
            Err(_) => Err(ReasoningError::Timeout {
                provider: name,
                seconds: timeout.as_secs(),
            }),
        }
    }

    /// Per-provider call counts.
    pub fn usage(&self) -> HashMap<String, u64> {
        self.usage.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProvider {
        name: &'static str,
        available: AtomicBool,
        reply: String,
    }

    impl StubProvider {
        fn new(name: &'static str, reply: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: AtomicBool::new(true),
                reply: reply.to_string(),
            })
        }

        fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ModelProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn generate(
            &self,
            _prompt: &str,
            _task_type: TaskType,
            _temperature: f64,
            _max_tokens: Option<u32>,
        ) -> Result<ModelResponse, String> {
            Ok(ModelResponse {
                content: self.reply.clone(),
                tokens_used: 10,
                latency_ms: 5,
            })
        }
    }

    fn orchestrator_with(
        providers: Vec<Arc<StubProvider>>,
    ) -> (ReasoningOrchestrator, Vec<Arc<StubProvider>>) {
        let mut orchestrator = ReasoningOrchestrator::new(ModelConfig::default());
        for provider in &providers {
            orchestrator.register_provider(provider.clone());
        }
        (orchestrator, providers)
    }

    #[test]
    fn routing_table_matches_contract() {
        assert_eq!(route_for(TaskType::Reasoning), ("openai", "claude"));
        assert_eq!(route_for(TaskType::RootCause), ("openai", "claude"));
        assert_eq!(route_for(TaskType::CveLookup), ("gemini", "openai"));
        assert_eq!(route_for(TaskType::Search), ("gemini", "openai"));
        assert_eq!(route_for(TaskType::CodeGeneration), ("claude", "openai"));
        assert_eq!(route_for(TaskType::TestGeneration), ("claude", "openai"));
        assert_eq!(route_for(TaskType::General), ("openai", "gemini"));
        assert_eq!(route_for(TaskType::Chat), ("openai", "local"));
    }

    #[tokio::test]
    async fn routes_to_primary_when_available() {
        let (orchestrator, _providers) = orchestrator_with(vec![
            StubProvider::new("openai", "from openai"),
            StubProvider::new("claude", "from claude"),
        ]);
        let response = orchestrator
            .generate("why is it down", TaskType::Reasoning, None)
            .await
            .unwrap();
        assert_eq!(response.content, "from openai");
    }

    #[tokio::test]
    async fn falls_back_when_primary_unavailable() {
        let (orchestrator, providers) = orchestrator_with(vec![
            StubProvider::new("openai", "from openai"),
            StubProvider::new("claude", "from claude"),
        ]);
        providers[0].set_available(false);
        let response = orchestrator
            .generate("why is it down", TaskType::Reasoning, None)
            .await
            .unwrap();
        assert_eq!(response.content, "from claude");
    }

    #[tokio::test]
    async fn emergency_fallback_uses_any_available() {
        let (orchestrator, providers) = orchestrator_with(vec![
            StubProvider::new("openai", "from openai"),
            StubProvider::new("claude", "from claude"),
            StubProvider::new("gemini", "from gemini"),
        ]);
        providers[0].set_available(false);
        providers[1].set_available(false);
        let response = orchestrator
            .generate("why is it down", TaskType::Reasoning, None)
            .await
            .unwrap();
        assert_eq!(response.content, "from gemini");
    }

    #[tokio::test]
    async fn no_provider_available_is_an_error() {
        let (orchestrator, providers) =
            orchestrator_with(vec![StubProvider::new("openai", "hello")]);
        providers[0].set_available(false);
        let err = orchestrator
            .generate("anything", TaskType::General, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReasoningError::NoProviderAvailable(_)));
    }

    #[tokio::test]
    async fn usage_counters_accumulate() {
        let (orchestrator, _providers) =
            orchestrator_with(vec![StubProvider::new("openai", "hello")]);
        let _ = orchestrator.generate("a", TaskType::General, None).await;
        let _ = orchestrator.generate("b", TaskType::General, None).await;
        assert_eq!(orchestrator.usage()["openai"], 2);
    }
}
