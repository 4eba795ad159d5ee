//! Autonomy loop
//!
//! The per-incident control cycle: perceive → reason → policy → (approval)
//! → (shadow) → execute → score → memorize. The model proposes, the policy
//! engine disposes, and every suspension point honors the kill switch.

mod agent_loop;
mod kill_switch;
mod trace;

pub use agent_loop::{AutonomyLoop, StepResult};
pub use kill_switch::KillSwitch;
pub use trace::{CognitiveTraceWriter, ReplayBuffer, ReplayEntry, ReplayOutcome};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An input observation for the agent: a log excerpt, metric anomaly, or
/// alert. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub content: String,
    /// Where the observation came from ("logs", "metrics", "events",
    /// "alert").
    pub source: String,
    /// Stamped at creation when absent from the input.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Observation {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_carries_source_and_metadata() {
        let observation = Observation::new("pod restarting", "metrics")
            .with_metadata("namespace", "checkout");
        assert_eq!(observation.source, "metrics");
        assert_eq!(observation.metadata["namespace"], "checkout");
    }

    #[test]
    fn observation_deserializes_without_timestamp() {
        let observation: Observation =
            serde_json::from_str(r#"{"content": "api down", "source": "alert"}"#).unwrap();
        assert_eq!(observation.content, "api down");
        assert!(observation.metadata.is_empty());
    }
}
