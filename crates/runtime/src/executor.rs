//! Tool executor contract
//!
//! Tools are external collaborators. The runtime only depends on this trait:
//! an executor always returns an [`Outcome`], never an error, for domain
//! failures. Executors may honor the `_execution_mode = "shadow"` argument to
//! run against a digital-twin side-effect boundary instead of production.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Argument key injected by the shadow runner.
pub const EXECUTION_MODE_KEY: &str = "_execution_mode";

/// Value of [`EXECUTION_MODE_KEY`] for shadow executions.
pub const EXECUTION_MODE_SHADOW: &str = "shadow";

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Outcome {
    pub success: bool,
    pub error: Option<String>,
    /// Whether the execution had observable side effects.
    pub side_effects: bool,
    /// Tool-specific result payload.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub execution_time_ms: u64,
}

impl Outcome {
    /// A successful outcome with no side effects.
    pub fn success(execution_time_ms: u64) -> Self {
        Self {
            success: true,
            execution_time_ms,
            ..Self::default()
        }
    }

    /// A failure outcome carrying an error string.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_side_effects(mut self) -> Self {
        self.side_effects = true;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Executes tools on behalf of the autonomy loop.
///
/// Implementations wrap real infrastructure tooling (kubectl, service
/// managers, patchers). Domain failures must be reported through the
/// returned [`Outcome`]; an `Err` from this trait is treated as an executor
/// crash and synthesized into a failure outcome by the caller.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_id: &str,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Outcome, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_constructors() {
        let ok = Outcome::success(120);
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.execution_time_ms, 120);

        let failed = Outcome::failure("connection refused");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("connection refused"));
        assert!(!failed.side_effects);

        let noisy = Outcome::success(10).with_side_effects();
        assert!(noisy.side_effects);
    }

    #[test]
    fn outcome_serde_round_trip() {
        let outcome = Outcome::success(42).with_data("restarted", serde_json::json!(true));
        let json = serde_json::to_string(&outcome).unwrap();
        let back: Outcome = serde_json::from_str(&json).unwrap();
        assert!(back.success);
        assert_eq!(back.data["restarted"], true);
    }
}
