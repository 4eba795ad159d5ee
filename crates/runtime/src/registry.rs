//! Tool registry
//!
//! Declares the tools the autonomy loop may invoke: risk level, whether the
//! tool may run in production, and the input keys it requires. The registry
//! is built once at startup and shared read-only; policy schema validation
//! fails closed on any tool id that is not registered here.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::RiskLevel;

/// Static declaration of a single tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Stable tool identifier (e.g. `restart_service`).
    pub id: String,
    /// Risk classification driving the policy decision ladder.
    pub risk: RiskLevel,
    /// Whether the tool may run when the incident environment is production.
    pub prod_allowed: bool,
    /// Input keys that must be present in a proposed action's args.
    #[serde(default)]
    pub required_input_keys: BTreeSet<String>,
    /// Human-readable description, included in reasoning prompts.
    #[serde(default)]
    pub description: String,
    /// Validate against the digital twin before any production execution.
    #[serde(default)]
    pub shadow_before_prod: bool,
    /// Execution timeout for this tool.
    #[serde(default = "default_tool_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(60)
}

impl ToolSpec {
    /// Create a spec with no required inputs and defaults elsewhere.
    pub fn new(id: impl Into<String>, risk: RiskLevel, prod_allowed: bool) -> Self {
        Self {
            id: id.into(),
            risk,
            prod_allowed,
            required_input_keys: BTreeSet::new(),
            description: String::new(),
            shadow_before_prod: false,
            timeout: default_tool_timeout(),
        }
    }

    pub fn with_required_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_shadow_before_prod(mut self) -> Self {
        self.shadow_before_prod = true;
        self
    }
}

/// Process-wide tool registry, immutable after construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of specs. Later duplicates win, which
    /// lets embedders override seed tools from configuration.
    pub fn from_specs(specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec);
        }
        registry
    }

    /// Register a tool. Only usable during startup, before the registry is
    /// shared.
    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.id.clone(), spec);
    }

    pub fn get(&self, id: &str) -> Option<&ToolSpec> {
        self.tools.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool ids in sorted order, for stable prompt construction.
    pub fn tool_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    /// Render the registry as a tool menu for reasoning prompts.
    pub fn describe_for_prompt(&self) -> String {
        let mut lines = Vec::with_capacity(self.tools.len());
        for id in self.tool_ids() {
            // tool_ids only returns registered keys
            if let Some(spec) = self.tools.get(id) {
                let inputs = if spec.required_input_keys.is_empty() {
                    "none".to_string()
                } else {
                    spec.required_input_keys
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                lines.push(format!(
                    "- {} (risk: {}, required inputs: {}){}{}",
                    spec.id,
                    spec.risk,
                    inputs,
                    if spec.description.is_empty() { "" } else { ": " },
                    spec.description
                ));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> ToolRegistry {
        ToolRegistry::from_specs([
            ToolSpec::new("restart_service", RiskLevel::Low, true)
                .with_description("Restart a systemd or k8s service"),
            ToolSpec::new("rollback_deploy", RiskLevel::High, true)
                .with_required_inputs(["deployment"])
                .with_shadow_before_prod(),
            ToolSpec::new("drop_table", RiskLevel::Critical, false)
                .with_required_inputs(["table", "confirmation"]),
        ])
    }

    #[test]
    fn lookup_and_contains() {
        let registry = sample_registry();
        assert!(registry.contains("restart_service"));
        assert!(!registry.contains("unknown_tool"));
        let spec = registry.get("rollback_deploy").unwrap();
        assert!(spec.shadow_before_prod);
        assert!(spec.required_input_keys.contains("deployment"));
    }

    #[test]
    fn tool_ids_are_sorted() {
        let registry = sample_registry();
        assert_eq!(
            registry.tool_ids(),
            vec!["drop_table", "restart_service", "rollback_deploy"]
        );
    }

    #[test]
    fn later_registration_overrides() {
        let mut registry = sample_registry();
        registry.register(ToolSpec::new("restart_service", RiskLevel::Medium, false));
        let spec = registry.get("restart_service").unwrap();
        assert_eq!(spec.risk, RiskLevel::Medium);
        assert!(!spec.prod_allowed);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn prompt_menu_lists_required_inputs() {
        let registry = sample_registry();
        let menu = registry.describe_for_prompt();
        assert!(menu.contains("restart_service"));
        assert!(menu.contains("required inputs: table, confirmation")
            || menu.contains("required inputs: confirmation, table"));
    }

    #[test]
    fn spec_serde_round_trip() {
        let spec = ToolSpec::new("apply_patch", RiskLevel::Medium, true)
            .with_required_inputs(["patch_id"]);
        let json = serde_json::to_string(&spec).unwrap();
        let back: ToolSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "apply_patch");
        assert_eq!(back.risk, RiskLevel::Medium);
        assert!(back.required_input_keys.contains("patch_id"));
    }
}
