//! Runtime configuration
//!
//! Serde-backed configuration structs with defaults matching the shipped
//! policy. Loadable from TOML; every field can be omitted and falls back to
//! its default, so a minimal deployment needs no config file at all.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ConfigError, Environment};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub policy: PolicyConfig,
    pub approval: ApprovalConfig,
    pub learning: LearningConfig,
    pub budget: BudgetConfig,
    pub storage: StorageConfig,
    pub model: ModelConfig,
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.max_actions == 0 {
            return Err(ConfigError::Invalid("policy.max_actions must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.policy.medium_risk_min_tool_confidence) {
            return Err(ConfigError::Invalid(
                "policy.medium_risk_min_tool_confidence must be within [0, 1]".into(),
            ));
        }
        if self.learning.min_confidence_for_suggestion > self.learning.min_confidence_for_auto {
            return Err(ConfigError::Invalid(
                "learning.min_confidence_for_suggestion must not exceed min_confidence_for_auto"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Deterministic policy engine thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Maximum actions per incident before escalation.
    pub max_actions: u32,
    /// Environment incidents run against unless overridden per incident.
    pub environment: Environment,
    /// High/critical risk always suspends for approval.
    pub high_risk_requires_approval: bool,
    /// Minimum model confidence (0-100 scale) for medium-risk actions.
    pub medium_risk_min_model_confidence: f64,
    /// Minimum tool-state confidence for medium-risk actions.
    pub medium_risk_min_tool_confidence: f64,
    /// Failures within an incident that blacklist a tool.
    pub blacklist_failure_count: u32,
    /// Tool confidence at or below which the tool is blacklisted.
    pub blacklist_min_confidence: f64,
    /// Idle decay multiplier applied to unused tools each step.
    pub decay_factor_unused: f64,
    /// Decay multiplier applied on failure.
    pub decay_factor_failed: f64,
    /// Boost multiplier applied on success.
    pub boost_factor: f64,
    /// Floor for tool confidence.
    pub min_confidence: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_actions: 3,
            environment: Environment::Development,
            high_risk_requires_approval: true,
            medium_risk_min_model_confidence: 70.0,
            medium_risk_min_tool_confidence: 0.5,
            blacklist_failure_count: 2,
            blacklist_min_confidence: 0.20,
            decay_factor_unused: 0.99,
            decay_factor_failed: 0.95,
            boost_factor: 1.05,
            min_confidence: 0.10,
        }
    }
}

/// Approval gate policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub auto_approve_low: bool,
    pub auto_approve_medium: bool,
    /// Pending requests expire after this long and count as denied.
    #[serde(with = "humantime_serde")]
    pub approval_timeout: Duration,
    /// Substrings that mark an action as touching a sensitive path.
    pub sensitive_paths: Vec<String>,
    /// Observation sources whose actions are auto-approved.
    pub trusted_sources: Vec<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve_low: true,
            auto_approve_medium: false,
            approval_timeout: Duration::from_secs(3600),
            sensitive_paths: vec![
                "production".into(),
                "main".into(),
                "master".into(),
                "/etc/".into(),
                "secrets".into(),
                ".env".into(),
            ],
            trusted_sources: Vec::new(),
        }
    }
}

/// Learning loop thresholds and rewards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Playbook confidence at which fixes auto-apply.
    pub min_confidence_for_auto: f64,
    /// Playbook confidence at which a playbook is suggested with review.
    pub min_confidence_for_suggestion: f64,
    /// Confidence delta on a verified successful fix.
    pub success_reward: f64,
    /// Confidence delta on a failed fix.
    pub failure_penalty: f64,
    /// Extra penalty when the fix caused a regression.
    pub regression_penalty: f64,
    /// Signal value score below which findings are suppressed as noise.
    pub noise_threshold: f64,
    /// Estimated cost of one avoided model call, for savings accounting.
    pub estimated_llm_cost_per_call: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_confidence_for_auto: 0.90,
            min_confidence_for_suggestion: 0.70,
            success_reward: 0.02,
            failure_penalty: 0.05,
            regression_penalty: 0.10,
            noise_threshold: 0.1,
            estimated_llm_cost_per_call: 0.05,
        }
    }
}

/// Per-tenant budget defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_limit: f64,
    pub monthly_limit: f64,
    /// Per-tenant overrides keyed by tenant id.
    pub tenants: HashMap<String, TenantBudget>,
}

/// Budget override for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantBudget {
    pub daily_limit: f64,
    pub monthly_limit: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit: 100.0,
            monthly_limit: 2000.0,
            tenants: HashMap::new(),
        }
    }
}

/// On-disk layout, all paths relative to `data_root` unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for all runtime artifacts.
    pub data_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
        }
    }
}

impl StorageConfig {
    pub fn replay_buffer_dir(&self) -> PathBuf {
        self.data_root.join("replay_buffer")
    }

    pub fn episodic_dir(&self) -> PathBuf {
        self.data_root.join("data/episodic_memory")
    }

    pub fn semantic_dir(&self) -> PathBuf {
        self.data_root.join("data/semantic_memory")
    }

    pub fn policy_memory_dir(&self) -> PathBuf {
        self.data_root.join("data/policy_memory")
    }

    pub fn economic_dir(&self) -> PathBuf {
        self.data_root.join("data/economic_memory")
    }

    pub fn cognitive_trace_dir(&self) -> PathBuf {
        self.data_root.join("data/cognitive_trace")
    }

    pub fn approvals_dir(&self) -> PathBuf {
        self.data_root.join("approvals")
    }

    pub fn playbooks_dir(&self) -> PathBuf {
        self.data_root.join("data/playbooks")
    }

    pub fn threat_dna_export_dir(&self) -> PathBuf {
        self.data_root.join("data/exports/threat_dna")
    }

    pub fn threat_dna_import_dir(&self) -> PathBuf {
        self.data_root.join("data/imports/threat_dna")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_root.join("ledger.jsonl")
    }
}

/// Model provider timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Timeout for cloud providers.
    #[serde(with = "humantime_serde")]
    pub provider_timeout: Duration,
    /// Timeout for the local provider, which may be loading weights.
    #[serde(with = "humantime_serde")]
    pub local_provider_timeout: Duration,
    /// Sampling temperature passed to providers unless overridden.
    pub temperature: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(120),
            local_provider_timeout: Duration::from_secs(300),
            temperature: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_policy() {
        let config = RuntimeConfig::default();
        assert_eq!(config.policy.max_actions, 3);
        assert_eq!(config.policy.blacklist_failure_count, 2);
        assert_eq!(config.policy.decay_factor_unused, 0.99);
        assert!(config.approval.auto_approve_low);
        assert!(!config.approval.auto_approve_medium);
        assert_eq!(config.approval.approval_timeout, Duration::from_secs(3600));
        assert_eq!(config.learning.min_confidence_for_auto, 0.90);
        assert_eq!(config.model.provider_timeout, Duration::from_secs(120));
        assert_eq!(config.model.local_provider_timeout, Duration::from_secs(300));
        config.validate().unwrap();
    }

    #[test]
    fn storage_layout_is_anchored_at_data_root() {
        let storage = StorageConfig {
            data_root: PathBuf::from("/var/lib/opshield"),
        };
        assert_eq!(
            storage.episodic_dir(),
            PathBuf::from("/var/lib/opshield/data/episodic_memory")
        );
        assert_eq!(
            storage.ledger_path(),
            PathBuf::from("/var/lib/opshield/ledger.jsonl")
        );
        assert_eq!(
            storage.approvals_dir(),
            PathBuf::from("/var/lib/opshield/approvals")
        );
    }

    #[test]
    fn parses_partial_toml() {
        let raw = r#"
            [policy]
            max_actions = 5
            environment = "production"

            [approval]
            approval_timeout = "30m"
        "#;
        let config: RuntimeConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.policy.max_actions, 5);
        assert!(config.policy.environment.is_production());
        assert_eq!(config.approval.approval_timeout, Duration::from_secs(1800));
        // Untouched sections keep their defaults.
        assert_eq!(config.learning.noise_threshold, 0.1);
    }

    #[test]
    fn validation_rejects_inverted_learning_thresholds() {
        let mut config = RuntimeConfig::default();
        config.learning.min_confidence_for_suggestion = 0.95;
        assert!(config.validate().is_err());
    }
}
