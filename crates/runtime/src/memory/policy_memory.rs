//! Policy memory
//!
//! Tracks how each policy rule performs over time so brittle rules surface
//! for review and dead rules surface for removal. This enables safe policy
//! evolution without ever letting the rules mutate themselves.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::MemoryError;

/// How a policy application turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyApplication {
    /// The rule fired and led to a good outcome.
    Effective,
    /// The rule fired but was overridden by a human.
    Bypassed,
    /// The rule fired and led to a bad outcome.
    Wrong,
}

/// Performance record for one policy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub policy_id: String,
    /// e.g. "risk_gate", "action_limit", "environment_block".
    pub rule_type: String,
    pub times_applied: u32,
    pub times_effective: u32,
    pub times_bypassed: u32,
    pub times_wrong: u32,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub last_applied: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

impl PolicyRecord {
    fn new(policy_id: &str, rule_type: &str, description: &str) -> Self {
        Self {
            policy_id: policy_id.to_string(),
            rule_type: rule_type.to_string(),
            times_applied: 0,
            times_effective: 0,
            times_bypassed: 0,
            times_wrong: 0,
            confidence: 0.5,
            created_at: Utc::now(),
            last_applied: None,
            last_updated: Utc::now(),
            description: description.to_string(),
        }
    }

    pub fn effectiveness_rate(&self) -> f64 {
        if self.times_applied == 0 {
            return 0.5;
        }
        f64::from(self.times_effective) / f64::from(self.times_applied)
    }

    /// A rule is brittle when it is often wrong or bypassed.
    pub fn is_brittle(&self) -> bool {
        if self.times_applied < 5 {
            return false;
        }
        let wrong_rate =
            f64::from(self.times_wrong + self.times_bypassed) / f64::from(self.times_applied);
        wrong_rate > 0.3
    }
}

/// Suggested maintenance action for a policy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySuggestion {
    pub policy_id: String,
    /// "review" or "consider_removal".
    pub action: String,
    pub reason: String,
}

/// Policy performance store, persisted as `policies.json`.
pub struct PolicyMemory {
    storage_path: PathBuf,
    records: Mutex<HashMap<String, PolicyRecord>>,
}

impl PolicyMemory {
    pub fn new(storage_path: PathBuf) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(&storage_path)?;
        let memory = Self {
            storage_path,
            records: Mutex::new(HashMap::new()),
        };
        memory.load();
        Ok(memory)
    }

    /// Register a rule for tracking. Idempotent.
    pub fn register_policy(
        &self,
        policy_id: &str,
        rule_type: &str,
        description: &str,
    ) -> Result<PolicyRecord, MemoryError> {
        let record = {
            let mut records = self.records.lock();
            records
                .entry(policy_id.to_string())
                .or_insert_with(|| PolicyRecord::new(policy_id, rule_type, description))
                .clone()
        };
        self.persist()?;
        Ok(record)
    }

    /// Record one application of a rule.
    pub fn record_application(
        &self,
        policy_id: &str,
        application: PolicyApplication,
    ) -> Result<(), MemoryError> {
        {
            let mut records = self.records.lock();
            let record = records
                .entry(policy_id.to_string())
                .or_insert_with(|| PolicyRecord::new(policy_id, "unknown", ""));

            record.times_applied += 1;
            record.last_applied = Some(Utc::now());

            let delta = match application {
                PolicyApplication::Effective => {
                    record.times_effective += 1;
                    0.02
                }
                PolicyApplication::Bypassed => {
                    record.times_bypassed += 1;
                    -0.05
                }
                PolicyApplication::Wrong => {
                    record.times_wrong += 1;
                    -0.08
                }
            };
            record.confidence = (record.confidence + delta).clamp(0.1, 0.99);
            record.last_updated = Utc::now();

            tracing::debug!(
                policy = policy_id,
                applied = record.times_applied,
                confidence = record.confidence,
                "recorded policy application"
            );
        }
        self.persist()
    }

    pub fn policy_confidence(&self, policy_id: &str) -> f64 {
        self.records
            .lock()
            .get(policy_id)
            .map_or(0.5, |r| r.confidence)
    }

    pub fn get(&self, policy_id: &str) -> Option<PolicyRecord> {
        self.records.lock().get(policy_id).cloned()
    }

    pub fn brittle_policies(&self) -> Vec<PolicyRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| r.is_brittle())
            .cloned()
            .collect()
    }

    /// Rules not applied within the given number of days.
    pub fn unused_policies(&self, days: i64) -> Vec<PolicyRecord> {
        let threshold = Utc::now() - Duration::days(days);
        self.records
            .lock()
            .values()
            .filter(|r| r.last_applied.map_or(true, |t| t < threshold))
            .cloned()
            .collect()
    }

    /// Maintenance suggestions: review brittle rules, consider removing
    /// rules unused for 30+ days.
    pub fn suggest_changes(&self) -> Vec<PolicySuggestion> {
        let mut suggestions = Vec::new();
        for record in self.brittle_policies() {
            suggestions.push(PolicySuggestion {
                policy_id: record.policy_id.clone(),
                action: "review".to_string(),
                reason: format!(
                    "High failure rate ({}/{})",
                    record.times_wrong + record.times_bypassed,
                    record.times_applied
                ),
            });
        }
        for record in self.unused_policies(30) {
            suggestions.push(PolicySuggestion {
                policy_id: record.policy_id.clone(),
                action: "consider_removal".to_string(),
                reason: "Not applied in 30+ days".to_string(),
            });
        }
        suggestions
    }

    pub fn all_records(&self) -> Vec<PolicyRecord> {
        self.records.lock().values().cloned().collect()
    }

    fn path(&self) -> PathBuf {
        self.storage_path.join("policies.json")
    }

    fn persist(&self) -> Result<(), MemoryError> {
        let records = self.records.lock();
        std::fs::write(self.path(), serde_json::to_string_pretty(&*records)?)?;
        Ok(())
    }

    fn load(&self) {
        if let Ok(raw) = std::fs::read_to_string(self.path()) {
            match serde_json::from_str(&raw) {
                Ok(records) => *self.records.lock() = records,
                Err(e) => tracing::warn!(error = %e, "failed to load policy memory"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory() -> (PolicyMemory, TempDir) {
        let dir = TempDir::new().unwrap();
        let memory = PolicyMemory::new(dir.path().to_path_buf()).unwrap();
        (memory, dir)
    }

    #[test]
    fn confidence_deltas_match_application_kind() {
        let (memory, _dir) = memory();
        memory.register_policy("rule_a", "risk_gate", "").unwrap();

        memory
            .record_application("rule_a", PolicyApplication::Effective)
            .unwrap();
        assert!((memory.policy_confidence("rule_a") - 0.52).abs() < 1e-9);

        memory
            .record_application("rule_a", PolicyApplication::Bypassed)
            .unwrap();
        assert!((memory.policy_confidence("rule_a") - 0.47).abs() < 1e-9);

        memory
            .record_application("rule_a", PolicyApplication::Wrong)
            .unwrap();
        assert!((memory.policy_confidence("rule_a") - 0.39).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped() {
        let (memory, _dir) = memory();
        for _ in 0..100 {
            memory
                .record_application("rule_b", PolicyApplication::Wrong)
                .unwrap();
        }
        assert_eq!(memory.policy_confidence("rule_b"), 0.1);

        for _ in 0..100 {
            memory
                .record_application("rule_b", PolicyApplication::Effective)
                .unwrap();
        }
        assert!(memory.policy_confidence("rule_b") <= 0.99);
    }

    #[test]
    fn brittleness_requires_five_applications() {
        let (memory, _dir) = memory();
        for _ in 0..4 {
            memory
                .record_application("rule_c", PolicyApplication::Wrong)
                .unwrap();
        }
        assert!(!memory.get("rule_c").unwrap().is_brittle());

        memory
            .record_application("rule_c", PolicyApplication::Wrong)
            .unwrap();
        assert!(memory.get("rule_c").unwrap().is_brittle());
    }

    #[test]
    fn mostly_effective_rule_is_not_brittle() {
        let (memory, _dir) = memory();
        for _ in 0..8 {
            memory
                .record_application("rule_d", PolicyApplication::Effective)
                .unwrap();
        }
        memory
            .record_application("rule_d", PolicyApplication::Bypassed)
            .unwrap();
        memory
            .record_application("rule_d", PolicyApplication::Wrong)
            .unwrap();
        // 2/10 = 0.2 wrong rate, under the 0.3 threshold.
        assert!(!memory.get("rule_d").unwrap().is_brittle());
    }

    #[test]
    fn suggestions_cover_brittle_and_unused() {
        let (memory, _dir) = memory();
        for _ in 0..6 {
            memory
                .record_application("brittle_rule", PolicyApplication::Wrong)
                .unwrap();
        }
        memory
            .register_policy("dormant_rule", "risk_gate", "never fired")
            .unwrap();

        let suggestions = memory.suggest_changes();
        assert!(suggestions
            .iter()
            .any(|s| s.policy_id == "brittle_rule" && s.action == "review"));
        assert!(suggestions
            .iter()
            .any(|s| s.policy_id == "dormant_rule" && s.action == "consider_removal"));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let memory = PolicyMemory::new(dir.path().to_path_buf()).unwrap();
            memory
                .record_application("rule_persist", PolicyApplication::Effective)
                .unwrap();
        }
        let memory = PolicyMemory::new(dir.path().to_path_buf()).unwrap();
        let record = memory.get("rule_persist").unwrap();
        assert_eq!(record.times_applied, 1);
        assert_eq!(record.times_effective, 1);
    }
}
