//! Outcome intelligence
//!
//! Every verified fix feeds back here. The engine keeps the history of fix
//! outcomes, derives per-playbook confidence from verification results, and
//! reports how far model usage has been displaced by learned fixes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::LearningConfig;
use crate::types::PlaybookId;

/// Where a fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixSource {
    Playbook,
    Llm,
}

/// One recorded fix outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    pub finding_id: String,
    pub finding_type: String,
    pub fix_source: FixSource,
    pub verification_passed: bool,
    pub playbook_id: Option<PlaybookId>,
    pub time_to_fix_seconds: f64,
    pub risk_reduction: f64,
    pub regression_detected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Derived metrics on model displacement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmReductionMetrics {
    pub total_fixes: usize,
    pub playbook_fixes: usize,
    pub llm_fixes: usize,
    /// Fraction of fixes that avoided a model call.
    pub playbook_ratio: f64,
}

/// Records fix outcomes and maintains per-playbook confidence.
pub struct OutcomeIntelligenceEngine {
    config: LearningConfig,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    outcomes: Vec<FixOutcome>,
    playbook_confidence: HashMap<PlaybookId, f64>,
}

impl OutcomeIntelligenceEngine {
    pub fn new(config: LearningConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Record a fix outcome and fold it into playbook confidence.
    ///
    /// `seed_confidence` initializes a playbook's tracked confidence on its
    /// first outcome, so updates start from the playbook's current trust
    /// rather than a flat default.
    #[allow(clippy::too_many_arguments)]
    pub fn record_outcome(
        &self,
        finding_id: &str,
        finding_type: &str,
        fix_source: FixSource,
        verification_passed: bool,
        playbook_id: Option<&PlaybookId>,
        seed_confidence: f64,
        time_to_fix_seconds: f64,
        risk_reduction: f64,
        regression_detected: bool,
    ) -> FixOutcome {
        let outcome = FixOutcome {
            finding_id: finding_id.to_string(),
            finding_type: finding_type.to_string(),
            fix_source,
            verification_passed,
            playbook_id: playbook_id.cloned(),
            time_to_fix_seconds,
            risk_reduction,
            regression_detected,
            timestamp: Utc::now(),
        };

        let mut inner = self.inner.lock();

        if let Some(id) = playbook_id {
            let current = *inner
                .playbook_confidence
                .entry(id.clone())
                .or_insert(seed_confidence);

            let mut delta = if verification_passed {
                self.config.success_reward
            } else {
                -self.config.failure_penalty
            };
            if regression_detected {
                delta -= self.config.regression_penalty;
            }

            let updated = (current + delta).clamp(0.0, 1.0);
            inner.playbook_confidence.insert(id.clone(), updated);

            tracing::debug!(
                playbook = %id,
                previous = current,
                updated,
                "playbook confidence updated"
            );
        }

        inner.outcomes.push(outcome.clone());
        outcome
    }

    /// Current tracked confidence for a playbook (0.5 when unseen).
    pub fn playbook_confidence(&self, id: &PlaybookId) -> f64 {
        self.inner
            .lock()
            .playbook_confidence
            .get(id)
            .copied()
            .unwrap_or(0.5)
    }

    /// How much model usage has been displaced by playbooks.
    pub fn llm_reduction_metrics(&self) -> LlmReductionMetrics {
        let inner = self.inner.lock();
        let playbook_fixes = inner
            .outcomes
            .iter()
            .filter(|o| o.fix_source == FixSource::Playbook)
            .count();
        let total = inner.outcomes.len();
        LlmReductionMetrics {
            total_fixes: total,
            playbook_fixes,
            llm_fixes: total - playbook_fixes,
            playbook_ratio: if total == 0 {
                0.0
            } else {
                playbook_fixes as f64 / total as f64
            },
        }
    }

    /// Outcomes for one finding type, newest last.
    pub fn outcomes_for_type(&self, finding_type: &str) -> Vec<FixOutcome> {
        self.inner
            .lock()
            .outcomes
            .iter()
            .filter(|o| o.finding_type == finding_type)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> OutcomeIntelligenceEngine {
        OutcomeIntelligenceEngine::new(LearningConfig::default())
    }

    fn record(
        engine: &OutcomeIntelligenceEngine,
        id: &PlaybookId,
        passed: bool,
        regression: bool,
    ) -> FixOutcome {
        engine.record_outcome(
            "F-1",
            "SQL_INJECTION",
            FixSource::Playbook,
            passed,
            Some(id),
            0.9,
            12.0,
            0.8,
            regression,
        )
    }

    #[test]
    fn success_rewards_confidence_from_seed() {
        let engine = engine();
        let id = PlaybookId::new("PB-1");
        record(&engine, &id, true, false);
        assert!((engine.playbook_confidence(&id) - 0.92).abs() < 1e-9);
    }

    #[test]
    fn failure_and_regression_penalize() {
        let engine = engine();
        let id = PlaybookId::new("PB-2");
        record(&engine, &id, false, false);
        // 0.9 - 0.05
        assert!((engine.playbook_confidence(&id) - 0.85).abs() < 1e-9);

        record(&engine, &id, false, true);
        // 0.85 - 0.05 - 0.10
        assert!((engine.playbook_confidence(&id) - 0.70).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped_to_unit_interval() {
        let engine = engine();
        let id = PlaybookId::new("PB-3");
        for _ in 0..20 {
            record(&engine, &id, false, true);
        }
        assert_eq!(engine.playbook_confidence(&id), 0.0);

        for _ in 0..100 {
            record(&engine, &id, true, false);
        }
        assert!(engine.playbook_confidence(&id) <= 1.0);
    }

    #[test]
    fn unseen_playbook_reports_neutral_confidence() {
        let engine = engine();
        assert_eq!(engine.playbook_confidence(&PlaybookId::new("nope")), 0.5);
    }

    #[test]
    fn reduction_metrics_track_fix_sources() {
        let engine = engine();
        let id = PlaybookId::new("PB-4");
        record(&engine, &id, true, false);
        record(&engine, &id, true, false);
        engine.record_outcome(
            "F-9",
            "XSS",
            FixSource::Llm,
            true,
            None,
            0.5,
            60.0,
            0.4,
            false,
        );

        let metrics = engine.llm_reduction_metrics();
        assert_eq!(metrics.total_fixes, 3);
        assert_eq!(metrics.playbook_fixes, 2);
        assert_eq!(metrics.llm_fixes, 1);
        assert!((metrics.playbook_ratio - 2.0 / 3.0).abs() < 1e-9);
    }
}
