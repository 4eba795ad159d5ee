//! Learning loop orchestrator
//!
//! Wires the full self-evolving workflow for one finding: suppress noise,
//! route to a playbook or the model, record verification, update
//! confidence, and mint a new playbook when a model fix verifies. Over
//! time, model calls drop and the saved cost accumulates.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::LearningConfig;
use crate::types::{LoopId, PlaybookId};

use super::intelligence::{FixSource, OutcomeIntelligenceEngine};
use super::playbooks::{FixPlaybook, PlaybookEngine, PlaybookRoute};
use super::policy_learner::PolicyLearner;

/// Decision on how a finding gets fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixDecision {
    UsePlaybook,
    UsePlaybookWithReview,
    UseLlm,
    SkipNoise,
}

/// Result of one complete learning-loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningLoopResult {
    pub loop_id: LoopId,
    pub finding_id: String,
    pub finding_type: String,
    pub signal_processed: bool,
    pub signal_classification: String,
    pub fix_decision: FixDecision,
    pub playbook_used: Option<PlaybookId>,
    pub llm_used: bool,
    pub fix_applied: bool,
    pub verification_passed: bool,
    pub learning_recorded: bool,
    pub confidence_updated: bool,
    pub total_time_seconds: f64,
    pub llm_cost_saved: f64,
    #[serde(default)]
    pub context: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Maturity summary derived from accumulated intelligence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaturityReport {
    pub score: f64,
    pub level: String,
    pub description: String,
}

/// System-wide intelligence report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceReport {
    pub total_loops_processed: usize,
    pub playbook_usage_rate: f64,
    pub noise_suppression_rate: f64,
    pub llm_calls_saved: u64,
    pub total_cost_saved: f64,
    pub maturity: MaturityReport,
}

/// The end-to-end learning loop.
pub struct LearningLoopOrchestrator {
    config: LearningConfig,
    playbooks: PlaybookEngine,
    intelligence: OutcomeIntelligenceEngine,
    policy_learner: PolicyLearner,
    inner: Mutex<OrchestratorState>,
}

#[derive(Default)]
struct OrchestratorState {
    history: Vec<LearningLoopResult>,
    llm_calls_saved: u64,
    total_cost_saved: f64,
}

impl LearningLoopOrchestrator {
    pub fn new(config: LearningConfig, playbooks: PlaybookEngine) -> Self {
        let policy_learner = PolicyLearner::new(config.noise_threshold);
        let intelligence = OutcomeIntelligenceEngine::new(config.clone());
        Self {
            config,
            playbooks,
            intelligence,
            policy_learner,
            inner: Mutex::new(OrchestratorState::default()),
        }
    }

    pub fn playbooks(&self) -> &PlaybookEngine {
        &self.playbooks
    }

    pub fn policy_learner(&self) -> &PolicyLearner {
        &self.policy_learner
    }

    pub fn intelligence(&self) -> &OutcomeIntelligenceEngine {
        &self.intelligence
    }

    /// Process one finding through the learning loop.
    ///
    /// Fix execution happens outside this orchestrator; the result records
    /// which path was chosen and the caller reports back through
    /// [`record_verification`](Self::record_verification).
    pub fn process_finding(
        &self,
        finding_id: &str,
        finding_type: &str,
        context: HashMap<String, String>,
    ) -> LearningLoopResult {
        let mut result = LearningLoopResult {
            loop_id: LoopId::new(),
            finding_id: finding_id.to_string(),
            finding_type: finding_type.to_string(),
            signal_processed: true,
            signal_classification: String::new(),
            fix_decision: FixDecision::UseLlm,
            playbook_used: None,
            llm_used: false,
            fix_applied: false,
            verification_passed: false,
            learning_recorded: false,
            confidence_updated: false,
            total_time_seconds: 0.0,
            llm_cost_saved: 0.0,
            context,
            started_at: Utc::now(),
            completed_at: None,
        };

        tracing::info!(finding_type, "learning loop started");

        // Step 1: noise suppression.
        let (process, classification, _reason) =
            self.policy_learner.evaluate_signal("finding", finding_type);
        result.signal_classification = classification.to_string();

        if !process {
            result.signal_processed = false;
            result.fix_decision = FixDecision::SkipNoise;
            result.completed_at = Some(Utc::now());
            self.inner.lock().history.push(result.clone());
            return result;
        }

        // Step 2: playbook routing.
        match self.playbooks.route(finding_type, &result.context) {
            PlaybookRoute::UsePlaybook(playbook) => {
                result.fix_decision = FixDecision::UsePlaybook;
                result.playbook_used = Some(playbook.playbook_id.clone());
                result.llm_used = false;
                result.llm_cost_saved = self.config.estimated_llm_cost_per_call;

                let mut inner = self.inner.lock();
                inner.llm_calls_saved += 1;
                inner.total_cost_saved += result.llm_cost_saved;
            }
            PlaybookRoute::UsePlaybookWithReview(playbook) => {
                result.fix_decision = FixDecision::UsePlaybookWithReview;
                result.playbook_used = Some(playbook.playbook_id.clone());
                result.llm_used = false;
            }
            PlaybookRoute::UseLlm { reason } => {
                result.fix_decision = FixDecision::UseLlm;
                result.llm_used = true;
                tracing::info!(%reason, "falling back to model");
            }
        }

        // Step 3: the chosen path executes externally.
        result.fix_applied = true;

        self.inner.lock().history.push(result.clone());
        result
    }

    /// Record verification of an applied fix and trigger learning.
    pub fn record_verification(
        &self,
        loop_id: LoopId,
        verification_passed: bool,
        regression_detected: bool,
        time_to_resolution: f64,
        risk_reduction: f64,
    ) {
        let entry = {
            let mut inner = self.inner.lock();
            let Some(result) = inner.history.iter_mut().find(|r| r.loop_id == loop_id) else {
                tracing::warn!(loop_id = %loop_id, "verification for unknown loop");
                return;
            };
            result.verification_passed = verification_passed;
            result.completed_at = Some(Utc::now());
            result.total_time_seconds = time_to_resolution;
            result.learning_recorded = true;
            result.clone()
        };

        let fix_source = if entry.playbook_used.is_some() {
            FixSource::Playbook
        } else {
            FixSource::Llm
        };

        // Seed confidence tracking from the playbook's current trust.
        let seed = entry
            .playbook_used
            .as_ref()
            .and_then(|id| self.playbooks.get_playbook(id))
            .map_or(0.5, |p| p.confidence);

        self.intelligence.record_outcome(
            &entry.finding_id,
            &entry.finding_type,
            fix_source,
            verification_passed,
            entry.playbook_used.as_ref(),
            seed,
            time_to_resolution,
            risk_reduction,
            regression_detected,
        );

        if let Some(playbook_id) = &entry.playbook_used {
            self.playbooks
                .record_outcome(playbook_id, verification_passed, regression_detected);
            let updated = self.intelligence.playbook_confidence(playbook_id);
            self.playbooks.update_confidence(playbook_id, updated);

            let mut inner = self.inner.lock();
            if let Some(result) = inner.history.iter_mut().find(|r| r.loop_id == loop_id) {
                result.confidence_updated = true;
            }
        }

        self.policy_learner.record_signal_outcome(
            "finding",
            &entry.finding_type,
            true,
            !verification_passed,
        );

        tracing::info!(
            finding_type = %entry.finding_type,
            passed = verification_passed,
            "learning recorded"
        );
    }

    /// Mint a playbook from a verified model fix.
    ///
    /// Only applies to loops that used the model path and whose fix
    /// verified; playbook-path loops already have one.
    pub fn create_playbook_from_success(
        &self,
        loop_id: LoopId,
        fix_description: &str,
        fix_template: &str,
    ) -> Option<FixPlaybook> {
        let entry = {
            let inner = self.inner.lock();
            inner.history.iter().find(|r| r.loop_id == loop_id).cloned()
        }?;

        if !entry.verification_passed || !entry.llm_used {
            return None;
        }

        let language = entry
            .context
            .get("language")
            .cloned()
            .unwrap_or_else(|| "auto_detected".to_string());
        let framework = entry
            .context
            .get("framework")
            .cloned()
            .unwrap_or_else(|| "auto_detected".to_string());

        let playbook = self.playbooks.create_playbook_from_llm_fix(
            &entry.finding_type,
            &language,
            &framework,
            fix_description,
            fix_template,
            0.6,
        );
        tracing::info!(playbook = %playbook.playbook_id, "created playbook from model success");
        Some(playbook)
    }

    pub fn llm_calls_saved(&self) -> u64 {
        self.inner.lock().llm_calls_saved
    }

    pub fn total_cost_saved(&self) -> f64 {
        self.inner.lock().total_cost_saved
    }

    pub fn recent_loops(&self, limit: usize) -> Vec<LearningLoopResult> {
        let inner = self.inner.lock();
        let start = inner.history.len().saturating_sub(limit);
        inner.history[start..].to_vec()
    }

    /// Comprehensive intelligence report with maturity level.
    pub fn system_intelligence(&self) -> IntelligenceReport {
        let inner = self.inner.lock();
        let total = inner.history.len();
        let playbook_loops = inner
            .history
            .iter()
            .filter(|r| r.playbook_used.is_some())
            .count();
        let suppressed = inner
            .history
            .iter()
            .filter(|r| r.fix_decision == FixDecision::SkipNoise)
            .count();
        let llm_calls_saved = inner.llm_calls_saved;
        let total_cost_saved = inner.total_cost_saved;
        drop(inner);

        IntelligenceReport {
            total_loops_processed: total,
            playbook_usage_rate: ratio(playbook_loops, total),
            noise_suppression_rate: ratio(suppressed, total),
            llm_calls_saved,
            total_cost_saved,
            maturity: self.maturity(playbook_loops, total),
        }
    }

    fn maturity(&self, playbook_loops: usize, total_loops: usize) -> MaturityReport {
        let stats = self.playbooks.stats();
        let high_ratio = ratio(stats.high_confidence, stats.total_playbooks);
        let usage_ratio = ratio(playbook_loops, total_loops);
        let pattern_ratio = (self.policy_learner.pattern_count() as f64 / 100.0).min(1.0);

        let score = high_ratio * 0.4 + usage_ratio * 0.4 + pattern_ratio * 0.2;
        let (level, description) = if score >= 0.8 {
            ("AUTONOMOUS", "System operates primarily on learned intelligence")
        } else if score >= 0.6 {
            ("OPTIMIZED", "Model usage significantly reduced")
        } else if score >= 0.4 {
            ("LEARNING", "Actively accumulating intelligence")
        } else {
            ("FOUNDATION", "Building initial learning data")
        };

        MaturityReport {
            score,
            level: level.to_string(),
            description: description.to_string(),
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
