//! Outcome scorer
//!
//! Converts an executed action's outcome into a 0-100 score with per-factor
//! attribution. The score is the learning signal that feeds tool confidence,
//! playbook updates, and shadow-run gating.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::executor::Outcome;
use crate::types::{Environment, RiskLevel};

/// Category assigned to a scored outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    Success,
    PartialSuccess,
    Failure,
    Timeout,
    Blocked,
    Escalated,
}

impl std::fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeCategory::Success => "success",
            OutcomeCategory::PartialSuccess => "partial_success",
            OutcomeCategory::Failure => "failure",
            OutcomeCategory::Timeout => "timeout",
            OutcomeCategory::Blocked => "blocked",
            OutcomeCategory::Escalated => "escalated",
        };
        write!(f, "{}", s)
    }
}

/// A scored outcome with factor attribution.
///
/// Invariant: `score` equals the sum of `factors` values, clamped to
/// [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeScore {
    pub score: f64,
    pub category: OutcomeCategory,
    /// How confident the scorer is in this score, in [0, 1].
    pub confidence: f64,
    pub factors: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeScore {
    /// High scores are positive learning signals.
    pub fn is_positive(&self) -> bool {
        self.score >= 70.0
    }

    /// Only confident scores should drive learning updates.
    pub fn is_learning_signal(&self) -> bool {
        self.confidence >= 0.7
    }
}

/// Context the scorer uses beyond the raw outcome.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    /// 1-based attempt number for this action.
    pub attempt_number: u32,
    pub risk_level: RiskLevel,
    pub environment: Environment,
    /// How many historical outcomes exist for this tool.
    pub historical_data_points: u32,
    /// Whether the tool is known to the registry.
    pub tool_known: bool,
}

impl Default for ScoreContext {
    fn default() -> Self {
        Self {
            attempt_number: 1,
            risk_level: RiskLevel::Medium,
            environment: Environment::Development,
            historical_data_points: 0,
            tool_known: false,
        }
    }
}

const WEIGHT_SUCCESS: f64 = 40.0;
const WEIGHT_SPEED: f64 = 20.0;
const WEIGHT_NO_SIDE_EFFECTS: f64 = 15.0;
const WEIGHT_FIRST_ATTEMPT: f64 = 15.0;

/// Scores action outcomes. Keeps a running baseline of successful execution
/// times so the speed factor adapts to the fleet.
pub struct OutcomeScorer {
    baseline: Mutex<Baseline>,
}

struct Baseline {
    avg_resolution_time_ms: f64,
    recent_success_times: Vec<u64>,
}

impl Default for OutcomeScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeScorer {
    pub fn new() -> Self {
        Self {
            baseline: Mutex::new(Baseline {
                avg_resolution_time_ms: 5000.0,
                recent_success_times: Vec::new(),
            }),
        }
    }

    /// Score an outcome. Scoring is a pure function of the outcome, the
    /// context, and the current baseline, so re-scoring the same outcome
    /// yields the same score.
    pub fn score(&self, outcome: &Outcome, context: &ScoreContext) -> OutcomeScore {
        let mut factors = HashMap::new();

        factors.insert(
            "success".to_string(),
            if outcome.success { WEIGHT_SUCCESS } else { 0.0 },
        );

        let speed = if outcome.execution_time_ms > 0 {
            let baseline = self.baseline.lock().avg_resolution_time_ms;
            let ratio = baseline / outcome.execution_time_ms.max(1) as f64;
            (WEIGHT_SPEED * ratio).min(WEIGHT_SPEED)
        } else {
            WEIGHT_SPEED * 0.5
        };
        factors.insert("speed".to_string(), speed);

        factors.insert(
            "no_side_effects".to_string(),
            if outcome.side_effects { 0.0 } else { WEIGHT_NO_SIDE_EFFECTS },
        );

        let first_attempt = if context.attempt_number == 1 && outcome.success {
            WEIGHT_FIRST_ATTEMPT
        } else {
            (WEIGHT_FIRST_ATTEMPT - f64::from(context.attempt_number.saturating_sub(1)) * 5.0)
                .max(0.0)
        };
        factors.insert("first_attempt".to_string(), first_attempt);

        let low_risk = match context.risk_level {
            RiskLevel::None => 10.0,
            RiskLevel::Low => 8.0,
            RiskLevel::Medium => 5.0,
            RiskLevel::High | RiskLevel::Critical => 2.0,
        };
        factors.insert("low_risk".to_string(), low_risk);

        let total: f64 = factors.values().sum();
        let total = total.clamp(0.0, 100.0);

        let category = if total >= 80.0 {
            OutcomeCategory::Success
        } else if total >= 50.0 {
            OutcomeCategory::PartialSuccess
        } else if outcome
            .error
            .as_deref()
            .is_some_and(|e| e.to_lowercase().contains("timeout"))
        {
            OutcomeCategory::Timeout
        } else {
            OutcomeCategory::Failure
        };

        let confidence = Self::score_confidence(outcome, context);

        tracing::debug!(score = total, category = %category, "scored outcome");

        OutcomeScore {
            score: total,
            category,
            confidence,
            factors,
            timestamp: Utc::now(),
        }
    }

    fn score_confidence(outcome: &Outcome, context: &ScoreContext) -> f64 {
        let mut confidence: f64 = 0.5;
        if context.historical_data_points > 10 {
            confidence += 0.2;
        }
        if outcome.success && !outcome.side_effects {
            confidence += 0.2;
        } else if !outcome.success && outcome.error.is_some() {
            confidence += 0.1;
        }
        if context.tool_known {
            confidence += 0.1;
        }
        confidence.min(1.0)
    }

    /// Fold a successful outcome into the speed baseline.
    ///
    /// The baseline is the mean of recent successful execution times,
    /// bounded to the last 100 samples.
    pub fn update_baseline(&self, outcome: &Outcome) {
        if !outcome.success || outcome.execution_time_ms == 0 {
            return;
        }
        let mut baseline = self.baseline.lock();
        baseline.recent_success_times.push(outcome.execution_time_ms);
        if baseline.recent_success_times.len() > 100 {
            baseline.recent_success_times.remove(0);
        }
        let sum: u64 = baseline.recent_success_times.iter().sum();
        baseline.avg_resolution_time_ms =
            sum as f64 / baseline.recent_success_times.len() as f64;
    }

    /// Current speed baseline in milliseconds.
    pub fn baseline_ms(&self) -> f64 {
        self.baseline.lock().avg_resolution_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_context() -> ScoreContext {
        ScoreContext {
            attempt_number: 1,
            risk_level: RiskLevel::Low,
            environment: Environment::Development,
            historical_data_points: 20,
            tool_known: true,
        }
    }

    #[test]
    fn fast_clean_success_scores_high() {
        let scorer = OutcomeScorer::new();
        let outcome = Outcome::success(100);
        let score = scorer.score(&outcome, &success_context());
        // 40 + 20 + 15 + 15 + 8 = 98
        assert_eq!(score.score, 98.0);
        assert_eq!(score.category, OutcomeCategory::Success);
        assert!(score.is_positive());
    }

    #[test]
    fn score_is_sum_of_factors_and_clamped() {
        let scorer = OutcomeScorer::new();
        let outcome = Outcome::success(1);
        let score = scorer.score(&outcome, &success_context());
        let sum: f64 = score.factors.values().sum();
        assert!((score.score - sum.clamp(0.0, 100.0)).abs() < 1e-9);
        assert!(score.score <= 100.0);
    }

    #[test]
    fn rescoring_is_idempotent() {
        let scorer = OutcomeScorer::new();
        let outcome = Outcome::success(250);
        let context = success_context();
        let first = scorer.score(&outcome, &context);
        let second = scorer.score(&outcome, &context);
        assert_eq!(first.score, second.score);
        assert_eq!(first.category, second.category);
    }

    #[test]
    fn timeout_error_categorized_as_timeout() {
        let scorer = OutcomeScorer::new();
        let mut outcome = Outcome::failure("operation timed out after 30s: Timeout");
        outcome.side_effects = true;
        outcome.execution_time_ms = 30_000;
        let context = ScoreContext {
            attempt_number: 3,
            risk_level: RiskLevel::High,
            ..ScoreContext::default()
        };
        let score = scorer.score(&outcome, &context);
        assert!(score.score < 50.0);
        assert_eq!(score.category, OutcomeCategory::Timeout);
    }

    #[test]
    fn failure_without_timeout_is_failure_category() {
        let scorer = OutcomeScorer::new();
        let mut outcome = Outcome::failure("permission denied");
        outcome.side_effects = true;
        outcome.execution_time_ms = 100_000;
        let context = ScoreContext {
            attempt_number: 4,
            risk_level: RiskLevel::High,
            ..ScoreContext::default()
        };
        let score = scorer.score(&outcome, &context);
        assert_eq!(score.category, OutcomeCategory::Failure);
    }

    #[test]
    fn later_attempts_lose_first_attempt_points() {
        let scorer = OutcomeScorer::new();
        let outcome = Outcome::success(100);
        let mut context = success_context();

        context.attempt_number = 2;
        let second = scorer.score(&outcome, &context);
        assert_eq!(second.factors["first_attempt"], 10.0);

        context.attempt_number = 5;
        let fifth = scorer.score(&outcome, &context);
        assert_eq!(fifth.factors["first_attempt"], 0.0);
    }

    #[test]
    fn unknown_duration_gets_half_speed_credit() {
        let scorer = OutcomeScorer::new();
        let outcome = Outcome {
            success: true,
            execution_time_ms: 0,
            ..Outcome::default()
        };
        let score = scorer.score(&outcome, &success_context());
        assert_eq!(score.factors["speed"], 10.0);
    }

    #[test]
    fn baseline_tracks_mean_of_recent_successes() {
        let scorer = OutcomeScorer::new();
        scorer.update_baseline(&Outcome::success(1000));
        scorer.update_baseline(&Outcome::success(3000));
        assert_eq!(scorer.baseline_ms(), 2000.0);

        // Failures do not move the baseline.
        scorer.update_baseline(&Outcome::failure("nope"));
        assert_eq!(scorer.baseline_ms(), 2000.0);
    }

    #[test]
    fn confidence_increases_with_evidence() {
        let scorer = OutcomeScorer::new();
        let outcome = Outcome::success(100);

        let sparse = scorer.score(&outcome, &ScoreContext::default());
        let rich = scorer.score(&outcome, &success_context());
        assert!(rich.confidence > sparse.confidence);
        assert!(rich.confidence <= 1.0);
        assert!(rich.is_learning_signal());
    }
}
