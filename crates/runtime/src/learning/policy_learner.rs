//! Policy and heuristic learner
//!
//! Learns which signals matter and which are noise. Suppressing noise
//! before reasoning is the primary backpressure mechanism of the learning
//! loop: a signal pattern whose value score collapses stops consuming model
//! calls entirely.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Value classification of a signal pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalValue {
    /// Take action.
    HighValue,
    /// Consider action.
    #[default]
    MediumValue,
    /// Monitor.
    LowValue,
    /// Suppress.
    Noise,
}

impl std::fmt::Display for SignalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalValue::HighValue => "high_value",
            SignalValue::MediumValue => "medium_value",
            SignalValue::LowValue => "low_value",
            SignalValue::Noise => "noise",
        };
        write!(f, "{}", s)
    }
}

/// A learned pattern about one (signal type, finding type) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPattern {
    pub signal_type: String,
    pub finding_type: String,
    pub occurrences: u32,
    pub actioned: u32,
    pub false_positives: u32,
    pub action_rate: f64,
    pub false_positive_rate: f64,
    /// action_rate × (1 − false_positive_rate).
    pub value_score: f64,
    pub classification: SignalValue,
    pub last_seen: DateTime<Utc>,
}

impl SignalPattern {
    fn new(signal_type: &str, finding_type: &str) -> Self {
        Self {
            signal_type: signal_type.to_string(),
            finding_type: finding_type.to_string(),
            occurrences: 0,
            actioned: 0,
            false_positives: 0,
            action_rate: 0.0,
            false_positive_rate: 0.0,
            value_score: 0.5,
            classification: SignalValue::MediumValue,
            last_seen: Utc::now(),
        }
    }

    /// Fold in one observation of this signal.
    pub fn record_occurrence(&mut self, actioned: bool, false_positive: bool) {
        self.occurrences += 1;
        if actioned {
            self.actioned += 1;
        }
        if false_positive {
            self.false_positives += 1;
        }
        self.last_seen = Utc::now();
        self.recalculate();
    }

    fn recalculate(&mut self) {
        if self.occurrences == 0 {
            return;
        }
        self.action_rate = f64::from(self.actioned) / f64::from(self.occurrences);
        self.false_positive_rate = f64::from(self.false_positives) / f64::from(self.occurrences);
        self.value_score = self.action_rate * (1.0 - self.false_positive_rate);

        self.classification = if self.value_score >= 0.7 {
            SignalValue::HighValue
        } else if self.value_score >= 0.4 {
            SignalValue::MediumValue
        } else if self.value_score >= 0.1 {
            SignalValue::LowValue
        } else {
            SignalValue::Noise
        };
    }
}

/// Noise-suppression statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoiseStats {
    pub total_patterns: usize,
    pub noise_patterns: usize,
    pub signals_suppressed: u64,
}

/// Learns signal value from outcomes and gates reasoning on it.
pub struct PolicyLearner {
    noise_threshold: f64,
    inner: Mutex<LearnerState>,
}

#[derive(Default)]
struct LearnerState {
    patterns: HashMap<String, SignalPattern>,
    suppressed: u64,
}

impl PolicyLearner {
    pub fn new(noise_threshold: f64) -> Self {
        Self {
            noise_threshold,
            inner: Mutex::new(LearnerState::default()),
        }
    }

    fn key(signal_type: &str, finding_type: &str) -> String {
        format!("{}|{}", signal_type, finding_type)
    }

    /// Decide whether a signal is worth reasoning about.
    ///
    /// Returns (process?, classification, reason). Unknown patterns default
    /// to medium value and are processed.
    pub fn evaluate_signal(
        &self,
        signal_type: &str,
        finding_type: &str,
    ) -> (bool, SignalValue, String) {
        let mut inner = self.inner.lock();
        let key = Self::key(signal_type, finding_type);
        let pattern = inner
            .patterns
            .entry(key)
            .or_insert_with(|| SignalPattern::new(signal_type, finding_type));

        if pattern.classification == SignalValue::Noise
            && pattern.value_score < self.noise_threshold
        {
            let reason = format!("noise_score={:.2}", pattern.value_score);
            inner.suppressed += 1;
            tracing::info!(finding_type, %reason, "signal suppressed as noise");
            return (false, SignalValue::Noise, reason);
        }

        let classification = pattern.classification;
        (
            true,
            classification,
            format!("value_score={:.2}", pattern.value_score),
        )
    }

    /// Record how a processed signal turned out.
    pub fn record_signal_outcome(
        &self,
        signal_type: &str,
        finding_type: &str,
        actioned: bool,
        false_positive: bool,
    ) {
        let mut inner = self.inner.lock();
        let key = Self::key(signal_type, finding_type);
        inner
            .patterns
            .entry(key)
            .or_insert_with(|| SignalPattern::new(signal_type, finding_type))
            .record_occurrence(actioned, false_positive);
    }

    pub fn pattern(&self, signal_type: &str, finding_type: &str) -> Option<SignalPattern> {
        self.inner
            .lock()
            .patterns
            .get(&Self::key(signal_type, finding_type))
            .cloned()
    }

    pub fn pattern_count(&self) -> usize {
        self.inner.lock().patterns.len()
    }

    pub fn noise_stats(&self) -> NoiseStats {
        let inner = self.inner.lock();
        NoiseStats {
            total_patterns: inner.patterns.len(),
            noise_patterns: inner
                .patterns
                .values()
                .filter(|p| p.classification == SignalValue::Noise)
                .count(),
            signals_suppressed: inner.suppressed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_signal_defaults_to_medium_and_processes() {
        let learner = PolicyLearner::new(0.1);
        let (process, classification, _) = learner.evaluate_signal("finding", "SQL_INJECTION");
        assert!(process);
        assert_eq!(classification, SignalValue::MediumValue);
    }

    #[test]
    fn consistently_ignored_signal_becomes_noise_and_is_suppressed() {
        let learner = PolicyLearner::new(0.1);
        for _ in 0..10 {
            learner.record_signal_outcome("finding", "DEBUG_LOG_DETECTED", false, true);
        }
        let pattern = learner.pattern("finding", "DEBUG_LOG_DETECTED").unwrap();
        assert_eq!(pattern.classification, SignalValue::Noise);
        assert_eq!(pattern.value_score, 0.0);

        let (process, classification, reason) =
            learner.evaluate_signal("finding", "DEBUG_LOG_DETECTED");
        assert!(!process);
        assert_eq!(classification, SignalValue::Noise);
        assert!(reason.starts_with("noise_score="));
        assert_eq!(learner.noise_stats().signals_suppressed, 1);
    }

    #[test]
    fn actioned_accurate_signal_becomes_high_value() {
        let learner = PolicyLearner::new(0.1);
        for _ in 0..10 {
            learner.record_signal_outcome("finding", "RCE", true, false);
        }
        let pattern = learner.pattern("finding", "RCE").unwrap();
        assert_eq!(pattern.classification, SignalValue::HighValue);
        assert_eq!(pattern.value_score, 1.0);

        let (process, classification, _) = learner.evaluate_signal("finding", "RCE");
        assert!(process);
        assert_eq!(classification, SignalValue::HighValue);
    }

    #[test]
    fn value_score_combines_action_and_fp_rates() {
        let learner = PolicyLearner::new(0.1);
        // Actioned half the time, false positive a quarter of the time.
        for i in 0..8 {
            learner.record_signal_outcome("alert", "CPU_SPIKE", i % 2 == 0, i % 4 == 0);
        }
        let pattern = learner.pattern("alert", "CPU_SPIKE").unwrap();
        assert!((pattern.action_rate - 0.5).abs() < 1e-9);
        assert!((pattern.false_positive_rate - 0.25).abs() < 1e-9);
        assert!((pattern.value_score - 0.375).abs() < 1e-9);
        assert_eq!(pattern.classification, SignalValue::LowValue);
    }

    #[test]
    fn noise_stats_count_patterns() {
        let learner = PolicyLearner::new(0.1);
        for _ in 0..5 {
            learner.record_signal_outcome("finding", "NOISY", false, true);
            learner.record_signal_outcome("finding", "USEFUL", true, false);
        }
        let stats = learner.noise_stats();
        assert_eq!(stats.total_patterns, 2);
        assert_eq!(stats.noise_patterns, 1);
    }
}
