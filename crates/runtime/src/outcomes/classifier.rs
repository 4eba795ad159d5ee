//! Failure classifier
//!
//! Maps error strings to a failure taxonomy with pattern matching, no ML.
//! The classification drives retry decisions and escalation: transient and
//! timeout failures are worth retrying, permission failures are not.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Environment;

/// Failure taxonomy, in rough order of recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// A retry might work.
    Transient,
    /// The operation timed out.
    Timeout,
    /// Access denied; retrying will not help.
    Permission,
    /// A resource is missing or exhausted.
    Resource,
    /// Invalid input or state.
    Validation,
    /// An external dependency failed.
    Dependency,
    /// Explicitly fatal.
    Permanent,
    Unknown,
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureType::Transient => "transient",
            FailureType::Timeout => "timeout",
            FailureType::Permission => "permission",
            FailureType::Resource => "resource",
            FailureType::Validation => "validation",
            FailureType::Dependency => "dependency",
            FailureType::Permanent => "permanent",
            FailureType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// How bad the failure is for the incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A classified failure with retry guidance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedFailure {
    pub failure_type: FailureType,
    pub severity: FailureSeverity,
    pub is_recoverable: bool,
    pub recommended_action: String,
    /// Classification confidence in [0, 1], driven by pattern specificity.
    pub confidence: f64,
    pub patterns_matched: Vec<String>,
    /// The raw error, truncated.
    pub raw_error: String,
}

struct ClassifierRule {
    pattern: Regex,
    source: &'static str,
    failure_type: FailureType,
    severity: FailureSeverity,
    recoverable: bool,
    action: &'static str,
}

/// Classifies failures from error strings.
pub struct FailureClassifier {
    rules: Vec<ClassifierRule>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! rule {
    ($pattern:literal, $ty:expr, $sev:expr, $rec:expr, $action:literal) => {
        ClassifierRule {
            // Patterns are static and known-valid; a bad one is a build bug.
            pattern: Regex::new($pattern).unwrap(),
            source: $pattern,
            failure_type: $ty,
            severity: $sev,
            recoverable: $rec,
            action: $action,
        }
    };
}

impl FailureClassifier {
    pub fn new() -> Self {
        use FailureSeverity as S;
        use FailureType as T;
        let rules = vec![
            // Transient
            rule!(r"connection.*refused|econnrefused", T::Transient, S::Medium, true, "Retry after delay"),
            rule!(r"timeout|timed out|deadline exceeded", T::Timeout, S::Medium, true, "Retry with longer timeout"),
            rule!(r"temporarily unavailable|service unavailable|503", T::Transient, S::Medium, true, "Retry with backoff"),
            rule!(r"rate limit|too many requests|429", T::Transient, S::Low, true, "Wait and retry"),
            // Permission
            rule!(r"permission denied|access denied|forbidden|403|401", T::Permission, S::High, false, "Escalate for access"),
            rule!(r"unauthorized|authentication failed", T::Permission, S::High, false, "Check credentials"),
            // Resource
            rule!(r"not found|404|does not exist", T::Resource, S::Medium, false, "Verify resource exists"),
            rule!(r"no such|cannot find", T::Resource, S::Medium, false, "Check resource path"),
            rule!(r"out of memory|oom|memory limit", T::Resource, S::Critical, false, "Scale resources"),
            rule!(r"disk full|no space left", T::Resource, S::Critical, false, "Free disk space"),
            // Validation
            rule!(r"invalid|malformed|bad request|400", T::Validation, S::Medium, false, "Fix input parameters"),
            rule!(r"schema.*error|validation.*failed", T::Validation, S::Medium, false, "Correct data format"),
            // Dependency
            rule!(r"upstream|downstream|dependency|external service", T::Dependency, S::High, true, "Check dependencies"),
            rule!(r"database.*error|db.*failed", T::Dependency, S::High, true, "Check database health"),
            // Permanent
            rule!(r"fatal|unrecoverable|critical error", T::Permanent, S::Critical, false, "Manual intervention required"),
        ];
        Self { rules }
    }

    /// Classify an error string.
    ///
    /// All matching patterns are recorded; the winner is the most specific
    /// one (longest pattern source). Unmatched errors come back as unknown
    /// at low confidence.
    pub fn classify(&self, error: &str, environment: Environment, retry_count: u32) -> ClassifiedFailure {
        let error_lower = error.to_lowercase();
        let mut patterns_matched = Vec::new();
        let mut best: Option<(&ClassifierRule, f64)> = None;

        for rule in &self.rules {
            if rule.pattern.is_match(&error_lower) {
                patterns_matched.push(rule.source.to_string());
                let confidence = rule.source.len() as f64 / 50.0;
                if best.map_or(true, |(_, c)| confidence > c) {
                    best = Some((rule, confidence));
                }
            }
        }

        let (failure_type, mut severity, mut recoverable, mut action, confidence) = match best {
            Some((rule, confidence)) => (
                rule.failure_type,
                rule.severity,
                rule.recoverable,
                rule.action.to_string(),
                confidence,
            ),
            None => (
                FailureType::Unknown,
                FailureSeverity::Medium,
                false,
                "Investigate and escalate".to_string(),
                0.3,
            ),
        };

        if retry_count >= 3 {
            recoverable = false;
            action = "Max retries reached - escalate".to_string();
        }

        if environment.is_production() && severity == FailureSeverity::Medium {
            severity = FailureSeverity::High;
        }

        let classified = ClassifiedFailure {
            failure_type,
            severity,
            is_recoverable: recoverable,
            recommended_action: action,
            confidence: confidence.min(1.0),
            patterns_matched,
            raw_error: error.chars().take(500).collect(),
        };

        tracing::debug!(
            failure_type = %classified.failure_type,
            recoverable = classified.is_recoverable,
            "classified failure"
        );

        classified
    }

    /// Retry iff the failure is recoverable, attempts remain, and the type
    /// is retry-friendly (dependency failures get one retry only).
    pub fn should_retry(&self, failure: &ClassifiedFailure, attempt: u32) -> bool {
        if !failure.is_recoverable || attempt >= 3 {
            return false;
        }
        match failure.failure_type {
            FailureType::Transient | FailureType::Timeout => true,
            FailureType::Dependency => attempt < 2,
            _ => false,
        }
    }

    /// Exponential backoff from a per-type base delay.
    pub fn retry_delay(&self, failure: &ClassifiedFailure, attempt: u32) -> Duration {
        let base = match failure.failure_type {
            FailureType::Transient => 2,
            FailureType::Timeout => 5,
            FailureType::Dependency => 10,
            _ => 5,
        };
        Duration::from_secs(base * 2u64.pow(attempt.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error: &str) -> ClassifiedFailure {
        FailureClassifier::new().classify(error, Environment::Development, 0)
    }

    #[test]
    fn connection_refused_is_transient() {
        let failure = classify("dial tcp 10.0.0.5:443: connection refused");
        assert_eq!(failure.failure_type, FailureType::Transient);
        assert!(failure.is_recoverable);
    }

    #[test]
    fn deadline_exceeded_is_timeout() {
        let failure = classify("rpc error: deadline exceeded");
        assert_eq!(failure.failure_type, FailureType::Timeout);
        assert!(failure.is_recoverable);
    }

    #[test]
    fn forbidden_is_permission_and_not_recoverable() {
        let failure = classify("server returned 403 Forbidden");
        assert_eq!(failure.failure_type, FailureType::Permission);
        assert!(!failure.is_recoverable);
        assert_eq!(failure.severity, FailureSeverity::High);
    }

    #[test]
    fn oom_is_critical_resource() {
        let failure = classify("container killed: out of memory");
        assert_eq!(failure.failure_type, FailureType::Resource);
        assert_eq!(failure.severity, FailureSeverity::Critical);
    }

    #[test]
    fn fatal_is_permanent() {
        let failure = classify("fatal: repository corrupted beyond repair");
        assert_eq!(failure.failure_type, FailureType::Permanent);
        assert!(!failure.is_recoverable);
    }

    #[test]
    fn unmatched_error_is_unknown_low_confidence() {
        let failure = classify("something inexplicable happened");
        assert_eq!(failure.failure_type, FailureType::Unknown);
        assert_eq!(failure.confidence, 0.3);
        assert!(failure.patterns_matched.is_empty());
    }

    #[test]
    fn most_specific_pattern_wins() {
        // Matches both the timeout rule and the transient 503 rule; the
        // longer pattern source should win the tie-break.
        let failure = classify("503 service unavailable: request timed out");
        assert!(failure.patterns_matched.len() >= 2);
        assert_eq!(failure.failure_type, FailureType::Transient);
    }

    #[test]
    fn production_bumps_medium_severity() {
        let classifier = FailureClassifier::new();
        let dev = classifier.classify("connection refused", Environment::Development, 0);
        assert_eq!(dev.severity, FailureSeverity::Medium);
        let prod = classifier.classify("connection refused", Environment::Production, 0);
        assert_eq!(prod.severity, FailureSeverity::High);
    }

    #[test]
    fn exhausted_retries_flip_recoverable() {
        let classifier = FailureClassifier::new();
        let failure = classifier.classify("connection refused", Environment::Development, 3);
        assert!(!failure.is_recoverable);
        assert!(failure.recommended_action.contains("Max retries"));
    }

    #[test]
    fn retry_policy_per_type() {
        let classifier = FailureClassifier::new();

        let transient = classify("connection refused");
        assert!(classifier.should_retry(&transient, 1));
        assert!(classifier.should_retry(&transient, 2));
        assert!(!classifier.should_retry(&transient, 3));

        let dependency = classify("upstream service error");
        assert!(classifier.should_retry(&dependency, 1));
        assert!(!classifier.should_retry(&dependency, 2));

        let permission = classify("access denied");
        assert!(!classifier.should_retry(&permission, 1));
    }

    #[test]
    fn retry_delay_backs_off_exponentially() {
        let classifier = FailureClassifier::new();
        let transient = classify("connection refused");
        assert_eq!(classifier.retry_delay(&transient, 1), Duration::from_secs(2));
        assert_eq!(classifier.retry_delay(&transient, 2), Duration::from_secs(4));
        assert_eq!(classifier.retry_delay(&transient, 3), Duration::from_secs(8));

        let timeout = classify("timed out");
        assert_eq!(classifier.retry_delay(&timeout, 1), Duration::from_secs(5));

        let dependency = classify("downstream failure");
        assert_eq!(classifier.retry_delay(&dependency, 2), Duration::from_secs(20));
    }
}
