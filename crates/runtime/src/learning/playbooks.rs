//! Fix playbook engine
//!
//! Replaces model calls with proven fix strategies. Instead of asking a
//! model how to fix a finding we have fixed before, the engine matches the
//! finding type and context against stored playbooks and applies the one
//! with the highest confidence. Model fallback happens only when no
//! playbook is confident enough.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::LearningConfig;
use crate::types::PlaybookId;

/// How fixes from a playbook get approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookApprovalPolicy {
    AutoApply,
    HumanReview,
    TeamApproval,
}

/// Where a playbook came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookSource {
    Builtin,
    Manual,
    LlmConverted,
    Learned,
}

/// Success/failure tracking for one playbook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuccessMetrics {
    pub successful_fixes: u32,
    pub failed_fixes: u32,
    pub regressions: u32,
    pub total_uses: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl SuccessMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_uses == 0 {
            return 0.0;
        }
        f64::from(self.successful_fixes) / f64::from(self.total_uses)
    }

    pub fn record_success(&mut self) {
        self.successful_fixes += 1;
        self.total_uses += 1;
        self.last_used = Some(Utc::now());
    }

    pub fn record_failure(&mut self, is_regression: bool) {
        self.failed_fixes += 1;
        self.total_uses += 1;
        if is_regression {
            self.regressions += 1;
        }
        self.last_used = Some(Utc::now());
    }
}

/// How to fix a specific class of issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixStrategy {
    pub description: String,
    /// Pattern identifier for code generation.
    pub code_pattern: String,
    pub fix_template: Option<String>,
    #[serde(default)]
    pub test_requirements: Vec<String>,
    #[serde(default)]
    pub rollback_steps: Vec<String>,
}

/// Context constraints for playbook matching.
///
/// Each non-empty list restricts the playbook to contexts whose
/// corresponding value appears in the list; empty lists match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConstraints {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub orms: Vec<String>,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
}

impl ContextConstraints {
    pub fn matches(&self, context: &HashMap<String, String>) -> bool {
        let field_matches = |constraint: &[String], key: &str| {
            constraint.is_empty()
                || context
                    .get(key)
                    .is_some_and(|value| constraint.iter().any(|c| c == value))
        };
        field_matches(&self.languages, "language")
            && field_matches(&self.frameworks, "framework")
            && field_matches(&self.orms, "orm")
            && field_matches(&self.databases, "database")
            && field_matches(&self.environments, "environment")
    }
}

/// A stored fix strategy with confidence and approval policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPlaybook {
    pub playbook_id: PlaybookId,
    pub finding_type: String,
    pub language: String,
    pub framework: String,
    #[serde(default)]
    pub context_constraints: ContextConstraints,
    pub fix_strategy: FixStrategy,
    pub confidence: f64,
    #[serde(default)]
    pub success_metrics: SuccessMetrics,
    pub approval_policy: PlaybookApprovalPolicy,
    pub auto_apply_threshold: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: PlaybookSource,
}

impl FixPlaybook {
    /// Matching key: finding type, language, framework.
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.finding_type, self.language, self.framework)
    }

    /// Auto-apply requires both the policy and the confidence bar.
    pub fn can_auto_apply(&self) -> bool {
        self.approval_policy == PlaybookApprovalPolicy::AutoApply
            && self.confidence >= self.auto_apply_threshold
    }

    pub fn matches_context(&self, context: &HashMap<String, String>) -> bool {
        self.context_constraints.matches(context)
    }

    pub fn update_from_outcome(&mut self, success: bool, regression: bool) {
        if success {
            self.success_metrics.record_success();
        } else {
            self.success_metrics.record_failure(regression);
        }
        self.updated_at = Utc::now();
    }
}

/// One match between a finding and a playbook.
#[derive(Debug, Clone)]
pub struct PlaybookMatch {
    pub playbook: FixPlaybook,
    pub match_score: f64,
    pub match_reason: String,
}

/// The engine's routing verdict for one finding.
#[derive(Debug, Clone)]
pub enum PlaybookRoute {
    /// Confidence and policy allow applying the playbook directly.
    UsePlaybook(FixPlaybook),
    /// A playbook exists but needs human review before applying.
    UsePlaybookWithReview(FixPlaybook),
    /// No usable playbook; ask the model.
    UseLlm { reason: String },
}

/// The playbook store and matcher.
///
/// Playbooks are shared read-mostly; confidence updates are serialized per
/// playbook through a per-entry lock.
pub struct PlaybookEngine {
    config: LearningConfig,
    storage_path: Option<PathBuf>,
    playbooks: DashMap<PlaybookId, Arc<Mutex<FixPlaybook>>>,
    by_finding_type: DashMap<String, Vec<PlaybookId>>,
}

impl PlaybookEngine {
    /// Create an engine with the built-in playbook library.
    pub fn new(config: LearningConfig, storage_path: Option<PathBuf>) -> Self {
        let engine = Self {
            config,
            storage_path,
            playbooks: DashMap::new(),
            by_finding_type: DashMap::new(),
        };
        engine.load_from_disk();
        engine.seed_builtin_playbooks();
        engine
    }

    pub fn add_playbook(&self, playbook: FixPlaybook) {
        let id = playbook.playbook_id.clone();
        self.by_finding_type
            .entry(playbook.finding_type.clone())
            .or_default()
            .push(id.clone());
        self.persist(&playbook);
        tracing::info!(playbook = %id, finding_type = %playbook.finding_type, "playbook added");
        self.playbooks.insert(id, Arc::new(Mutex::new(playbook)));
    }

    pub fn get_playbook(&self, id: &PlaybookId) -> Option<FixPlaybook> {
        self.playbooks.get(id).map(|entry| entry.lock().clone())
    }

    /// Find the best matching playbook for a finding.
    ///
    /// Candidates are filtered by context constraints, then ranked by
    /// confidence plus a bonus of 0.1 each for exact language and framework
    /// matches.
    pub fn find_matching_playbook(
        &self,
        finding_type: &str,
        context: &HashMap<String, String>,
    ) -> Option<PlaybookMatch> {
        let candidates = self.by_finding_type.get(finding_type)?.clone();

        let mut best: Option<(f64, FixPlaybook)> = None;
        for id in &candidates {
            let Some(entry) = self.playbooks.get(id) else {
                continue;
            };
            let playbook = entry.lock().clone();

            if !playbook.matches_context(context) {
                continue;
            }

            let mut score = playbook.confidence;
            if context.get("language") == Some(&playbook.language) {
                score += 0.1;
            }
            if context.get("framework") == Some(&playbook.framework) {
                score += 0.1;
            }

            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, playbook));
            }
        }

        best.map(|(match_score, playbook)| PlaybookMatch {
            playbook,
            match_score,
            match_reason: "context_and_confidence_match".to_string(),
        })
    }

    /// Route a finding: playbook, playbook-with-review, or model fallback.
    pub fn route(&self, finding_type: &str, context: &HashMap<String, String>) -> PlaybookRoute {
        let Some(matched) = self.find_matching_playbook(finding_type, context) else {
            return PlaybookRoute::UseLlm {
                reason: "no_matching_playbook".to_string(),
            };
        };

        let playbook = matched.playbook;
        if playbook.confidence >= self.config.min_confidence_for_auto && playbook.can_auto_apply() {
            tracing::info!(playbook = %playbook.playbook_id, "using playbook");
            PlaybookRoute::UsePlaybook(playbook)
        } else if playbook.confidence >= self.config.min_confidence_for_suggestion {
            tracing::info!(playbook = %playbook.playbook_id, "suggesting playbook with review");
            PlaybookRoute::UsePlaybookWithReview(playbook)
        } else {
            PlaybookRoute::UseLlm {
                reason: "confidence_too_low".to_string(),
            }
        }
    }

    /// Mint a new playbook from a verified model fix.
    pub fn create_playbook_from_llm_fix(
        &self,
        finding_type: &str,
        language: &str,
        framework: &str,
        fix_description: &str,
        fix_template: &str,
        initial_confidence: f64,
    ) -> FixPlaybook {
        let playbook = FixPlaybook {
            playbook_id: PlaybookId::random(),
            finding_type: finding_type.to_string(),
            language: language.to_string(),
            framework: framework.to_string(),
            context_constraints: ContextConstraints::default(),
            fix_strategy: FixStrategy {
                description: fix_description.to_string(),
                code_pattern: "llm_derived".to_string(),
                fix_template: Some(fix_template.to_string()),
                test_requirements: Vec::new(),
                rollback_steps: Vec::new(),
            },
            confidence: initial_confidence,
            success_metrics: SuccessMetrics::default(),
            approval_policy: PlaybookApprovalPolicy::HumanReview,
            auto_apply_threshold: self.config.min_confidence_for_auto,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            source: PlaybookSource::LlmConverted,
        };
        self.add_playbook(playbook.clone());
        playbook
    }

    /// Set a playbook's confidence, clamped to [0, 1]. Serialized per
    /// playbook by the entry lock.
    pub fn update_confidence(&self, id: &PlaybookId, new_confidence: f64) {
        if let Some(entry) = self.playbooks.get(id) {
            let mut playbook = entry.lock();
            playbook.confidence = new_confidence.clamp(0.0, 1.0);
            playbook.updated_at = Utc::now();
            let snapshot = playbook.clone();
            drop(playbook);
            self.persist(&snapshot);
        }
    }

    /// Record a verification outcome against a playbook's metrics.
    pub fn record_outcome(&self, id: &PlaybookId, success: bool, regression: bool) {
        if let Some(entry) = self.playbooks.get(id) {
            let mut playbook = entry.lock();
            playbook.update_from_outcome(success, regression);
            let snapshot = playbook.clone();
            drop(playbook);
            self.persist(&snapshot);
        }
    }

    pub fn playbooks_for_type(&self, finding_type: &str) -> Vec<FixPlaybook> {
        self.by_finding_type
            .get(finding_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.get_playbook(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_playbooks(&self) -> Vec<FixPlaybook> {
        self.playbooks
            .iter()
            .map(|entry| entry.value().lock().clone())
            .collect()
    }

    /// Engine statistics grouped by confidence band and source.
    pub fn stats(&self) -> PlaybookStats {
        let playbooks = self.all_playbooks();
        let mut stats = PlaybookStats {
            total_playbooks: playbooks.len(),
            finding_types_covered: self.by_finding_type.len(),
            ..PlaybookStats::default()
        };
        for playbook in &playbooks {
            if playbook.confidence >= 0.9 {
                stats.high_confidence += 1;
            } else if playbook.confidence >= 0.7 {
                stats.medium_confidence += 1;
            } else {
                stats.low_confidence += 1;
            }
            match playbook.source {
                PlaybookSource::Builtin => stats.builtin += 1,
                PlaybookSource::Manual => stats.manual += 1,
                PlaybookSource::LlmConverted => stats.llm_converted += 1,
                PlaybookSource::Learned => stats.learned += 1,
            }
        }
        stats
    }

    fn seed_builtin_playbooks(&self) {
        let now = Utc::now();
        let builtin = |id: &str,
                       finding_type: &str,
                       language: &str,
                       framework: &str,
                       constraints: ContextConstraints,
                       strategy: FixStrategy,
                       confidence: f64,
                       approval: PlaybookApprovalPolicy| {
            FixPlaybook {
                playbook_id: PlaybookId::new(id),
                finding_type: finding_type.to_string(),
                language: language.to_string(),
                framework: framework.to_string(),
                context_constraints: constraints,
                fix_strategy: strategy,
                confidence,
                success_metrics: SuccessMetrics::default(),
                approval_policy: approval,
                auto_apply_threshold: 0.90,
                created_at: now,
                updated_at: now,
                source: PlaybookSource::Builtin,
            }
        };

        let seeds = vec![
            builtin(
                "PB-SQLI-NODE-EXPRESS-001",
                "SQL_INJECTION",
                "nodejs",
                "express",
                ContextConstraints {
                    languages: vec!["nodejs".into(), "javascript".into(), "typescript".into()],
                    frameworks: vec!["express".into(), "fastify".into(), "koa".into()],
                    orms: vec![
                        "sequelize".into(),
                        "typeorm".into(),
                        "knex".into(),
                        "prisma".into(),
                    ],
                    ..ContextConstraints::default()
                },
                FixStrategy {
                    description: "Replace string interpolation with parameterized queries".into(),
                    code_pattern: "parameterized_query".into(),
                    fix_template: None,
                    test_requirements: vec![
                        "unit_test_added".into(),
                        "input_validation_test".into(),
                    ],
                    rollback_steps: Vec::new(),
                },
                0.94,
                PlaybookApprovalPolicy::AutoApply,
            ),
            builtin(
                "PB-XSS-REACT-001",
                "XSS",
                "javascript",
                "react",
                ContextConstraints {
                    languages: vec!["javascript".into(), "typescript".into()],
                    frameworks: vec!["react".into(), "nextjs".into()],
                    ..ContextConstraints::default()
                },
                FixStrategy {
                    description: "Replace dangerouslySetInnerHTML with sanitized content".into(),
                    code_pattern: "sanitize_html".into(),
                    fix_template: None,
                    test_requirements: vec!["xss_test".into(), "render_test".into()],
                    rollback_steps: Vec::new(),
                },
                0.91,
                PlaybookApprovalPolicy::AutoApply,
            ),
            builtin(
                "PB-HARDCODED-SECRET-001",
                "HARDCODED_SECRET",
                "any",
                "any",
                ContextConstraints::default(),
                FixStrategy {
                    description: "Move secret to environment variable or secret manager".into(),
                    code_pattern: "env_variable".into(),
                    fix_template: None,
                    test_requirements: vec!["secret_scan".into(), "env_exists".into()],
                    rollback_steps: Vec::new(),
                },
                0.95,
                PlaybookApprovalPolicy::HumanReview,
            ),
            builtin(
                "PB-INSECURE-DESERIALIZATION-001",
                "INSECURE_DESERIALIZATION",
                "python",
                "any",
                ContextConstraints {
                    languages: vec!["python".into()],
                    ..ContextConstraints::default()
                },
                FixStrategy {
                    description: "Replace pickle with JSON or use safe_load for YAML".into(),
                    code_pattern: "safe_serialization".into(),
                    fix_template: None,
                    test_requirements: vec!["deserialization_test".into()],
                    rollback_steps: Vec::new(),
                },
                0.88,
                PlaybookApprovalPolicy::HumanReview,
            ),
            builtin(
                "PB-CMD-INJECTION-001",
                "COMMAND_INJECTION",
                "any",
                "any",
                ContextConstraints::default(),
                FixStrategy {
                    description: "Use subprocess with shell=False and explicit args list".into(),
                    code_pattern: "safe_subprocess".into(),
                    fix_template: None,
                    test_requirements: vec!["command_test".into(), "input_validation".into()],
                    rollback_steps: Vec::new(),
                },
                0.92,
                PlaybookApprovalPolicy::HumanReview,
            ),
        ];

        for playbook in seeds {
            if !self.playbooks.contains_key(&playbook.playbook_id) {
                self.add_playbook(playbook);
            }
        }
    }

    fn persist(&self, playbook: &FixPlaybook) {
        let Some(path) = &self.storage_path else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(path) {
            tracing::error!(error = %e, "failed to create playbook storage");
            return;
        }
        let file = path.join(format!("{}.json", playbook.playbook_id));
        match serde_json::to_string_pretty(playbook) {
            Ok(json) => {
                if let Err(e) = std::fs::write(file, json) {
                    tracing::error!(error = %e, "failed to persist playbook");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize playbook"),
        }
    }

    fn load_from_disk(&self) {
        let Some(path) = &self.storage_path else {
            return;
        };
        let Ok(entries) = std::fs::read_dir(path) else {
            return;
        };
        let mut loaded = 0;
        for entry in entries.flatten() {
            let file = entry.path();
            if !file.extension().is_some_and(|e| e == "json") {
                continue;
            }
            match std::fs::read_to_string(&file)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<FixPlaybook>(&raw).map_err(|e| e.to_string()))
            {
                Ok(playbook) => {
                    let id = playbook.playbook_id.clone();
                    self.by_finding_type
                        .entry(playbook.finding_type.clone())
                        .or_default()
                        .push(id.clone());
                    self.playbooks.insert(id, Arc::new(Mutex::new(playbook)));
                    loaded += 1;
                }
                Err(e) => {
                    tracing::error!(path = %file.display(), error = %e, "failed to load playbook")
                }
            }
        }
        if loaded > 0 {
            tracing::info!(loaded, "loaded playbooks from storage");
        }
    }
}

/// Aggregate playbook statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybookStats {
    pub total_playbooks: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub finding_types_covered: usize,
    pub builtin: usize,
    pub manual: usize,
    pub llm_converted: usize,
    pub learned: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PlaybookEngine {
        PlaybookEngine::new(LearningConfig::default(), None)
    }

    fn node_express_context() -> HashMap<String, String> {
        let mut context = HashMap::new();
        context.insert("language".to_string(), "nodejs".to_string());
        context.insert("framework".to_string(), "express".to_string());
        context.insert("orm".to_string(), "knex".to_string());
        context
    }

    #[test]
    fn builtin_library_is_seeded() {
        let engine = engine();
        assert!(engine
            .get_playbook(&PlaybookId::new("PB-SQLI-NODE-EXPRESS-001"))
            .is_some());
        assert_eq!(engine.stats().builtin, 5);
    }

    #[test]
    fn sqli_node_express_routes_to_playbook() {
        let engine = engine();
        let route = engine.route("SQL_INJECTION", &node_express_context());
        match route {
            PlaybookRoute::UsePlaybook(playbook) => {
                assert_eq!(playbook.playbook_id.as_str(), "PB-SQLI-NODE-EXPRESS-001");
            }
            other => panic!("expected UsePlaybook, got {:?}", other),
        }
    }

    #[test]
    fn context_constraint_mismatch_excludes_playbook() {
        let engine = engine();
        let mut context = HashMap::new();
        context.insert("language".to_string(), "rust".to_string());
        let route = engine.route("SQL_INJECTION", &context);
        assert!(matches!(route, PlaybookRoute::UseLlm { .. }));
    }

    #[test]
    fn unknown_finding_type_falls_back_to_llm() {
        let engine = engine();
        let route = engine.route("NOVEL_FINDING", &HashMap::new());
        match route {
            PlaybookRoute::UseLlm { reason } => assert_eq!(reason, "no_matching_playbook"),
            other => panic!("expected UseLlm, got {:?}", other),
        }
    }

    #[test]
    fn match_score_prefers_exact_language_and_framework() {
        let engine = engine();
        let matched = engine
            .find_matching_playbook("SQL_INJECTION", &node_express_context())
            .unwrap();
        // 0.94 confidence + 0.1 language + 0.1 framework.
        assert!((matched.match_score - 1.14).abs() < 1e-9);
    }

    #[test]
    fn human_review_policy_never_auto_applies() {
        let engine = engine();
        // HARDCODED_SECRET has confidence 0.95 but human_review policy.
        let route = engine.route("HARDCODED_SECRET", &HashMap::new());
        assert!(matches!(route, PlaybookRoute::UsePlaybookWithReview(_)));
    }

    #[test]
    fn low_confidence_playbook_falls_back_to_llm() {
        let engine = engine();
        let id = PlaybookId::new("PB-SQLI-NODE-EXPRESS-001");
        engine.update_confidence(&id, 0.4);
        let route = engine.route("SQL_INJECTION", &node_express_context());
        match route {
            PlaybookRoute::UseLlm { reason } => assert_eq!(reason, "confidence_too_low"),
            other => panic!("expected UseLlm, got {:?}", other),
        }
    }

    #[test]
    fn llm_fix_mints_a_new_playbook() {
        let engine = engine();
        let playbook = engine.create_playbook_from_llm_fix(
            "PATH_TRAVERSAL",
            "go",
            "gin",
            "Normalize and validate the path before use",
            "filepath.Clean(...)",
            0.6,
        );
        assert_eq!(playbook.source, PlaybookSource::LlmConverted);
        assert_eq!(playbook.confidence, 0.6);
        assert!(engine.get_playbook(&playbook.playbook_id).is_some());
        // Too fresh to auto-apply.
        assert!(!playbook.can_auto_apply());
    }

    #[test]
    fn outcomes_update_metrics() {
        let engine = engine();
        let id = PlaybookId::new("PB-XSS-REACT-001");
        engine.record_outcome(&id, true, false);
        engine.record_outcome(&id, false, true);

        let playbook = engine.get_playbook(&id).unwrap();
        assert_eq!(playbook.success_metrics.total_uses, 2);
        assert_eq!(playbook.success_metrics.successful_fixes, 1);
        assert_eq!(playbook.success_metrics.regressions, 1);
        assert_eq!(playbook.success_metrics.success_rate(), 0.5);
    }

    #[test]
    fn confidence_updates_are_clamped() {
        let engine = engine();
        let id = PlaybookId::new("PB-CMD-INJECTION-001");
        engine.update_confidence(&id, 1.7);
        assert_eq!(engine.get_playbook(&id).unwrap().confidence, 1.0);
        engine.update_confidence(&id, -0.3);
        assert_eq!(engine.get_playbook(&id).unwrap().confidence, 0.0);
    }

    #[test]
    fn persists_and_reloads_playbooks() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = dir.path().to_path_buf();
        let minted_id = {
            let engine = PlaybookEngine::new(LearningConfig::default(), Some(storage.clone()));
            engine
                .create_playbook_from_llm_fix("SSRF", "python", "flask", "validate urls", "", 0.6)
                .playbook_id
        };

        let engine = PlaybookEngine::new(LearningConfig::default(), Some(storage));
        let playbook = engine.get_playbook(&minted_id).unwrap();
        assert_eq!(playbook.finding_type, "SSRF");
        // Builtins are not duplicated by the reload.
        assert_eq!(
            engine
                .playbooks_for_type("SQL_INJECTION")
                .iter()
                .filter(|p| p.playbook_id.as_str() == "PB-SQLI-NODE-EXPRESS-001")
                .count(),
            1
        );
    }
}
