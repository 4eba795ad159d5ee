//! Semantic memory
//!
//! Abstracted lessons from experience: compressed facts ("rules of thumb")
//! and per-(tool, context) effectiveness patterns. Unlike episodic memory,
//! nothing here references a specific incident.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::MemoryError;

const MAX_FACT_CONFIDENCE: f64 = 0.99;
const MIN_FACT_CONFIDENCE: f64 = 0.10;

/// A learned semantic fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticFact {
    pub fact_id: String,
    /// e.g. "tool_effectiveness", "pattern", "recommendation".
    pub category: String,
    pub content: String,
    pub confidence: f64,
    pub evidence_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SemanticFact {
    /// Reinforce with more evidence.
    pub fn reinforce(&mut self) {
        self.confidence = (self.confidence + 0.1).min(MAX_FACT_CONFIDENCE);
        self.evidence_count += 1;
        self.updated_at = Utc::now();
    }

    /// Decay due to non-use or contradiction.
    pub fn decay(&mut self) {
        self.confidence = (self.confidence - 0.05).max(MIN_FACT_CONFIDENCE);
        self.updated_at = Utc::now();
    }
}

/// Effectiveness of one tool in one context, as a sample-weighted moving
/// average.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPattern {
    pub tool: String,
    pub context: String,
    /// Effectiveness in [0, 1].
    pub effectiveness: f64,
    pub sample_size: u32,
    pub last_updated: DateTime<Utc>,
}

/// Semantic memory store, persisted as `facts.json` and
/// `tool_patterns.json`.
pub struct SemanticStore {
    storage_path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    facts: HashMap<String, SemanticFact>,
    tool_patterns: HashMap<String, ToolPattern>,
}

impl SemanticStore {
    pub fn new(storage_path: PathBuf) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(&storage_path)?;
        let store = Self {
            storage_path,
            inner: Mutex::new(Inner::default()),
        };
        store.load();
        Ok(store)
    }

    /// Store a fact, reinforcing it if it already exists.
    pub fn store_fact(
        &self,
        fact_id: &str,
        category: &str,
        content: &str,
        confidence: f64,
    ) -> Result<SemanticFact, MemoryError> {
        let fact = {
            let mut inner = self.inner.lock();
            match inner.facts.get_mut(fact_id) {
                Some(existing) => {
                    existing.reinforce();
                    existing.clone()
                }
                None => {
                    let fact = SemanticFact {
                        fact_id: fact_id.to_string(),
                        category: category.to_string(),
                        content: content.to_string(),
                        confidence: confidence.clamp(MIN_FACT_CONFIDENCE, MAX_FACT_CONFIDENCE),
                        evidence_count: 1,
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                        metadata: HashMap::new(),
                    };
                    inner.facts.insert(fact_id.to_string(), fact.clone());
                    fact
                }
            }
        };
        self.persist()?;
        Ok(fact)
    }

    pub fn get_fact(&self, fact_id: &str) -> Option<SemanticFact> {
        self.inner.lock().facts.get(fact_id).cloned()
    }

    /// Decay a fact's confidence.
    pub fn decay_fact(&self, fact_id: &str) -> Result<(), MemoryError> {
        if let Some(fact) = self.inner.lock().facts.get_mut(fact_id) {
            fact.decay();
        }
        self.persist()
    }

    /// Learn a (tool, context) effectiveness sample.
    pub fn learn_tool_pattern(
        &self,
        tool: &str,
        context: &str,
        was_effective: bool,
    ) -> Result<ToolPattern, MemoryError> {
        let key = format!("{}|{}", tool, context);
        let pattern = {
            let mut inner = self.inner.lock();
            let pattern = inner.tool_patterns.entry(key).or_insert_with(|| ToolPattern {
                tool: tool.to_string(),
                context: context.to_string(),
                effectiveness: 0.0,
                sample_size: 0,
                last_updated: Utc::now(),
            });

            let sample = if was_effective { 1.0 } else { 0.0 };
            if pattern.sample_size == 0 {
                pattern.effectiveness = sample;
            } else {
                let n = pattern.sample_size as f64;
                pattern.effectiveness = pattern.effectiveness * (n / (n + 1.0)) + sample / (n + 1.0);
            }
            pattern.sample_size += 1;
            pattern.last_updated = Utc::now();
            pattern.clone()
        };

        tracing::debug!(
            tool,
            context,
            effectiveness = pattern.effectiveness,
            samples = pattern.sample_size,
            "learned tool pattern"
        );

        self.persist()?;
        Ok(pattern)
    }

    /// Recommend tools for a context, best first.
    ///
    /// Ranking weight is effectiveness scaled by sample size (saturating at
    /// ten samples), so a tool with two lucky wins does not outrank a tool
    /// with a long track record.
    pub fn tool_recommendations(
        &self,
        context: &str,
        available_tools: &[&str],
    ) -> Vec<(String, f64, u32)> {
        let inner = self.inner.lock();
        let mut recommendations: Vec<(String, f64, u32)> = available_tools
            .iter()
            .map(|tool| {
                let key = format!("{}|{}", tool, context);
                match inner.tool_patterns.get(&key) {
                    Some(p) => (tool.to_string(), p.effectiveness, p.sample_size),
                    None => (tool.to_string(), 0.5, 0),
                }
            })
            .collect();

        recommendations.sort_by(|a, b| {
            let weight = |r: &(String, f64, u32)| r.1 * (r.2 as f64 / 10.0).min(1.0);
            weight(b)
                .partial_cmp(&weight(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        recommendations
    }

    pub fn facts_by_category(&self, category: &str) -> Vec<SemanticFact> {
        self.inner
            .lock()
            .facts
            .values()
            .filter(|f| f.category == category)
            .cloned()
            .collect()
    }

    /// Search facts by content substring, highest confidence first.
    pub fn search_facts(&self, query: &str) -> Vec<SemanticFact> {
        let query = query.to_lowercase();
        let mut results: Vec<SemanticFact> = self
            .inner
            .lock()
            .facts
            .values()
            .filter(|f| f.content.to_lowercase().contains(&query))
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }

    /// All facts, for export.
    pub fn all_facts(&self) -> Vec<SemanticFact> {
        self.inner.lock().facts.values().cloned().collect()
    }

    pub fn fact_count(&self) -> usize {
        self.inner.lock().facts.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.inner.lock().tool_patterns.len()
    }

    fn facts_path(&self) -> PathBuf {
        self.storage_path.join("facts.json")
    }

    fn patterns_path(&self) -> PathBuf {
        self.storage_path.join("tool_patterns.json")
    }

    fn persist(&self) -> Result<(), MemoryError> {
        let inner = self.inner.lock();
        std::fs::write(
            self.facts_path(),
            serde_json::to_string_pretty(&inner.facts)?,
        )?;
        std::fs::write(
            self.patterns_path(),
            serde_json::to_string_pretty(&inner.tool_patterns)?,
        )?;
        Ok(())
    }

    fn load(&self) {
        let mut inner = self.inner.lock();
        if let Ok(raw) = std::fs::read_to_string(self.facts_path()) {
            match serde_json::from_str(&raw) {
                Ok(facts) => inner.facts = facts,
                Err(e) => tracing::warn!(error = %e, "failed to load semantic facts"),
            }
        }
        if let Ok(raw) = std::fs::read_to_string(self.patterns_path()) {
            match serde_json::from_str(&raw) {
                Ok(patterns) => inner.tool_patterns = patterns,
                Err(e) => tracing::warn!(error = %e, "failed to load tool patterns"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (SemanticStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SemanticStore::new(dir.path().to_path_buf()).unwrap();
        (store, dir)
    }

    #[test]
    fn storing_existing_fact_reinforces_it() {
        let (store, _dir) = store();
        let first = store
            .store_fact("rule_restart", "tool_effectiveness", "restart usually works", 0.5)
            .unwrap();
        assert_eq!(first.evidence_count, 1);

        let second = store
            .store_fact("rule_restart", "tool_effectiveness", "restart usually works", 0.5)
            .unwrap();
        assert_eq!(second.evidence_count, 2);
        assert!((second.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn fact_confidence_is_bounded() {
        let (store, _dir) = store();
        store
            .store_fact("rule_x", "pattern", "something", 0.95)
            .unwrap();
        for _ in 0..10 {
            store
                .store_fact("rule_x", "pattern", "something", 0.95)
                .unwrap();
        }
        assert!(store.get_fact("rule_x").unwrap().confidence <= 0.99);

        for _ in 0..40 {
            store.decay_fact("rule_x").unwrap();
        }
        assert!(store.get_fact("rule_x").unwrap().confidence >= 0.10);
    }

    #[test]
    fn tool_pattern_moving_average() {
        let (store, _dir) = store();
        store.learn_tool_pattern("restart_service", "oom", true).unwrap();
        store.learn_tool_pattern("restart_service", "oom", true).unwrap();
        let pattern = store
            .learn_tool_pattern("restart_service", "oom", false)
            .unwrap();
        assert_eq!(pattern.sample_size, 3);
        assert!((pattern.effectiveness - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn recommendations_weight_by_sample_size() {
        let (store, _dir) = store();
        // Unproven tool with one win.
        store.learn_tool_pattern("lucky_tool", "timeout", true).unwrap();
        // Proven tool with 10 samples, 80% effective.
        for i in 0..10 {
            store
                .learn_tool_pattern("proven_tool", "timeout", i % 5 != 0)
                .unwrap();
        }

        let recs = store.tool_recommendations("timeout", &["lucky_tool", "proven_tool"]);
        assert_eq!(recs[0].0, "proven_tool");
    }

    #[test]
    fn unknown_tools_get_neutral_default() {
        let (store, _dir) = store();
        let recs = store.tool_recommendations("whatever", &["unseen"]);
        assert_eq!(recs[0], ("unseen".to_string(), 0.5, 0));
    }

    #[test]
    fn search_orders_by_confidence() {
        let (store, _dir) = store();
        store
            .store_fact("low", "pattern", "restart fixes flapping pods", 0.3)
            .unwrap();
        store
            .store_fact("high", "pattern", "restart fixes most crashes", 0.9)
            .unwrap();
        let results = store.search_facts("restart fixes");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].fact_id, "high");
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = SemanticStore::new(dir.path().to_path_buf()).unwrap();
            store
                .store_fact("rule_keep", "pattern", "keepers keep", 0.7)
                .unwrap();
            store.learn_tool_pattern("get_logs", "any", true).unwrap();
        }
        let store = SemanticStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.get_fact("rule_keep").is_some());
        assert_eq!(store.pattern_count(), 1);
    }
}
