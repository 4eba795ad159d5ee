//! Knowledge distiller
//!
//! Batch job that compresses episodic memories into semantic rules of
//! thumb: per-tool success rates across resolved incidents, and tool
//! bigrams (after X, consider Y). Run from a scheduler or the CLI's
//! `distill` command.

use std::collections::HashMap;

use crate::types::MemoryError;

use super::episodic::{EpisodicStore, FinalOutcome};
use super::semantic::SemanticStore;

/// Compresses episodic memories into semantic facts.
pub struct KnowledgeDistiller<'a> {
    episodic: &'a EpisodicStore,
    semantic: &'a SemanticStore,
}

/// Summary of one distillation run.
#[derive(Debug, Clone, Default)]
pub struct DistillationReport {
    pub incidents_analyzed: usize,
    pub facts_created: usize,
}

impl<'a> KnowledgeDistiller<'a> {
    pub fn new(episodic: &'a EpisodicStore, semantic: &'a SemanticStore) -> Self {
        Self { episodic, semantic }
    }

    /// Run one distillation pass over every resolved incident on disk.
    pub fn distill(&self) -> Result<DistillationReport, MemoryError> {
        let resolved: Vec<_> = self
            .episodic
            .load_all()
            .into_iter()
            .filter(|m| m.final_outcome == Some(FinalOutcome::Resolved))
            .collect();

        tracing::info!(count = resolved.len(), "distilling resolved incidents");

        let mut report = DistillationReport {
            incidents_analyzed: resolved.len(),
            facts_created: 0,
        };
        if resolved.is_empty() {
            return Ok(report);
        }

        // Per-tool success counts across all resolved incidents.
        let mut tool_stats: HashMap<String, (u32, u32)> = HashMap::new();
        for incident in &resolved {
            for episode in &incident.episodes {
                let Some(action) = &episode.action_taken else {
                    continue;
                };
                let success = episode.outcome.as_ref().is_some_and(|o| o.success);
                let entry = tool_stats.entry(action.tool.clone()).or_insert((0, 0));
                entry.1 += 1;
                if success {
                    entry.0 += 1;
                }
            }
        }

        for (tool, (successes, total)) in &tool_stats {
            let success_rate = f64::from(*successes) / f64::from(*total);

            if success_rate > 0.8 && *total >= 3 {
                let content = format!(
                    "Tool '{}' is highly effective ({:.0}%) for resolving incidents.",
                    tool,
                    success_rate * 100.0
                );
                self.semantic.store_fact(
                    &format!("rule_tool_{}_effectiveness", tool),
                    "tool_effectiveness",
                    &content,
                    0.85 + f64::from((*total).min(10)) * 0.01,
                )?;
                report.facts_created += 1;
                tracing::info!(rule = %content, "distilled rule");
            } else if success_rate < 0.2 && *total >= 3 {
                let content = format!(
                    "Tool '{}' rarely works ({:.0}%). Avoid unless necessary.",
                    tool,
                    success_rate * 100.0
                );
                self.semantic.store_fact(
                    &format!("rule_tool_{}_ineffective", tool),
                    "tool_effectiveness",
                    &content,
                    0.8,
                )?;
                report.facts_created += 1;
                tracing::info!(rule = %content, "distilled rule");
            }
        }

        // Bigrams over consecutive actions within each incident.
        let mut bigrams: HashMap<(String, String), u32> = HashMap::new();
        for incident in &resolved {
            let tools: Vec<&str> = incident
                .episodes
                .iter()
                .filter_map(|e| e.action_taken.as_ref())
                .map(|a| a.tool.as_str())
                .collect();
            for pair in tools.windows(2) {
                *bigrams
                    .entry((pair[0].to_string(), pair[1].to_string()))
                    .or_insert(0) += 1;
            }
        }

        for ((first, second), count) in &bigrams {
            if *count >= 3 {
                let content = format!(
                    "After using '{}', consider using '{}'. This sequence appeared {} times in resolved incidents.",
                    first, second, count
                );
                self.semantic.store_fact(
                    &format!("rule_seq_{}_{}", first, second),
                    "recommendation",
                    &content,
                    0.7,
                )?;
                report.facts_created += 1;
                tracing::info!(rule = %content, "distilled rule");
            }
        }

        Ok(report)
    }
}
