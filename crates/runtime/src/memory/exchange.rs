//! Threat-DNA exchange
//!
//! Peers share distilled knowledge as "threat DNA" bundles: high-confidence
//! semantic facts with all incident-specific detail already compressed away.
//! Exports land in `data/exports/threat_dna/`; bundles dropped into
//! `data/imports/threat_dna/` are merged on the next import pass with a
//! confidence discount, since a peer's evidence is not our evidence.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::MemoryError;

use super::semantic::{SemanticFact, SemanticStore};

/// Confidence multiplier applied to imported facts.
const IMPORT_DISCOUNT: f64 = 0.8;

/// A portable bundle of distilled facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatDnaBundle {
    /// Identifier of the exporting node.
    pub origin: String,
    pub exported_at: chrono::DateTime<Utc>,
    pub facts: Vec<SemanticFact>,
}

/// Imports and exports threat-DNA bundles for one semantic store.
pub struct ThreatDnaExchange {
    export_dir: PathBuf,
    import_dir: PathBuf,
    node_name: String,
}

impl ThreatDnaExchange {
    pub fn new(export_dir: PathBuf, import_dir: PathBuf, node_name: impl Into<String>) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(&export_dir)?;
        std::fs::create_dir_all(&import_dir)?;
        Ok(Self {
            export_dir,
            import_dir,
            node_name: node_name.into(),
        })
    }

    /// Export facts above the confidence floor as one bundle file. Returns
    /// the number of facts exported.
    pub fn export(
        &self,
        store: &SemanticStore,
        min_confidence: f64,
    ) -> Result<usize, MemoryError> {
        let facts: Vec<SemanticFact> = store
            .all_facts()
            .into_iter()
            .filter(|f| f.confidence >= min_confidence)
            .collect();

        if facts.is_empty() {
            return Ok(0);
        }

        let bundle = ThreatDnaBundle {
            origin: self.node_name.clone(),
            exported_at: Utc::now(),
            facts,
        };

        let filename = format!(
            "{}_{}.json",
            self.node_name,
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let count = bundle.facts.len();
        std::fs::write(
            self.export_dir.join(filename),
            serde_json::to_string_pretty(&bundle)?,
        )?;

        tracing::info!(count, "exported threat DNA bundle");
        Ok(count)
    }

    /// Import every bundle in the import directory into the store.
    ///
    /// Imported facts are re-keyed under the origin node so they never
    /// collide with locally learned facts, and their confidence is
    /// discounted. Returns the number of facts imported.
    pub fn import(&self, store: &SemanticStore) -> Result<usize, MemoryError> {
        let mut imported = 0;
        let entries = std::fs::read_dir(&self.import_dir)?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let bundle: ThreatDnaBundle = match serde_json::from_str(&raw) {
                Ok(bundle) => bundle,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed bundle");
                    continue;
                }
            };

            for fact in &bundle.facts {
                let peer_id = format!("peer_{}_{}", bundle.origin, fact.fact_id);
                store.store_fact(
                    &peer_id,
                    &fact.category,
                    &fact.content,
                    fact.confidence * IMPORT_DISCOUNT,
                )?;
                imported += 1;
            }
        }

        if imported > 0 {
            tracing::info!(imported, "imported threat DNA facts");
        }
        Ok(imported)
    }
}
