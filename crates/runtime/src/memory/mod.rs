//! Layered memory
//!
//! Four memory layers with different lifetimes and abstraction levels:
//! episodic (raw incident histories), semantic (compressed rules of thumb),
//! policy (per-rule effectiveness), and economic (cost budgets and ROI).
//! The knowledge distiller compresses episodic memories into semantic facts;
//! the exchange module shares high-confidence facts with peers.

mod distiller;
mod economic;
mod episodic;
mod exchange;
mod policy_memory;
mod semantic;

pub use distiller::{DistillationReport, KnowledgeDistiller};
pub use economic::{ActionCost, CostBudget, CostReport, EconomicMemory};
pub use episodic::{
    EpisodeSnapshot, EpisodicStore, FinalOutcome, IncidentMemory, SuccessPatterns,
};
pub use exchange::{ThreatDnaBundle, ThreatDnaExchange};
pub use policy_memory::{PolicyApplication, PolicyMemory, PolicyRecord, PolicySuggestion};
pub use semantic::{SemanticFact, SemanticStore, ToolPattern};

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::types::MemoryError;

/// The four memory layers, opened together so the autonomy loop can drive
/// all of them on every step.
#[derive(Clone)]
pub struct MemoryLayers {
    pub episodic: Arc<EpisodicStore>,
    pub semantic: Arc<SemanticStore>,
    pub policy: Arc<PolicyMemory>,
    pub economic: Arc<EconomicMemory>,
}

impl MemoryLayers {
    /// Open every layer under the configured storage root.
    pub fn open(storage: &StorageConfig) -> Result<Self, MemoryError> {
        Ok(Self {
            episodic: Arc::new(EpisodicStore::new(storage.episodic_dir())?),
            semantic: Arc::new(SemanticStore::new(storage.semantic_dir())?),
            policy: Arc::new(PolicyMemory::new(storage.policy_memory_dir())?),
            economic: Arc::new(EconomicMemory::new(storage.economic_dir())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn layers_open_under_one_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = StorageConfig {
            data_root: PathBuf::from(dir.path()),
        };
        let layers = MemoryLayers::open(&storage).unwrap();
        assert_eq!(layers.episodic.load_all().len(), 0);
        assert_eq!(layers.semantic.fact_count(), 0);
        assert!(layers.policy.all_records().is_empty());
        assert!(layers.economic.get_budget("nobody").is_none());
        // Every layer landed under the same data root.
        assert!(dir.path().join("data/episodic_memory").is_dir());
        assert!(dir.path().join("data/semantic_memory").is_dir());
        assert!(dir.path().join("data/policy_memory").is_dir());
        assert!(dir.path().join("data/economic_memory").is_dir());
    }
}

