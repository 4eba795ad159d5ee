//! Cognitive traces and the replay buffer
//!
//! Every reasoning step leaves a trace file on disk keyed by a hash of
//! (observation, reasoning, action), and every executed step lands in the
//! replay buffer. Both are local artifacts; neither passes through the
//! sanitizer because they never leave the machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::executor::Outcome;
use crate::policy::ProposedAction;
use crate::types::{IncidentId, MemoryError};

/// Writes one JSON file per reasoning step under `data/cognitive_trace/`.
pub struct CognitiveTraceWriter {
    trace_dir: PathBuf,
}

impl CognitiveTraceWriter {
    pub fn new(trace_dir: PathBuf) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(&trace_dir)?;
        Ok(Self { trace_dir })
    }

    /// Hash tying the trace to exactly what the model saw and proposed:
    /// SHA-256(observation ‖ reasoning ‖ canonical action).
    pub fn reasoning_hash(observation: &str, reasoning: &str, action: &ProposedAction) -> String {
        let mut hasher = Sha256::new();
        hasher.update(observation.as_bytes());
        hasher.update(reasoning.as_bytes());
        hasher.update(action.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Persist one trace record; returns the reasoning hash.
    pub fn record(
        &self,
        observation: &str,
        reasoning: &str,
        confidence: f64,
        action: &ProposedAction,
    ) -> Result<String, MemoryError> {
        let hash = Self::reasoning_hash(observation, reasoning, action);
        let timestamp = Utc::now();
        let filename = format!("{}_{}.json", timestamp.format("%Y%m%d_%H%M%S_%6f"), hash);

        let record = serde_json::json!({
            "reasoning_hash": hash,
            "reasoning": reasoning,
            "confidence": confidence,
            "action": action,
            "timestamp": timestamp.to_rfc3339(),
        });
        std::fs::write(
            self.trace_dir.join(filename),
            serde_json::to_string_pretty(&record)?,
        )?;
        Ok(hash)
    }
}

/// One replay entry: the full context of an executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub incident_id: IncidentId,
    pub observation: String,
    pub action: ProposedAction,
    pub outcome: ReplayOutcome,
    pub resolution_time_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

/// Compressed outcome stored in replay entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub side_effects: bool,
}

impl From<&Outcome> for ReplayOutcome {
    fn from(outcome: &Outcome) -> Self {
        Self {
            success: outcome.success,
            error: outcome.error.clone(),
            side_effects: outcome.side_effects,
        }
    }
}

/// Append-only replay buffer: in-memory list plus one JSON file per step
/// under `replay_buffer/`.
pub struct ReplayBuffer {
    buffer_dir: PathBuf,
    entries: parking_lot::Mutex<Vec<ReplayEntry>>,
}

impl ReplayBuffer {
    pub fn new(buffer_dir: PathBuf) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(&buffer_dir)?;
        Ok(Self {
            buffer_dir,
            entries: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Record one executed step.
    pub fn record(
        &self,
        incident_id: &IncidentId,
        observation: &str,
        action: &ProposedAction,
        outcome: &Outcome,
        resolution_time_seconds: i64,
    ) -> Result<(), MemoryError> {
        let entry = ReplayEntry {
            incident_id: incident_id.clone(),
            observation: observation.to_string(),
            action: action.clone(),
            outcome: ReplayOutcome::from(outcome),
            resolution_time_seconds,
            timestamp: Utc::now(),
        };

        let filename = format!(
            "{}_{}.json",
            incident_id,
            entry.timestamp.format("%Y%m%d_%H%M%S")
        );
        std::fs::write(
            self.buffer_dir.join(filename),
            serde_json::to_string_pretty(&entry)?,
        )?;

        self.entries.lock().push(entry);
        Ok(())
    }

    /// All entries recorded this process lifetime.
    pub fn entries(&self) -> Vec<ReplayEntry> {
        self.entries.lock().clone()
    }

    /// Entries for one incident.
    pub fn entries_for(&self, incident_id: &IncidentId) -> Vec<ReplayEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| &e.incident_id == incident_id)
            .cloned()
            .collect()
    }
}
