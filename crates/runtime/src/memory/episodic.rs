//! Episodic memory
//!
//! Structured, queryable memory of complete incidents: every observation,
//! decision, and outcome, in step order. This is not a log stream; closed
//! incidents are persisted one file per incident and become the raw
//! material for the knowledge distiller.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::executor::Outcome;
use crate::policy::{DecisionKind, ProposedAction};
use crate::types::{EpisodeId, IncidentId, MemoryError};

/// How an incident ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalOutcome {
    Resolved,
    Escalated,
    Failed,
}

impl std::fmt::Display for FinalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinalOutcome::Resolved => "resolved",
            FinalOutcome::Escalated => "escalated",
            FinalOutcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One step of an incident: state, decision, and outcome at that moment.
///
/// Back references to prior episodes are ids, not owning references, so
/// snapshots serialize without cycles and copy trivially.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSnapshot {
    pub episode_id: EpisodeId,
    pub incident_id: IncidentId,
    pub timestamp: DateTime<Utc>,
    pub observation: String,
    #[serde(default)]
    pub system_state: HashMap<String, serde_json::Value>,
    pub action_taken: Option<ProposedAction>,
    pub policy_decision: DecisionKind,
    /// Model confidence at decision time (0-100 scale).
    pub confidence: f64,
    pub outcome: Option<Outcome>,
    /// Ids of up to the last three episodes before this one.
    #[serde(default)]
    pub prior_episode_ids: Vec<EpisodeId>,
}

/// Complete memory of one incident. Episodes append monotonically; close is
/// idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentMemory {
    pub incident_id: IncidentId,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub final_outcome: Option<FinalOutcome>,
    pub episodes: Vec<EpisodeSnapshot>,
    pub resolution_time_seconds: i64,
    pub actions_taken: u32,
    pub successful_actions: u32,
}

impl IncidentMemory {
    pub fn new(incident_id: IncidentId) -> Self {
        Self {
            incident_id,
            started_at: Utc::now(),
            resolved_at: None,
            final_outcome: None,
            episodes: Vec::new(),
            resolution_time_seconds: 0,
            actions_taken: 0,
            successful_actions: 0,
        }
    }

    pub fn add_episode(&mut self, episode: EpisodeSnapshot) {
        if episode.action_taken.is_some() {
            self.actions_taken += 1;
        }
        if episode.outcome.as_ref().is_some_and(|o| o.success) {
            self.successful_actions += 1;
        }
        self.episodes.push(episode);
    }

    /// Close the incident. Calling close on an already-closed incident keeps
    /// the first resolution.
    pub fn close(&mut self, outcome: FinalOutcome) {
        if self.resolved_at.is_some() {
            return;
        }
        let now = Utc::now();
        self.resolved_at = Some(now);
        self.final_outcome = Some(outcome);
        self.resolution_time_seconds = (now - self.started_at).num_seconds();
    }

    pub fn is_closed(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Persistent episodic store: bounded in-memory cache over one JSON file
/// per incident. Disk is authoritative once an incident closes.
pub struct EpisodicStore {
    storage_path: PathBuf,
    cache: Mutex<HashMap<IncidentId, IncidentMemory>>,
    cache_limit: usize,
}

impl EpisodicStore {
    pub fn new(storage_path: PathBuf) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(&storage_path)?;
        Ok(Self {
            storage_path,
            cache: Mutex::new(HashMap::new()),
            cache_limit: 100,
        })
    }

    /// Begin tracking a new incident.
    pub fn start_incident(&self, incident_id: &IncidentId) -> IncidentMemory {
        let memory = IncidentMemory::new(incident_id.clone());
        self.cache
            .lock()
            .insert(incident_id.clone(), memory.clone());
        tracing::info!(incident = %incident_id, "started episodic memory");
        memory
    }

    /// Record one episode in an incident's memory. Starts the incident if
    /// the loop has not done so yet.
    #[allow(clippy::too_many_arguments)]
    pub fn record_episode(
        &self,
        incident_id: &IncidentId,
        observation: &str,
        system_state: HashMap<String, serde_json::Value>,
        action: Option<ProposedAction>,
        policy_decision: DecisionKind,
        confidence: f64,
        outcome: Option<Outcome>,
    ) -> EpisodeSnapshot {
        let mut cache = self.cache.lock();
        let memory = cache
            .entry(incident_id.clone())
            .or_insert_with(|| IncidentMemory::new(incident_id.clone()));

        let prior_episode_ids = memory
            .episodes
            .iter()
            .rev()
            .take(3)
            .map(|e| e.episode_id.clone())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let episode = EpisodeSnapshot {
            episode_id: EpisodeId::for_step(incident_id, memory.episodes.len()),
            incident_id: incident_id.clone(),
            timestamp: Utc::now(),
            observation: observation.to_string(),
            system_state,
            action_taken: action,
            policy_decision,
            confidence,
            outcome,
            prior_episode_ids,
        };

        memory.add_episode(episode.clone());
        episode
    }

    /// Close an incident, persist it, and evict the oldest cache entry when
    /// over the limit. Idempotent per incident.
    pub fn close_incident(
        &self,
        incident_id: &IncidentId,
        outcome: FinalOutcome,
    ) -> Result<Option<IncidentMemory>, MemoryError> {
        let closed = {
            let mut cache = self.cache.lock();
            let Some(memory) = cache.get_mut(incident_id) else {
                return Ok(None);
            };
            memory.close(outcome);
            let closed = memory.clone();

            if cache.len() > self.cache_limit {
                if let Some(oldest) = cache
                    .values()
                    .min_by_key(|m| m.started_at)
                    .map(|m| m.incident_id.clone())
                {
                    cache.remove(&oldest);
                }
            }
            closed
        };

        self.persist(&closed)?;
        tracing::info!(
            incident = %incident_id,
            outcome = %closed.final_outcome.map(|o| o.to_string()).unwrap_or_default(),
            actions = closed.actions_taken,
            "closed incident"
        );
        Ok(Some(closed))
    }

    /// Fetch an incident from cache or disk.
    pub fn get_incident(&self, incident_id: &IncidentId) -> Option<IncidentMemory> {
        if let Some(memory) = self.cache.lock().get(incident_id) {
            return Some(memory.clone());
        }
        self.load(incident_id)
    }

    /// Find past incidents whose observations overlap the given one.
    ///
    /// Plain word-set overlap; vector search is deliberately out of scope.
    pub fn find_similar(&self, observation: &str, limit: usize) -> Vec<IncidentMemory> {
        let observation_words: HashSet<String> = observation
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();

        let mut scored: Vec<(usize, IncidentMemory)> = Vec::new();
        for memory in self.load_all() {
            if memory.episodes.is_empty() {
                continue;
            }
            let mut memory_words: HashSet<String> = HashSet::new();
            for episode in &memory.episodes {
                memory_words.extend(
                    episode
                        .observation
                        .to_lowercase()
                        .split_whitespace()
                        .map(String::from),
                );
            }
            let overlap = observation_words.intersection(&memory_words).count();
            if overlap > 0 {
                scored.push((overlap, memory));
            }
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, m)| m).collect()
    }

    /// All incident memories currently on disk.
    pub fn load_all(&self) -> Vec<IncidentMemory> {
        let mut memories = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.storage_path) else {
            return memories;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                match self.load_file(&path) {
                    Ok(memory) => memories.push(memory),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to load incident")
                    }
                }
            }
        }
        memories
    }

    /// Aggregate statistics over resolved incidents.
    pub fn success_patterns(&self) -> SuccessPatterns {
        let mut success_count = 0u32;
        let mut total_time = 0i64;
        let mut tool_counts: HashMap<String, u32> = HashMap::new();

        for memory in self.load_all() {
            if memory.final_outcome == Some(FinalOutcome::Resolved) {
                success_count += 1;
                total_time += memory.resolution_time_seconds;
                for episode in &memory.episodes {
                    if let Some(action) = &episode.action_taken {
                        *tool_counts.entry(action.tool.clone()).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut most_used: Vec<(String, u32)> = tool_counts.into_iter().collect();
        most_used.sort_by(|a, b| b.1.cmp(&a.1));
        most_used.truncate(5);

        SuccessPatterns {
            success_count,
            avg_resolution_time_seconds: total_time as f64 / success_count.max(1) as f64,
            most_used_tools: most_used,
        }
    }

    fn incident_path(&self, incident_id: &IncidentId) -> PathBuf {
        self.storage_path.join(format!("{}.json", incident_id))
    }

    fn persist(&self, memory: &IncidentMemory) -> Result<(), MemoryError> {
        let path = self.incident_path(&memory.incident_id);
        let json = serde_json::to_string_pretty(memory)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn load(&self, incident_id: &IncidentId) -> Option<IncidentMemory> {
        self.load_file(&self.incident_path(incident_id)).ok()
    }

    fn load_file(&self, path: &std::path::Path) -> Result<IncidentMemory, MemoryError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Summary of what has worked across resolved incidents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessPatterns {
    pub success_count: u32,
    pub avg_resolution_time_seconds: f64,
    pub most_used_tools: Vec<(String, u32)>,
}
