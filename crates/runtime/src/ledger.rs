//! Trust ledger
//!
//! Local, append-only audit trail with cryptographic integrity. Every entry
//! hashes the canonical JSON of its own fields and links to its
//! predecessor's hash, so any tampering breaks the chain. The chain starts
//! at a fixed genesis hash. Appends are totally ordered per ledger: one
//! writer at a time.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::LedgerError;

/// Kinds of ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Finding,
    FixProposal,
    Approval,
    Execution,
    Verification,
    Rollback,
    PolicyCheck,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryType::Finding => "finding",
            EntryType::FixProposal => "fix_proposal",
            EntryType::Approval => "approval",
            EntryType::Execution => "execution",
            EntryType::Verification => "verification",
            EntryType::Rollback => "rollback",
            EntryType::PolicyCheck => "policy_check",
        };
        write!(f, "{}", s)
    }
}

/// An immutable, hash-chained ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub entry_type: EntryType,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource_id: String,
    pub data: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
}

impl LedgerEntry {
    /// SHA-256 over the canonical JSON of every field except `hash`.
    ///
    /// serde_json's default map is key-sorted, so nested `data` objects
    /// canonicalize too.
    pub fn compute_hash(&self) -> String {
        let canonical = serde_json::json!({
            "action": self.action,
            "actor": self.actor,
            "data": self.data,
            "entry_type": self.entry_type,
            "id": self.id,
            "previous_hash": self.previous_hash,
            "resource_id": self.resource_id,
            "timestamp": self.timestamp.to_rfc3339(),
        });
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }

    /// Whether the stored hash matches the entry's contents.
    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// The chain's fixed starting point.
pub fn genesis_hash() -> String {
    hex::encode(Sha256::digest(b"genesis"))
}

/// Append-only trust ledger, optionally persisted as `ledger.jsonl`.
pub struct TrustLedger {
    path: Option<PathBuf>,
    entries: Mutex<Vec<LedgerEntry>>,
}

impl TrustLedger {
    /// In-memory ledger (tests, ephemeral runs).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Open (or create) a persistent ledger at `path`, verifying the chain
    /// that is already on disk.
    pub fn open(path: PathBuf) -> Result<Self, LedgerError> {
        let mut entries = Vec::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                entries.push(serde_json::from_str::<LedgerEntry>(line)?);
            }
        }
        let ledger = Self {
            path: Some(path),
            entries: Mutex::new(entries),
        };
        ledger.verify()?;
        Ok(ledger)
    }

    /// Append one entry. The previous hash is taken under the same lock
    /// that stores the entry, which is what keeps the chain total-ordered.
    pub fn append(
        &self,
        entry_type: EntryType,
        actor: &str,
        action: &str,
        resource_id: &str,
        data: serde_json::Value,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self.entries.lock();
        let previous_hash = entries
            .last()
            .map_or_else(genesis_hash, |entry| entry.hash.clone());

        let mut entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            entry_type,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            resource_id: resource_id.to_string(),
            data,
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();

        if let Some(path) = &self.path {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        }

        tracing::debug!(entry_type = %entry.entry_type, actor, "ledger entry appended");
        entries.push(entry.clone());
        Ok(entry)
    }

    /// Verify every hash and every previous-hash link.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let entries = self.entries.lock();
        let mut expected_previous = genesis_hash();
        for (index, entry) in entries.iter().enumerate() {
            if !entry.verify() {
                return Err(LedgerError::HashMismatch { index });
            }
            if entry.previous_hash != expected_previous {
                return Err(LedgerError::BrokenLink { index });
            }
            expected_previous = entry.hash.clone();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().clone()
    }

    // Typed helpers for the common entry shapes.

    pub fn log_finding(
        &self,
        finding_id: &str,
        finding_type: &str,
        severity: &str,
        resource: &str,
        detector: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(
            EntryType::Finding,
            detector,
            "finding_detected",
            finding_id,
            serde_json::json!({
                "finding_type": finding_type,
                "severity": severity,
                "resource": resource,
            }),
        )
    }

    pub fn log_fix_proposal(
        &self,
        fix_id: &str,
        finding_id: &str,
        description: &str,
        proposer: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(
            EntryType::FixProposal,
            proposer,
            "fix_proposed",
            fix_id,
            serde_json::json!({
                "finding_id": finding_id,
                "description": description,
            }),
        )
    }

    pub fn log_approval(
        &self,
        approval_id: &str,
        fix_id: &str,
        approved: bool,
        approver: &str,
        reason: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(
            EntryType::Approval,
            approver,
            if approved { "approved" } else { "rejected" },
            approval_id,
            serde_json::json!({
                "fix_id": fix_id,
                "approved": approved,
                "reason": reason,
            }),
        )
    }

    pub fn log_execution(
        &self,
        execution_id: &str,
        fix_id: &str,
        status: &str,
        executor: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(
            EntryType::Execution,
            executor,
            &format!("executed_{}", status),
            execution_id,
            serde_json::json!({
                "fix_id": fix_id,
                "status": status,
            }),
        )
    }

    pub fn log_verification(
        &self,
        verification_id: &str,
        execution_id: &str,
        passed: bool,
        checks: &[String],
        verifier: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(
            EntryType::Verification,
            verifier,
            if passed { "verified_passed" } else { "verified_failed" },
            verification_id,
            serde_json::json!({
                "execution_id": execution_id,
                "passed": passed,
                "checks": checks,
            }),
        )
    }

    pub fn log_policy_check(
        &self,
        incident_id: &str,
        tool: &str,
        decision: &str,
        reason: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(
            EntryType::PolicyCheck,
            "policy_engine",
            decision,
            incident_id,
            serde_json::json!({
                "tool": tool,
                "reason": reason,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn genesis_hash_is_fixed() {
        assert_eq!(genesis_hash(), genesis_hash());
        assert_eq!(genesis_hash().len(), 64);
    }

    #[test]
    fn entries_chain_from_genesis() {
        let ledger = TrustLedger::in_memory();
        let first = ledger
            .log_finding("F-1", "SQL_INJECTION", "high", "api/users.js", "scanner")
            .unwrap();
        assert_eq!(first.previous_hash, genesis_hash());
        assert!(first.verify());

        let second = ledger
            .log_fix_proposal("FIX-1", "F-1", "parameterize the query", "agent")
            .unwrap();
        assert_eq!(second.previous_hash, first.hash);
        ledger.verify().unwrap();
    }

    #[test]
    fn hash_covers_every_field() {
        let ledger = TrustLedger::in_memory();
        let entry = ledger
            .log_execution("EXE-1", "FIX-1", "success", "executor")
            .unwrap();

        let mut tampered = entry.clone();
        tampered.action = "executed_failure".to_string();
        assert!(!tampered.verify());

        let mut data_tampered = entry.clone();
        data_tampered.data = serde_json::json!({"fix_id": "FIX-other", "status": "success"});
        assert!(!data_tampered.verify());
    }

    #[test]
    fn verify_detects_hash_tampering() {
        let ledger = TrustLedger::in_memory();
        ledger
            .log_finding("F-1", "XSS", "medium", "web/render", "scanner")
            .unwrap();
        ledger
            .log_finding("F-2", "XSS", "medium", "web/other", "scanner")
            .unwrap();

        // Tamper with the first entry in place.
        ledger.entries.lock()[0].data = serde_json::json!({"severity": "low"});
        let err = ledger.verify().unwrap_err();
        assert!(matches!(err, LedgerError::HashMismatch { index: 0 }));
    }

    #[test]
    fn verify_detects_broken_linkage() {
        let ledger = TrustLedger::in_memory();
        ledger
            .log_finding("F-1", "XSS", "medium", "a", "scanner")
            .unwrap();
        ledger
            .log_finding("F-2", "XSS", "medium", "b", "scanner")
            .unwrap();

        // Re-link the second entry to a bogus predecessor and re-hash it so
        // only the linkage is wrong.
        {
            let mut entries = ledger.entries.lock();
            entries[1].previous_hash = "0".repeat(64);
            entries[1].hash = entries[1].compute_hash();
        }
        let err = ledger.verify().unwrap_err();
        assert!(matches!(err, LedgerError::BrokenLink { index: 1 }));
    }

    #[test]
    fn persists_and_reopens_with_valid_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        {
            let ledger = TrustLedger::open(path.clone()).unwrap();
            ledger
                .log_finding("F-1", "SQL_INJECTION", "high", "x", "scanner")
                .unwrap();
            ledger
                .log_approval("A-1", "FIX-1", true, "alice", None)
                .unwrap();
        }

        let ledger = TrustLedger::open(path).unwrap();
        assert_eq!(ledger.len(), 2);
        ledger.verify().unwrap();

        // The chain continues across restarts.
        let entry = ledger
            .log_verification("V-1", "EXE-1", true, &["tests_pass".to_string()], "verifier")
            .unwrap();
        assert_eq!(entry.previous_hash, ledger.entries()[1].hash);
    }

    #[test]
    fn reopening_tampered_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        {
            let ledger = TrustLedger::open(path.clone()).unwrap();
            ledger
                .log_finding("F-1", "XSS", "low", "x", "scanner")
                .unwrap();
        }

        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"severity\":\"low\"", "\"severity\":\"info\"");
        std::fs::write(&path, tampered).unwrap();

        assert!(TrustLedger::open(path).is_err());
    }
}
