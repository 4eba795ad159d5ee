//! Approval queue implementation

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::ApprovalConfig;
use crate::policy::ProposedAction;
use crate::types::{ApprovalError, ApprovalId, IncidentId, RiskLevel};

/// Status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    AutoApproved,
}

/// A queued approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub incident_id: Option<IncidentId>,
    /// The proposed action, serialized for display to approvers.
    pub action_data: serde_json::Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
    pub risk_level: RiskLevel,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
}

struct RequestSlot {
    request: Mutex<ApprovalRequest>,
    changed: Notify,
}

/// The approval gate: queue, auto-approval ladder, and waiters.
pub struct ApprovalGate {
    config: ApprovalConfig,
    requests: DashMap<ApprovalId, Arc<RequestSlot>>,
    /// Directory holding legacy `<incident>.approve` token files.
    approvals_dir: PathBuf,
}

impl ApprovalGate {
    pub fn new(config: ApprovalConfig, approvals_dir: PathBuf) -> Self {
        Self {
            config,
            requests: DashMap::new(),
            approvals_dir,
        }
    }

    /// Decide whether an action may proceed immediately.
    ///
    /// Returns `(true, None)` when auto-approved, or `(false, Some(id))`
    /// with a pending request the caller should wait on.
    pub fn check_approval(
        &self,
        incident_id: &IncidentId,
        action: &ProposedAction,
        risk_level: RiskLevel,
        context: &HashMap<String, String>,
    ) -> (bool, Option<ApprovalId>) {
        // Sensitive paths always require a human, at elevated risk.
        if self.touches_sensitive_path(action) {
            tracing::info!(tool = %action.tool, "action touches sensitive path, requiring approval");
            let id = self.create_request(incident_id, action, RiskLevel::High, context);
            return (false, Some(id));
        }

        if risk_level <= RiskLevel::Low && self.config.auto_approve_low {
            tracing::debug!(tool = %action.tool, "auto-approved (low risk)");
            return (true, None);
        }

        if risk_level == RiskLevel::Medium && self.config.auto_approve_medium {
            tracing::debug!(tool = %action.tool, "auto-approved (medium risk, policy allows)");
            return (true, None);
        }

        if let Some(source) = context.get("source") {
            if self.config.trusted_sources.iter().any(|s| s == source) {
                tracing::info!(%source, "auto-approved (trusted source)");
                return (true, None);
            }
        }

        let id = self.create_request(incident_id, action, risk_level, context);
        (false, Some(id))
    }

    /// Queue a request unconditionally, bypassing the auto-approval ladder.
    ///
    /// Used by the autonomy loop when the policy engine (or its
    /// low-confidence override) has already decided a human must look.
    pub fn enqueue(
        &self,
        incident_id: &IncidentId,
        action: &ProposedAction,
        risk_level: RiskLevel,
        context: &HashMap<String, String>,
    ) -> ApprovalId {
        self.create_request(incident_id, action, risk_level, context)
    }

    fn touches_sensitive_path(&self, action: &ProposedAction) -> bool {
        let mut haystack = action.tool.to_lowercase();
        haystack.push(' ');
        haystack.push_str(
            &serde_json::Value::Object(action.args.clone())
                .to_string()
                .to_lowercase(),
        );
        self.config
            .sensitive_paths
            .iter()
            .any(|marker| haystack.contains(&marker.to_lowercase()))
    }

    fn create_request(
        &self,
        incident_id: &IncidentId,
        action: &ProposedAction,
        risk_level: RiskLevel,
        context: &HashMap<String, String>,
    ) -> ApprovalId {
        let id = ApprovalId::new();
        let now = Utc::now();
        let expires_at = now
            + Duration::from_std(self.config.approval_timeout)
                .unwrap_or_else(|_| Duration::seconds(3600));

        let request = ApprovalRequest {
            id,
            incident_id: Some(incident_id.clone()),
            action_data: serde_json::json!({
                "tool": action.tool,
                "args": action.args,
                "reasoning": action.reasoning,
                "confidence": action.model_confidence,
            }),
            context: context.clone(),
            risk_level,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejected_by: None,
            rejection_reason: None,
        };

        tracing::info!(request = %id, risk = %risk_level, "approval request created");
        self.requests.insert(
            id,
            Arc::new(RequestSlot {
                request: Mutex::new(request),
                changed: Notify::new(),
            }),
        );
        id
    }

    /// Current status, transitioning pending requests past their deadline
    /// to expired.
    pub fn status(&self, id: ApprovalId) -> Option<ApprovalStatus> {
        let slot = self.requests.get(&id)?;
        let mut request = slot.request.lock();
        if request.status == ApprovalStatus::Pending && Utc::now() > request.expires_at {
            request.status = ApprovalStatus::Expired;
            slot.changed.notify_waiters();
        }
        Some(request.status)
    }

    pub fn get_request(&self, id: ApprovalId) -> Option<ApprovalRequest> {
        let _ = self.status(id);
        self.requests.get(&id).map(|slot| slot.request.lock().clone())
    }

    /// Approve a pending request.
    pub fn approve(&self, id: ApprovalId, approver: &str) -> Result<(), ApprovalError> {
        self.decide(id, |request| {
            request.status = ApprovalStatus::Approved;
            request.approved_at = Some(Utc::now());
            request.approved_by = Some(approver.to_string());
            tracing::info!(request = %id, approver, "approval granted");
        })
    }

    /// Reject a pending request.
    pub fn reject(&self, id: ApprovalId, rejector: &str, reason: &str) -> Result<(), ApprovalError> {
        self.decide(id, |request| {
            request.status = ApprovalStatus::Rejected;
            request.rejected_at = Some(Utc::now());
            request.rejected_by = Some(rejector.to_string());
            request.rejection_reason = Some(reason.to_string());
            tracing::info!(request = %id, rejector, reason, "approval rejected");
        })
    }

    fn decide(
        &self,
        id: ApprovalId,
        apply: impl FnOnce(&mut ApprovalRequest),
    ) -> Result<(), ApprovalError> {
        let slot = self
            .requests
            .get(&id)
            .ok_or(ApprovalError::NotFound(id))?
            .clone();
        let mut request = slot.request.lock();

        if request.status == ApprovalStatus::Pending && Utc::now() > request.expires_at {
            request.status = ApprovalStatus::Expired;
            slot.changed.notify_waiters();
            return Err(ApprovalError::Expired(id));
        }
        if request.status != ApprovalStatus::Pending {
            return Err(ApprovalError::NotPending(id));
        }

        apply(&mut request);
        drop(request);
        slot.changed.notify_waiters();
        Ok(())
    }

    /// Wait until the request reaches a terminal status.
    ///
    /// The notifier is armed before the status check, so a decision made
    /// between the caller's enqueue and this wait is observed immediately.
    /// Expiry is enforced here as well: the wait never outlives
    /// `expires_at`.
    pub async fn wait_for_decision(&self, id: ApprovalId) -> Result<ApprovalStatus, ApprovalError> {
        let slot = self
            .requests
            .get(&id)
            .ok_or(ApprovalError::NotFound(id))?
            .clone();

        loop {
            let notified = slot.changed.notified();
            tokio::pin!(notified);
            // Register with the notifier BEFORE reading status, so a
            // decision signaled in between is not lost.
            notified.as_mut().enable();

            let (status, expires_at) = {
                let request = slot.request.lock();
                (request.status, request.expires_at)
            };
            if status != ApprovalStatus::Pending {
                return Ok(status);
            }

            let until_expiry = (expires_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(until_expiry) => {
                    let mut request = slot.request.lock();
                    if request.status == ApprovalStatus::Pending {
                        request.status = ApprovalStatus::Expired;
                        tracing::warn!(request = %id, "approval request expired");
                    }
                    slot.changed.notify_waiters();
                    return Ok(request.status);
                }
            }
        }
    }

    /// Whether the legacy file token `approvals/<incident>.approve` exists.
    ///
    /// The queue is authoritative; the file is honored as a fallback for
    /// operators approving from a shell.
    pub fn legacy_file_approval(&self, incident_id: &IncidentId) -> bool {
        self.approvals_dir
            .join(format!("{}.approve", incident_id))
            .exists()
    }

    /// All currently pending, unexpired requests.
    pub fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let mut pending = Vec::new();
        for entry in self.requests.iter() {
            let mut request = entry.value().request.lock();
            if request.status == ApprovalStatus::Pending {
                if Utc::now() > request.expires_at {
                    request.status = ApprovalStatus::Expired;
                    entry.value().changed.notify_waiters();
                } else {
                    pending.push(request.clone());
                }
            }
        }
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Most recent requests in any status.
    pub fn history(&self, limit: usize) -> Vec<ApprovalRequest> {
        let mut all: Vec<ApprovalRequest> = self
            .requests
            .iter()
            .map(|entry| entry.value().request.lock().clone())
            .collect();
        all.sort_by_key(|r| r.created_at);
        if all.len() > limit {
            all.drain(..all.len() - limit);
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gate() -> (ApprovalGate, TempDir) {
        let dir = TempDir::new().unwrap();
        let gate = ApprovalGate::new(ApprovalConfig::default(), dir.path().to_path_buf());
        (gate, dir)
    }

    fn incident() -> IncidentId {
        IncidentId::new("INC-1")
    }

    #[test]
    fn low_risk_auto_approves() {
        let (gate, _dir) = gate();
        let action = ProposedAction::new("get_logs");
        let (approved, id) =
            gate.check_approval(&incident(), &action, RiskLevel::Low, &HashMap::new());
        assert!(approved);
        assert!(id.is_none());
    }

    #[test]
    fn medium_risk_queues_by_default() {
        let (gate, _dir) = gate();
        let action = ProposedAction::new("scale_pod");
        let (approved, id) =
            gate.check_approval(&incident(), &action, RiskLevel::Medium, &HashMap::new());
        assert!(!approved);
        let id = id.unwrap();
        assert_eq!(gate.status(id), Some(ApprovalStatus::Pending));
    }

    #[test]
    fn medium_risk_auto_approves_when_policy_allows() {
        let dir = TempDir::new().unwrap();
        let config = ApprovalConfig {
            auto_approve_medium: true,
            ..ApprovalConfig::default()
        };
        let gate = ApprovalGate::new(config, dir.path().to_path_buf());
        let (approved, _) = gate.check_approval(
            &incident(),
            &ProposedAction::new("scale_pod"),
            RiskLevel::Medium,
            &HashMap::new(),
        );
        assert!(approved);
    }

    #[test]
    fn sensitive_path_forces_high_risk_request() {
        let (gate, _dir) = gate();
        // Low risk, but the args reference a sensitive path marker.
        let action = ProposedAction::new("update_config")
            .with_arg("file_path", serde_json::json!("/etc/shadow"));
        let (approved, id) =
            gate.check_approval(&incident(), &action, RiskLevel::Low, &HashMap::new());
        assert!(!approved);
        let request = gate.get_request(id.unwrap()).unwrap();
        assert_eq!(request.risk_level, RiskLevel::High);
    }

    #[test]
    fn trusted_source_auto_approves() {
        let dir = TempDir::new().unwrap();
        let config = ApprovalConfig {
            trusted_sources: vec!["pagerduty".to_string()],
            ..ApprovalConfig::default()
        };
        let gate = ApprovalGate::new(config, dir.path().to_path_buf());
        let mut context = HashMap::new();
        context.insert("source".to_string(), "pagerduty".to_string());
        let (approved, _) = gate.check_approval(
            &incident(),
            &ProposedAction::new("rollback_deploy"),
            RiskLevel::High,
            &context,
        );
        assert!(approved);
    }

    #[test]
    fn approve_and_reject_transitions() {
        let (gate, _dir) = gate();
        let (_, id) = gate.check_approval(
            &incident(),
            &ProposedAction::new("rollback_deploy"),
            RiskLevel::High,
            &HashMap::new(),
        );
        let id = id.unwrap();

        gate.approve(id, "alice").unwrap();
        let request = gate.get_request(id).unwrap();
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert_eq!(request.approved_by.as_deref(), Some("alice"));

        // A second decision fails: not pending any more.
        assert!(matches!(
            gate.reject(id, "bob", "no"),
            Err(ApprovalError::NotPending(_))
        ));
    }

    #[test]
    fn unknown_request_is_not_found() {
        let (gate, _dir) = gate();
        assert!(matches!(
            gate.approve(ApprovalId::new(), "alice"),
            Err(ApprovalError::NotFound(_))
        ));
    }

    #[test]
    fn expired_request_cannot_be_decided() {
        let dir = TempDir::new().unwrap();
        let config = ApprovalConfig {
            approval_timeout: std::time::Duration::ZERO,
            ..ApprovalConfig::default()
        };
        let gate = ApprovalGate::new(config, dir.path().to_path_buf());
        let (_, id) = gate.check_approval(
            &incident(),
            &ProposedAction::new("rollback_deploy"),
            RiskLevel::High,
            &HashMap::new(),
        );
        let id = id.unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(matches!(gate.approve(id, "alice"), Err(ApprovalError::Expired(_))));
        assert_eq!(gate.status(id), Some(ApprovalStatus::Expired));
    }

    #[tokio::test]
    async fn waiter_sees_decision_made_before_wait_starts() {
        let (gate, _dir) = gate();
        let (_, id) = gate.check_approval(
            &incident(),
            &ProposedAction::new("rollback_deploy"),
            RiskLevel::High,
            &HashMap::new(),
        );
        let id = id.unwrap();

        // Decision lands before anyone waits.
        gate.approve(id, "alice").unwrap();
        let status = gate.wait_for_decision(id).await.unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn waiter_wakes_on_decision() {
        let dir = TempDir::new().unwrap();
        let gate = std::sync::Arc::new(ApprovalGate::new(
            ApprovalConfig::default(),
            dir.path().to_path_buf(),
        ));
        let (_, id) = gate.check_approval(
            &incident(),
            &ProposedAction::new("rollback_deploy"),
            RiskLevel::High,
            &HashMap::new(),
        );
        let id = id.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_decision(id).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.reject(id, "bob", "too risky").unwrap();

        let status = waiter.await.unwrap().unwrap();
        assert_eq!(status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn waiter_observes_expiry() {
        let dir = TempDir::new().unwrap();
        let config = ApprovalConfig {
            approval_timeout: std::time::Duration::from_millis(30),
            ..ApprovalConfig::default()
        };
        let gate = ApprovalGate::new(config, dir.path().to_path_buf());
        let (_, id) = gate.check_approval(
            &incident(),
            &ProposedAction::new("rollback_deploy"),
            RiskLevel::High,
            &HashMap::new(),
        );
        let status = gate.wait_for_decision(id.unwrap()).await.unwrap();
        assert_eq!(status, ApprovalStatus::Expired);
    }

    #[test]
    fn legacy_file_token_is_detected() {
        let (gate, dir) = gate();
        let incident = incident();
        assert!(!gate.legacy_file_approval(&incident));
        std::fs::write(dir.path().join("INC-1.approve"), "ok").unwrap();
        assert!(gate.legacy_file_approval(&incident));
    }

    #[test]
    fn pending_list_excludes_decided_and_expired() {
        let (gate, _dir) = gate();
        let (_, first) = gate.check_approval(
            &incident(),
            &ProposedAction::new("rollback_deploy"),
            RiskLevel::High,
            &HashMap::new(),
        );
        let (_, _second) = gate.check_approval(
            &incident(),
            &ProposedAction::new("wipe_cache"),
            RiskLevel::Critical,
            &HashMap::new(),
        );
        gate.approve(first.unwrap(), "alice").unwrap();

        let pending = gate.pending_requests();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action_data["tool"], "wipe_cache");
    }
}
