//! Pending tool-execution approvals.
//!
//! Grounded on the teacher's `PendingApproval`/`api_approval_decision_handler`
//! pair in `gateway::server`, generalized into a standalone queue so
//! `ToolRegistry::execute` can suspend a call pending operator sign-off
//! instead of the gateway owning that state directly.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::persistence::{atomic_write_json, load_json};

/// Operator's decision on a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
}

/// A tool call suspended awaiting operator approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub tool: String,
    pub args: Value,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decision: Option<ApprovalOutcome>,
}

const DEFAULT_TTL_MINUTES: i64 = 10;

/// Exec-approval queue: tool calls gated by `tools.requireApproval` sit here
/// until an operator decides, or until `expires_at` passes, at which point
/// they auto-deny.
pub struct ExecApprovals {
    pending: Mutex<HashMap<Uuid, PendingApproval>>,
    path: Option<std::path::PathBuf>,
}

impl ExecApprovals {
    pub fn in_memory() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    pub fn with_path(path: impl Into<std::path::PathBuf>) -> Self {
        let path = path.into();
        let loaded: HashMap<Uuid, PendingApproval> =
            load_json(&path).ok().flatten().unwrap_or_default();
        Self {
            pending: Mutex::new(loaded),
            path: Some(path),
        }
    }

    fn persist(&self, pending: &HashMap<Uuid, PendingApproval>) {
        if let Some(path) = &self.path {
            if let Err(e) = atomic_write_json(path, pending) {
                tracing::warn!(error = %e, "exec approvals persist failed, continuing in-memory only");
            }
        }
    }

    /// Enqueue a tool call for approval, with the default 10-minute expiry.
    pub fn request(&self, tool: impl Into<String>, args: Value) -> Uuid {
        self.request_with_ttl(tool, args, ChronoDuration::minutes(DEFAULT_TTL_MINUTES))
    }

    pub fn request_with_ttl(&self, tool: impl Into<String>, args: Value, ttl: ChronoDuration) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let approval = PendingApproval {
            id,
            tool: tool.into(),
            args,
            requested_at: now,
            expires_at: now + ttl,
            decision: None,
        };
        let mut pending = self.pending.lock().unwrap();
        pending.insert(id, approval);
        self.persist(&pending);
        id
    }

    /// Record the operator's decision for a still-pending approval.
    /// Returns `None` if the id is unknown or already decided.
    pub fn decide(&self, id: Uuid, outcome: ApprovalOutcome) -> Option<PendingApproval> {
        let mut pending = self.pending.lock().unwrap();
        let approval = pending.get_mut(&id)?;
        if approval.decision.is_some() {
            return None;
        }
        approval.decision = Some(outcome);
        let result = approval.clone();
        self.persist(&pending);
        Some(result)
    }

    /// Look up the current state of a pending approval, auto-denying it
    /// in-place if `now` has passed `expires_at` with no decision yet.
    pub fn check(&self, id: Uuid, now: DateTime<Utc>) -> Option<PendingApproval> {
        let mut pending = self.pending.lock().unwrap();
        let approval = pending.get_mut(&id)?;
        if approval.decision.is_none() && now > approval.expires_at {
            approval.decision = Some(ApprovalOutcome::Denied);
        }
        let result = approval.clone();
        self.persist(&pending);
        Some(result)
    }

    /// Every pending approval that has expired with no decision — the
    /// sweep a background task runs to auto-deny and audit.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<PendingApproval> {
        let mut pending = self.pending.lock().unwrap();
        let mut expired = Vec::new();
        for approval in pending.values_mut() {
            if approval.decision.is_none() && now > approval.expires_at {
                approval.decision = Some(ApprovalOutcome::Denied);
                expired.push(approval.clone());
            }
        }
        self.persist(&pending);
        expired
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every approval still awaiting a decision — what a dashboard
    /// approvals list, or a caller racing an operator's decision, polls.
    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.decision.is_none())
            .map(|a| a.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_pending_until_decided() {
        let approvals = ExecApprovals::in_memory();
        let id = approvals.request("shell_exec", serde_json::json!({"command": "rm file"}));
        let state = approvals.check(id, Utc::now()).unwrap();
        assert!(state.decision.is_none());
    }

    #[test]
    fn test_decide_approved() {
        let approvals = ExecApprovals::in_memory();
        let id = approvals.request("shell_exec", serde_json::json!({}));
        let decided = approvals.decide(id, ApprovalOutcome::Approved).unwrap();
        assert_eq!(decided.decision, Some(ApprovalOutcome::Approved));
        // Second decision on the same id is rejected.
        assert!(approvals.decide(id, ApprovalOutcome::Denied).is_none());
    }

    #[test]
    fn test_expired_with_no_decision_auto_denies() {
        let approvals = ExecApprovals::in_memory();
        let id = approvals.request_with_ttl("shell_exec", serde_json::json!({}), ChronoDuration::seconds(-1));
        let state = approvals.check(id, Utc::now()).unwrap();
        assert_eq!(state.decision, Some(ApprovalOutcome::Denied));
    }

    #[test]
    fn test_sweep_expired_returns_only_newly_denied() {
        let approvals = ExecApprovals::in_memory();
        let expired_id = approvals.request_with_ttl("fetch", serde_json::json!({}), ChronoDuration::seconds(-1));
        let live_id = approvals.request("fetch", serde_json::json!({}));
        let swept = approvals.sweep_expired(Utc::now());
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, expired_id);
        assert!(approvals.check(live_id, Utc::now()).unwrap().decision.is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("approvals.json");
        let id = {
            let approvals = ExecApprovals::with_path(&path);
            approvals.request("shell_exec", serde_json::json!({"command": "ls"}))
        };
        let reopened = ExecApprovals::with_path(&path);
        assert_eq!(reopened.len(), 1);
        assert!(reopened.check(id, Utc::now()).unwrap().decision.is_none());
    }
}
