//! # Channel pairing
//!
//! One-time code handshake that binds an unknown channel user id to a
//! channel's `allowedUsers` list.
//!
//! An unknown user on a `dmPolicy = pairing` channel sends `/start` and
//! receives an 8-character code drawn from an ambiguity-free alphabet. The
//! operator approves or denies the code — via the dashboard's
//! `POST /api/pairing/approve` endpoint or the `quantumclaw pairing`
//! CLI — which appends the user's id to the channel's `allowedUsers` and
//! confirms the pairing to the user. Codes expire after one hour whether
//! or not they are ever approved.
//!
//! The pending map is persisted to `pairing.json` under the base
//! directory rather than held purely in memory, since the CLI's `pairing`
//! subcommand runs in a separate process from the daemon and needs to
//! observe the same pending set.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Alphabet pairing codes are drawn from. Excludes glyphs that are easy to
/// confuse when read aloud or typed: `0`/`O`, `1`/`I`/`L`.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;
const PAIRING_TTL_SECS: i64 = 3600;

/// A pending pairing code, scoped to one channel + user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    pub code: String,
    pub channel: String,
    pub user_id: String,
    pub username: String,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
}

impl PairingRequest {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(PAIRING_TTL_SECS)
    }
}

/// Errors returned by [`PairingStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum PairingStoreError {
    #[error("pairing code not found or already resolved")]
    NotFound,
    #[error("pairing code expired")]
    Expired,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable, mutex-guarded map of pending pairing requests across every
/// channel adapter.
pub struct PairingStore {
    path: PathBuf,
    requests: Mutex<HashMap<String, PairingRequest>>,
}

impl PairingStore {
    /// Load (or initialize) the pairing store rooted at `base_dir`,
    /// dropping any requests that have already expired.
    pub fn load(base_dir: &Path) -> Result<Self, PairingStoreError> {
        let path = base_dir.join("pairing.json");
        let requests: HashMap<String, PairingRequest> = if path.exists() {
            let bytes = std::fs::read(&path)?;
            if bytes.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            HashMap::new()
        };

        let store = Self {
            path,
            requests: Mutex::new(requests),
        };
        let mut guard = store.requests.lock().unwrap();
        guard.retain(|_, r| !r.is_expired());
        store.persist(&guard)?;
        drop(guard);
        Ok(store)
    }

    fn persist(&self, requests: &HashMap<String, PairingRequest>) -> Result<(), PairingStoreError> {
        let json = serde_json::to_vec_pretty(requests)?;
        crate::persistence::atomic_write(&self.path, &json)?;
        Ok(())
    }

    /// Issue a new pairing code for `(channel, user_id)`. A non-expired
    /// request already pending for the same user on the same channel is
    /// returned unchanged instead of minting a duplicate.
    pub fn create(
        &self,
        channel: &str,
        user_id: &str,
        username: &str,
        chat_id: &str,
    ) -> Result<PairingRequest, PairingStoreError> {
        let mut requests = self.requests.lock().unwrap();
        requests.retain(|_, r| !r.is_expired());

        if let Some(existing) = requests
            .values()
            .find(|r| r.channel == channel && r.user_id == user_id)
        {
            return Ok(existing.clone());
        }

        let code = loop {
            let candidate = generate_code();
            if !requests.contains_key(&candidate) {
                break candidate;
            }
        };

        let request = PairingRequest {
            code: code.clone(),
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            chat_id: chat_id.to_string(),
            created_at: Utc::now(),
        };
        requests.insert(code, request.clone());
        self.persist(&requests)?;
        Ok(request)
    }

    /// All currently pending (non-expired) requests, oldest first. Expired
    /// entries are swept as a side effect.
    pub fn pending(&self) -> Vec<PairingRequest> {
        let mut requests = self.requests.lock().unwrap();
        let before = requests.len();
        requests.retain(|_, r| !r.is_expired());
        if requests.len() != before {
            let _ = self.persist(&requests);
        }
        let mut out: Vec<_> = requests.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Approve a pending code, removing it from the pending map. The
    /// caller is responsible for appending `user_id` to the channel's
    /// `allowedUsers`; doing so idempotently makes a duplicate approval of
    /// the same code a no-op at the config layer even though the second
    /// call here returns [`PairingStoreError::NotFound`].
    pub fn approve(&self, code: &str) -> Result<PairingRequest, PairingStoreError> {
        self.take(code)
    }

    /// Deny a pending code, removing it from the pending map without
    /// granting access.
    pub fn deny(&self, code: &str) -> Result<PairingRequest, PairingStoreError> {
        self.take(code)
    }

    /// Drop every pending request whose TTL has elapsed without either an
    /// approval or a denial. Intended to be called on a periodic sweep
    /// alongside the delivery queue drainer.
    pub fn expire_stale(&self) -> usize {
        let mut requests = self.requests.lock().unwrap();
        let before = requests.len();
        requests.retain(|_, r| !r.is_expired());
        let removed = before - requests.len();
        if removed > 0 {
            let _ = self.persist(&requests);
        }
        removed
    }

    fn take(&self, code: &str) -> Result<PairingRequest, PairingStoreError> {
        let mut requests = self.requests.lock().unwrap();
        match requests.remove(code) {
            None => Err(PairingStoreError::NotFound),
            Some(r) if r.is_expired() => {
                self.persist(&requests)?;
                Err(PairingStoreError::Expired)
            }
            Some(r) => {
                self.persist(&requests)?;
                Ok(r)
            }
        }
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> PairingStore {
        PairingStore::load(dir).unwrap()
    }

    #[test]
    fn generated_codes_use_unambiguous_alphabet() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.chars().all(|c| CODE_ALPHABET.contains(&(c as u8))));
        }
    }

    #[test]
    fn create_then_pending_then_approve() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let req = store.create("telegram", "u1", "alice", "chat1").unwrap();
        assert_eq!(req.code.len(), CODE_LEN);
        assert_eq!(store.pending().len(), 1);

        let approved = store.approve(&req.code).unwrap();
        assert_eq!(approved.user_id, "u1");
        assert!(store.pending().is_empty());
    }

    #[test]
    fn duplicate_approval_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let req = store.create("telegram", "u1", "alice", "chat1").unwrap();
        store.approve(&req.code).unwrap();
        let second = store.approve(&req.code);
        assert!(matches!(second, Err(PairingStoreError::NotFound)));
    }

    #[test]
    fn deny_removes_without_granting() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let req = store.create("slack", "u2", "bob", "chat2").unwrap();
        store.deny(&req.code).unwrap();
        assert!(store.pending().is_empty());
    }

    #[test]
    fn repeated_start_reuses_pending_code() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let first = store.create("telegram", "u1", "alice", "chat1").unwrap();
        let second = store.create("telegram", "u1", "alice", "chat1").unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(store.pending().len(), 1);
    }

    #[test]
    fn expired_request_is_not_approvable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let mut req = store.create("telegram", "u1", "alice", "chat1").unwrap();
        req.created_at = Utc::now() - Duration::hours(2);
        store
            .requests
            .lock()
            .unwrap()
            .insert(req.code.clone(), req.clone());

        let result = store.approve(&req.code);
        assert!(matches!(result, Err(PairingStoreError::Expired)));
    }

    #[test]
    fn persists_across_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let req = {
            let store = store(tmp.path());
            store.create("discord", "u9", "carol", "chat9").unwrap()
        };
        let reloaded = store(tmp.path());
        assert_eq!(reloaded.pending().len(), 1);
        assert_eq!(reloaded.pending()[0].code, req.code);
    }
}
