//! Durable outbound delivery queue with exponential backoff.
//!
//! Grounded on `scheduler::webhook`'s retry/backoff shape, generalized from
//! webhook delivery to outbound channel delivery: a message destined for a
//! channel adapter is queued here first so a transient adapter failure (rate
//! limit, connection drop) doesn't lose the reply outright.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persistence::{atomic_write_json, load_json};

/// Lifecycle state of a queued delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Dead,
}

/// A single queued outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryItem {
    pub id: Uuid,
    pub channel: String,
    pub recipient: String,
    pub payload: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

const MAX_ATTEMPTS: u32 = 6;
const INITIAL_BACKOFF_SECS: i64 = 5;

fn backoff_for(attempts: u32) -> Duration {
    let secs = INITIAL_BACKOFF_SECS.saturating_mul(1i64 << attempts.min(8));
    Duration::from_secs(secs.min(3600) as u64)
}

/// Durable outbound delivery queue. Retries delivery with exponential
/// backoff up to [`MAX_ATTEMPTS`], then marks the item `dead`.
///
/// Persists to `path` (a JSON file, per the base spec's "no database handle
/// ⇒ per-table JSON fallback" rule) on every mutating call so a restart
/// doesn't drop in-flight deliveries.
pub struct DeliveryQueue {
    items: Mutex<HashMap<Uuid, DeliveryItem>>,
    path: Option<std::path::PathBuf>,
}

impl DeliveryQueue {
    /// An in-memory-only queue (used in tests, or when no config directory
    /// is available at boot).
    pub fn in_memory() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// A queue backed by a JSON file, loading any items persisted from a
    /// previous run.
    pub fn with_path(path: impl Into<std::path::PathBuf>) -> Self {
        let path = path.into();
        let loaded: HashMap<Uuid, DeliveryItem> =
            load_json(&path).ok().flatten().unwrap_or_default();
        Self {
            items: Mutex::new(loaded),
            path: Some(path),
        }
    }

    fn persist(&self, items: &HashMap<Uuid, DeliveryItem>) {
        if let Some(path) = &self.path {
            if let Err(e) = atomic_write_json(path, items) {
                tracing::warn!(error = %e, "delivery queue persist failed, continuing in-memory only");
            }
        }
    }

    /// Enqueue a new outbound message for immediate first-attempt delivery.
    pub fn enqueue(&self, channel: impl Into<String>, recipient: impl Into<String>, payload: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let item = DeliveryItem {
            id,
            channel: channel.into(),
            recipient: recipient.into(),
            payload: payload.into(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
        };
        let mut items = self.items.lock().unwrap();
        items.insert(id, item);
        self.persist(&items);
        id
    }

    /// Items whose `next_attempt_at` has passed and are still `pending` —
    /// what the delivery drainer task polls for.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<DeliveryItem> {
        let items = self.items.lock().unwrap();
        items
            .values()
            .filter(|i| i.status == DeliveryStatus::Pending && i.next_attempt_at <= now)
            .cloned()
            .collect()
    }

    /// Record a successful delivery.
    pub fn mark_delivered(&self, id: Uuid) {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.get_mut(&id) {
            item.status = DeliveryStatus::Delivered;
        }
        self.persist(&items);
    }

    /// Record a failed delivery attempt. Schedules the next retry with
    /// exponential backoff, or marks the item `dead` once `MAX_ATTEMPTS` is
    /// exceeded.
    pub fn mark_failed(&self, id: Uuid) {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.get_mut(&id) {
            item.attempts += 1;
            if item.attempts >= MAX_ATTEMPTS {
                item.status = DeliveryStatus::Dead;
            } else {
                let delay = backoff_for(item.attempts);
                item.next_attempt_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(60));
            }
        }
        self.persist(&items);
    }

    pub fn get(&self, id: Uuid) -> Option<DeliveryItem> {
        self.items.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_is_immediately_due() {
        let queue = DeliveryQueue::in_memory();
        let id = queue.enqueue("slack", "U123", "hello");
        let due = queue.due(Utc::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
    }

    #[test]
    fn test_mark_delivered_removes_from_due() {
        let queue = DeliveryQueue::in_memory();
        let id = queue.enqueue("discord", "U1", "hi");
        queue.mark_delivered(id);
        assert!(queue.due(Utc::now()).is_empty());
        assert_eq!(queue.get(id).unwrap().status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_mark_failed_backs_off_and_eventually_dies() {
        let queue = DeliveryQueue::in_memory();
        let id = queue.enqueue("telegram", "U1", "hi");
        for _ in 0..MAX_ATTEMPTS {
            queue.mark_failed(id);
        }
        let item = queue.get(id).unwrap();
        assert_eq!(item.status, DeliveryStatus::Dead);
        assert_eq!(item.attempts, MAX_ATTEMPTS);
    }

    #[test]
    fn test_failed_item_not_due_until_backoff_elapses() {
        let queue = DeliveryQueue::in_memory();
        let id = queue.enqueue("email", "a@b.com", "hi");
        queue.mark_failed(id);
        assert!(queue.due(Utc::now()).is_empty());
        let future = Utc::now() + chrono::Duration::seconds(INITIAL_BACKOFF_SECS * 2 + 5);
        assert_eq!(queue.due(future).len(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("delivery.json");
        let id = {
            let queue = DeliveryQueue::with_path(&path);
            queue.enqueue("slack", "U1", "persisted")
        };
        let reopened = DeliveryQueue::with_path(&path);
        assert_eq!(reopened.get(id).unwrap().recipient, "U1");
    }
}
