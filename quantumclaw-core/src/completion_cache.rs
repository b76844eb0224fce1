//! Content-hash keyed completion cache.
//!
//! Distinct from `cache::CacheConfig`, which configures *provider-side*
//! prompt caching (a hint passed in the request to the LLM API). This cache
//! sits above the model router: an exact repeat of the same message history
//! against the same model returns a stored response instead of paying for
//! another completion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::{CompletionResponse, Message};

/// Content-hash key a cache entry is stored/looked up under: sha-256 over
/// the canonical JSON of `(messages, model)`, truncated to the first 16 hex
/// characters (8 bytes of the digest) per the base format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(messages: &[Message], model: &str) -> Self {
        #[derive(Serialize)]
        struct Canonical<'a> {
            messages: &'a [Message],
            model: &'a str,
        }
        let canonical = Canonical { messages, model };
        let json = serde_json::to_vec(&canonical).unwrap_or_default();
        let digest = Sha256::digest(&json);
        let hex = hex_encode(&digest);
        CacheKey(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").ok();
    }
    out
}

/// A cached completion, with the bookkeeping the LRU eviction and TTL logic
/// need: when it was written, when it was last served, and how long it's
/// valid for.
#[derive(Debug, Clone)]
struct CacheEntry {
    response: CompletionResponse,
    model: String,
    inserted_at: Instant,
    ttl: Duration,
    last_hit: Instant,
    hits: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Result of a cache hit: the stored response plus the `cached: true`
/// marker and the model it was generated with.
#[derive(Debug, Clone)]
pub struct CachedCompletion {
    pub content: CompletionResponse,
    pub cached: bool,
    pub model: String,
}

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const MAX_ENTRIES: usize = 500;
const TRIM_TO: usize = 400;

/// Content-hash response cache with TTL and LRU eviction.
///
/// `get` prunes any expired entry it encounters lazily; `set` trims the
/// whole table down to `TRIM_TO` entries (evicting by `last_hit`, oldest
/// first) whenever an insert would push it past `MAX_ENTRIES`.
pub struct CompletionCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CompletionCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a cached response for this exact message history and model.
    /// Returns `None` on a miss or an expired entry (which is pruned).
    pub fn get(&self, messages: &[Message], model: &str) -> Option<CachedCompletion> {
        let key = CacheKey::compute(messages, model);
        let mut entries = self.entries.lock().unwrap();
        let expired = entries.get(&key).map(|e| e.is_expired()).unwrap_or(false);
        if expired {
            entries.remove(&key);
            return None;
        }
        let entry = entries.get_mut(&key)?;
        entry.hits += 1;
        entry.last_hit = Instant::now();
        Some(CachedCompletion {
            content: entry.response.clone(),
            cached: true,
            model: entry.model.clone(),
        })
    }

    /// Store a response for this message history and model with the
    /// default 60-minute TTL.
    pub fn set(&self, messages: &[Message], model: &str, response: CompletionResponse) {
        self.set_with_ttl(messages, model, response, DEFAULT_TTL);
    }

    /// Store a response with an explicit TTL override.
    pub fn set_with_ttl(
        &self,
        messages: &[Message],
        model: &str,
        response: CompletionResponse,
        ttl: Duration,
    ) {
        let key = CacheKey::compute(messages, model);
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                response,
                model: model.to_string(),
                inserted_at: now,
                ttl,
                last_hit: now,
                hits: 0,
            },
        );
        if entries.len() > MAX_ENTRIES {
            let mut by_last_hit: Vec<(CacheKey, Instant)> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.last_hit))
                .collect();
            by_last_hit.sort_by_key(|(_, last_hit)| *last_hit);
            let to_remove = entries.len() - TRIM_TO;
            for (key, _) in by_last_hit.into_iter().take(to_remove) {
                entries.remove(&key);
            }
        }
    }

    /// Current entry count, for metrics/diagnostics.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompletionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Content, Role, TokenUsage};

    fn msg(text: &str) -> Message {
        Message::new(Role::User, Content::Text { text: text.to_string() })
    }

    fn response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::new(Role::Assistant, Content::Text { text: text.to_string() }),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            model: "m".to_string(),
            finish_reason: None,
        }
    }

    #[test]
    fn test_hash_is_stable_and_16_chars() {
        let a = CacheKey::compute(&[msg("hi")], "claude-haiku");
        let b = CacheKey::compute(&[msg("hi")], "claude-haiku");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn test_hash_differs_by_model() {
        let a = CacheKey::compute(&[msg("hi")], "claude-haiku");
        let b = CacheKey::compute(&[msg("hi")], "claude-opus");
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_set_roundtrip() {
        let cache = CompletionCache::new();
        let messages = vec![msg("what time is it")];
        assert!(cache.get(&messages, "claude-haiku").is_none());
        cache.set(&messages, "claude-haiku", response("it's 3pm"));
        let hit = cache.get(&messages, "claude-haiku").unwrap();
        assert!(hit.cached);
        assert_eq!(hit.model, "claude-haiku");
    }

    #[test]
    fn test_expired_entry_is_pruned() {
        let cache = CompletionCache::new();
        let messages = vec![msg("hi")];
        cache.set_with_ttl(&messages, "m", response("hello"), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&messages, "m").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_trims_to_400_past_500_entries() {
        let cache = CompletionCache::new();
        for i in 0..MAX_ENTRIES + 10 {
            let messages = vec![msg(&format!("message {i}"))];
            cache.set(&messages, "m", response("r"));
        }
        assert_eq!(cache.len(), TRIM_TO);
    }
}
