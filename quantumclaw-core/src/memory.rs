//! Three-tier memory system for the Rustant agent.
//!
//! - **Working Memory**: Current task state and scratch data (single task lifetime).
//! - **Short-Term Memory**: Sliding window of recent conversation with summarization.
//! - **Long-Term Memory**: Persistent facts and preferences across sessions.

use crate::error::MemoryError;
use crate::graph_memory::{GraphEdge, GraphMemoryClient, GraphNode, GraphProjection, GraphQueryResult};
use crate::search::{HybridSearchEngine, SearchConfig};
use crate::types::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a read-path graph lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQueryOutcome {
    pub source: &'static str,
    pub results: Vec<GraphQueryResult>,
}

impl GraphQueryOutcome {
    fn offline() -> Self {
        Self {
            source: "offline",
            results: Vec::new(),
        }
    }
}

fn truncate_label(content: &str) -> String {
    const MAX: usize = 60;
    if content.chars().count() <= MAX {
        content.to_string()
    } else {
        format!("{}…", content.chars().take(MAX).collect::<String>())
    }
}

/// Working memory for the currently executing task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingMemory {
    pub current_goal: Option<String>,
    pub sub_tasks: Vec<String>,
    pub scratchpad: HashMap<String, String>,
    pub active_files: Vec<String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.current_goal = Some(goal.into());
    }

    pub fn add_sub_task(&mut self, task: impl Into<String>) {
        self.sub_tasks.push(task.into());
    }

    pub fn note(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.scratchpad.insert(key.into(), value.into());
    }

    pub fn add_active_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.active_files.contains(&path) {
            self.active_files.push(path);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Short-term memory: sliding window of recent messages with summarization support.
#[derive(Debug, Clone)]
pub struct ShortTermMemory {
    messages: VecDeque<Message>,
    window_size: usize,
    summarized_prefix: Option<String>,
    total_messages_seen: usize,
    /// Set of absolute message indices that are pinned (survive compression).
    pinned: std::collections::HashSet<usize>,
    /// Running count of messages removed by compression (for index mapping).
    compressed_offset: usize,
}

impl ShortTermMemory {
    pub fn new(window_size: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            window_size,
            summarized_prefix: None,
            total_messages_seen: 0,
            pinned: std::collections::HashSet::new(),
            compressed_offset: 0,
        }
    }

    /// Add a message to short-term memory.
    pub fn add(&mut self, message: Message) {
        self.messages.push_back(message);
        self.total_messages_seen += 1;
    }

    /// Get all messages that should be sent to the LLM, including any summary.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut result = Vec::new();

        // Include summary of older context if available
        if let Some(ref summary) = self.summarized_prefix {
            result.push(Message::system(format!(
                "[Summary of earlier conversation]\n{}",
                summary
            )));
        }

        // Include recent messages within the window.
        // Pinned messages that fall before the window start are still included.
        let start = if self.messages.len() > self.window_size {
            self.messages.len() - self.window_size
        } else {
            0
        };

        for (i, msg) in self.messages.iter().enumerate() {
            if i >= start || self.is_pinned(i) {
                result.push(msg.clone());
            }
        }

        result
    }

    /// Check whether compression is needed based on message count.
    pub fn needs_compression(&self) -> bool {
        self.messages.len() >= self.window_size * 2
    }

    /// Compress older messages by replacing them with a summary.
    /// Pinned messages are preserved and moved to the front of the window.
    /// Returns the number of messages that were compressed.
    pub fn compress(&mut self, summary: String) -> usize {
        if self.messages.len() <= self.window_size {
            return 0;
        }

        let to_remove = self.messages.len() - self.window_size;

        // Separate pinned messages from those to be removed, and collect
        // the absolute indices of messages that survive the window (not removed).
        let mut preserved = Vec::new();
        let mut removed_count = 0;

        for i in 0..to_remove {
            let abs_idx = self.compressed_offset + i;
            if self.pinned.contains(&abs_idx) {
                if let Some(msg) = self.messages.get(i) {
                    preserved.push(msg.clone());
                }
            } else {
                removed_count += 1;
            }
        }

        // Collect absolute indices that are pinned and remain in the window
        // (i.e. messages beyond to_remove that were pinned).
        let mut surviving_pinned: Vec<usize> = Vec::new();
        for i in to_remove..self.messages.len() {
            let abs_idx = self.compressed_offset + i;
            if self.pinned.contains(&abs_idx) {
                surviving_pinned.push(i - to_remove);
            }
        }

        // Remove the to_remove oldest messages
        self.messages.drain(..to_remove);
        self.compressed_offset += to_remove;

        // Re-insert pinned messages at the front of the window using batch operation.
        // This avoids O(p^2) sequential insert() calls by building a new VecDeque.
        let preserved_count = preserved.len();
        if !preserved.is_empty() {
            let mut new_messages = VecDeque::with_capacity(preserved_count + self.messages.len());
            for msg in preserved {
                new_messages.push_back(msg);
            }
            new_messages.append(&mut self.messages);
            self.messages = new_messages;
        }

        // Rebuild the pinned set with correct absolute indices.
        // Preserved messages are at positions 0..preserved_count.
        // Surviving pinned messages shifted by preserved_count.
        let mut new_pinned = HashSet::new();
        for i in 0..preserved_count {
            new_pinned.insert(self.compressed_offset + i);
        }
        for pos in surviving_pinned {
            new_pinned.insert(self.compressed_offset + preserved_count + pos);
        }
        self.pinned = new_pinned;

        // Merge with existing summary
        if let Some(ref existing) = self.summarized_prefix {
            self.summarized_prefix = Some(format!("{}\n\n{}", existing, summary));
        } else {
            self.summarized_prefix = Some(summary);
        }

        removed_count
    }

    /// Pin a message by its position in the current message list (0-based).
    /// Pinned messages survive compression.
    pub fn pin(&mut self, position: usize) -> bool {
        if position >= self.messages.len() {
            return false;
        }
        let abs_idx = self.compressed_offset + position;
        self.pinned.insert(abs_idx);
        true
    }

    /// Unpin a message by its position in the current message list.
    pub fn unpin(&mut self, position: usize) -> bool {
        if position >= self.messages.len() {
            return false;
        }
        let abs_idx = self.compressed_offset + position;
        self.pinned.remove(&abs_idx)
    }

    /// Check if a message at the given position is pinned.
    pub fn is_pinned(&self, position: usize) -> bool {
        let abs_idx = self.compressed_offset + position;
        self.pinned.contains(&abs_idx)
    }

    /// Number of currently pinned messages.
    pub fn pinned_count(&self) -> usize {
        // Count pinned messages that are still in the current window
        (0..self.messages.len())
            .filter(|&i| self.is_pinned(i))
            .count()
    }

    /// Get messages that should be summarized (older than window).
    pub fn messages_to_summarize(&self) -> Vec<&Message> {
        if self.messages.len() <= self.window_size {
            return Vec::new();
        }
        let to_summarize = self.messages.len() - self.window_size;
        self.messages.iter().take(to_summarize).collect()
    }

    /// Get the total number of messages currently held.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if memory is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get total messages seen across the session.
    pub fn total_messages_seen(&self) -> usize {
        self.total_messages_seen
    }

    /// Clear all messages and summary.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.summarized_prefix = None;
        self.total_messages_seen = 0;
        self.pinned.clear();
        self.compressed_offset = 0;
    }

    /// Get a reference to all current messages.
    pub fn messages(&self) -> &VecDeque<Message> {
        &self.messages
    }

    /// Get the summary prefix, if any.
    pub fn summary(&self) -> Option<&str> {
        self.summarized_prefix.as_deref()
    }
}

/// A fact extracted from conversation for long-term storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: Uuid,
    pub content: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl Fact {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            source: source.into(),
            created_at: Utc::now(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Long-term memory persisted across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermMemory {
    pub facts: Vec<Fact>,
    pub preferences: HashMap<String, String>,
    pub corrections: Vec<Correction>,
    /// Maximum number of facts to retain. When exceeded, the oldest fact is evicted.
    #[serde(default = "LongTermMemory::default_max_facts")]
    pub max_facts: usize,
    /// Maximum number of corrections to retain. When exceeded, the oldest correction is evicted.
    #[serde(default = "LongTermMemory::default_max_corrections")]
    pub max_corrections: usize,
}

impl Default for LongTermMemory {
    fn default() -> Self {
        Self {
            facts: Vec::new(),
            preferences: HashMap::new(),
            corrections: Vec::new(),
            max_facts: Self::default_max_facts(),
            max_corrections: Self::default_max_corrections(),
        }
    }
}

/// A correction recorded from user feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub id: Uuid,
    pub original: String,
    pub corrected: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

impl LongTermMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn default_max_facts() -> usize {
        10_000
    }

    fn default_max_corrections() -> usize {
        1_000
    }

    pub fn add_fact(&mut self, fact: Fact) {
        if self.facts.len() >= self.max_facts {
            self.facts.remove(0);
        }
        self.facts.push(fact);
    }

    pub fn set_preference(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.preferences.insert(key.into(), value.into());
    }

    pub fn get_preference(&self, key: &str) -> Option<&str> {
        self.preferences.get(key).map(|s| s.as_str())
    }

    pub fn add_correction(&mut self, original: String, corrected: String, context: String) {
        if self.corrections.len() >= self.max_corrections {
            self.corrections.remove(0);
        }
        self.corrections.push(Correction {
            id: Uuid::new_v4(),
            original,
            corrected,
            context,
            timestamp: Utc::now(),
        });
    }

    /// Search facts by keyword.
    pub fn search_facts(&self, query: &str) -> Vec<&Fact> {
        let query_lower = query.to_lowercase();
        self.facts
            .iter()
            .filter(|f| {
                f.content.to_lowercase().contains(&query_lower)
                    || f.tags
                        .iter()
                        .any(|t| t.to_lowercase().contains(&query_lower))
            })
            .collect()
    }
}

/// The unified memory system combining all three tiers.
pub struct MemorySystem {
    pub working: WorkingMemory,
    pub short_term: ShortTermMemory,
    pub long_term: LongTermMemory,
    /// Optional hybrid search engine for fact retrieval.
    search_engine: Option<HybridSearchEngine>,
    /// Optional automatic flusher for periodic persistence.
    flusher: Option<MemoryFlusher>,
    /// Optional remote knowledge-graph client (the memory subsystem's graph
    /// layer). `None` when `memory.cognee.enabled` is false — every caller
    /// must treat that the same as an offline client.
    graph: Option<Arc<GraphMemoryClient>>,
}

impl MemorySystem {
    pub fn new(window_size: usize) -> Self {
        Self {
            working: WorkingMemory::new(),
            short_term: ShortTermMemory::new(window_size),
            long_term: LongTermMemory::new(),
            search_engine: None,
            flusher: None,
            graph: None,
        }
    }

    /// Create a memory system with hybrid search enabled.
    pub fn with_search(
        window_size: usize,
        search_config: SearchConfig,
    ) -> Result<Self, crate::search::SearchError> {
        let engine = HybridSearchEngine::open(search_config)?;
        Ok(Self {
            working: WorkingMemory::new(),
            short_term: ShortTermMemory::new(window_size),
            long_term: LongTermMemory::new(),
            search_engine: Some(engine),
            flusher: None,
            graph: None,
        })
    }

    /// Attach an automatic flusher to this memory system (builder pattern).
    pub fn with_flusher(mut self, config: FlushConfig) -> Self {
        self.flusher = Some(MemoryFlusher::new(config));
        self
    }

    /// Attach the remote knowledge-graph client (builder pattern).
    pub fn with_graph(mut self, graph: Arc<GraphMemoryClient>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Whether a graph client is attached and currently reachable.
    pub fn graph_online(&self) -> bool {
        self.graph.as_ref().is_some_and(|g| g.is_online())
    }

    /// Read-path graph lookup for the current message. Returns
    /// `{source: "graph", results}` on a hit, or `{source: "offline",
    /// results: []}` when no client is attached or it is unreachable —
    /// the agent still answers, it just loses cross-entity traversal.
    pub async fn graph_query(&self, query: &str) -> GraphQueryOutcome {
        let Some(graph) = &self.graph else {
            return GraphQueryOutcome::offline();
        };
        match graph.query(query).await {
            Ok(results) => GraphQueryOutcome {
                source: "graph",
                results,
            },
            Err(_) => GraphQueryOutcome::offline(),
        }
    }

    /// Write-path ingestion: best-effort, never surfaces an error to the
    /// caller (the spec's write path runs this as a background task).
    pub async fn graph_ingest(&self, text: &str, context: &str) {
        if let Some(graph) = &self.graph {
            let _ = graph.add(text, context).await;
        }
    }

    /// The attached graph client, if any, for callers that want to spawn
    /// the ingest themselves as a detached background task rather than
    /// block the current turn on a network round-trip.
    pub fn graph_client(&self) -> Option<Arc<GraphMemoryClient>> {
        self.graph.clone()
    }

    /// A node/edge projection over current knowledge entries. Edges are
    /// derived from co-reference analysis between entry texts: two facts
    /// are linked when they share a tag, or share at least two significant
    /// (length > 3) lowercase words in their content.
    pub fn get_graph(&self) -> GraphProjection {
        let mut graph: petgraph::graph::UnGraph<String, f32> = petgraph::graph::UnGraph::new_undirected();
        let mut indices = HashMap::new();
        for fact in &self.long_term.facts {
            let idx = graph.add_node(fact.id.to_string());
            indices.insert(fact.id, idx);
        }

        let significant_words = |content: &str| -> HashSet<String> {
            content
                .to_lowercase()
                .split_whitespace()
                .filter(|w| w.len() > 3)
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
                .filter(|w| !w.is_empty())
                .collect()
        };

        for (i, a) in self.long_term.facts.iter().enumerate() {
            let words_a = significant_words(&a.content);
            for b in self.long_term.facts.iter().skip(i + 1) {
                let shared_tags = a.tags.iter().filter(|t| b.tags.contains(t)).count();
                let words_b = significant_words(&b.content);
                let shared_words = words_a.intersection(&words_b).count();
                if shared_tags > 0 || shared_words >= 2 {
                    let weight = shared_tags as f32 + shared_words as f32;
                    graph.add_edge(indices[&a.id], indices[&b.id], weight);
                }
            }
        }

        let nodes = self
            .long_term
            .facts
            .iter()
            .map(|f| GraphNode {
                id: f.id.to_string(),
                label: truncate_label(&f.content),
            })
            .collect();
        let edges = graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = graph.edge_endpoints(e)?;
                let weight = *graph.edge_weight(e)?;
                Some(GraphEdge {
                    source: graph[a].clone(),
                    target: graph[b].clone(),
                    weight,
                })
            })
            .collect();
        GraphProjection { nodes, edges }
    }

    /// Get all messages for the LLM context.
    pub fn context_messages(&self) -> Vec<Message> {
        self.short_term.to_messages()
    }

    /// Add a message to the conversation.
    pub fn add_message(&mut self, message: Message) {
        self.short_term.add(message);
        // Notify flusher
        if let Some(ref mut flusher) = self.flusher {
            flusher.on_message_added();
        }
    }

    /// Add a fact to long-term memory, also indexing it in the search engine.
    pub fn add_fact(&mut self, fact: Fact) {
        if let Some(ref mut engine) = self.search_engine {
            let _ = engine.index_fact(&fact.id.to_string(), &fact.content);
        }
        self.long_term.add_fact(fact);
    }

    /// Search facts using the hybrid engine (falls back to keyword search).
    pub fn search_facts_hybrid(&self, query: &str) -> Vec<&Fact> {
        if let Some(ref engine) = self.search_engine {
            if let Ok(results) = engine.search(query) {
                let ids: Vec<String> = results.iter().map(|r| r.fact_id.clone()).collect();
                let found: Vec<&Fact> = self
                    .long_term
                    .facts
                    .iter()
                    .filter(|f| ids.contains(&f.id.to_string()))
                    .collect();
                if !found.is_empty() {
                    return found;
                }
            }
        }
        // Fallback to keyword search
        self.long_term.search_facts(query)
    }

    /// Check if auto-flush should happen, and flush if needed.
    ///
    /// Uses the `Option::take()` pattern to avoid borrow conflicts.
    pub fn check_auto_flush(&mut self) -> Result<bool, MemoryError> {
        let mut flusher = match self.flusher.take() {
            Some(f) => f,
            None => return Ok(false),
        };
        let result = if flusher.should_flush() {
            flusher.flush(self)?;
            Ok(true)
        } else {
            Ok(false)
        };
        self.flusher = Some(flusher);
        result
    }

    /// Force a flush regardless of triggers.
    pub fn force_flush(&mut self) -> Result<(), MemoryError> {
        let mut flusher = match self.flusher.take() {
            Some(f) => f,
            None => return Ok(()),
        };
        let result = flusher.force_flush(self);
        self.flusher = Some(flusher);
        result
    }

    /// Whether the flusher has unflushed data.
    pub fn flusher_is_dirty(&self) -> bool {
        self.flusher.as_ref().is_some_and(|f| f.is_dirty())
    }

    /// Reset working memory for a new task.
    pub fn start_new_task(&mut self, goal: impl Into<String>) {
        self.working.clear();
        self.working.set_goal(goal);
    }

    /// Clear everything except long-term memory.
    pub fn clear_session(&mut self) {
        self.working.clear();
        self.short_term.clear();
    }

    /// Get a breakdown of context usage for the UI.
    pub fn context_breakdown(&self, context_window: usize) -> ContextBreakdown {
        let summary_chars = self.short_term.summary().map(|s| s.len()).unwrap_or(0);
        let message_chars: usize = self
            .short_term
            .messages()
            .iter()
            .map(|m| m.content_length())
            .sum();
        let total_chars = summary_chars + message_chars;

        // Rough token estimate: ~4 chars per token
        let summary_tokens = summary_chars / 4;
        let message_tokens = message_chars / 4;
        let total_tokens = total_chars / 4;
        let remaining_tokens = context_window.saturating_sub(total_tokens);

        ContextBreakdown {
            summary_tokens,
            message_tokens,
            total_tokens,
            context_window,
            remaining_tokens,
            message_count: self.short_term.len(),
            total_messages_seen: self.short_term.total_messages_seen(),
            pinned_count: self.short_term.pinned_count(),
            has_summary: self.short_term.summary().is_some(),
            facts_count: self.long_term.facts.len(),
            rules_count: 0, // Populated separately if knowledge distiller is available
        }
    }

    /// Pin a message in short-term memory by position.
    pub fn pin_message(&mut self, position: usize) -> bool {
        self.short_term.pin(position)
    }

    /// Unpin a message in short-term memory by position.
    pub fn unpin_message(&mut self, position: usize) -> bool {
        self.short_term.unpin(position)
    }
}

/// Breakdown of context window usage for the UI.
#[derive(Debug, Clone, Default)]
pub struct ContextBreakdown {
    /// Estimated tokens used by the summarized prefix.
    pub summary_tokens: usize,
    /// Estimated tokens used by active messages.
    pub message_tokens: usize,
    /// Total estimated tokens in use.
    pub total_tokens: usize,
    /// Total context window size (from config).
    pub context_window: usize,
    /// Remaining available tokens.
    pub remaining_tokens: usize,
    /// Number of messages currently in the window.
    pub message_count: usize,
    /// Total messages seen in the session.
    pub total_messages_seen: usize,
    /// Number of pinned messages.
    pub pinned_count: usize,
    /// Whether a summary prefix exists.
    pub has_summary: bool,
    /// Number of facts in long-term memory.
    pub facts_count: usize,
    /// Number of active behavioral rules.
    pub rules_count: usize,
}

impl ContextBreakdown {
    /// Context usage as a ratio (0.0 to 1.0).
    pub fn usage_ratio(&self) -> f32 {
        if self.context_window == 0 {
            return 0.0;
        }
        (self.total_tokens as f32 / self.context_window as f32).clamp(0.0, 1.0)
    }

    /// Whether context is at warning level (>= 70%).
    /// Aligned with agent's `ContextHealthEvent::Warning` threshold.
    pub fn is_warning(&self) -> bool {
        self.usage_ratio() >= 0.7
    }
}

/// Metadata about a saved session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub task_summary: Option<String>,
}

impl SessionMetadata {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            task_summary: None,
        }
    }
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A persistable session containing the memory state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub metadata: SessionMetadata,
    pub working: WorkingMemory,
    pub long_term: LongTermMemory,
    pub messages: Vec<Message>,
    pub window_size: usize,
}

impl MemorySystem {
    /// Save the current memory state to a JSON file.
    pub fn save_session(&self, path: &Path) -> Result<(), MemoryError> {
        let session = Session {
            metadata: SessionMetadata {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                task_summary: self.working.current_goal.clone(),
            },
            working: self.working.clone(),
            long_term: self.long_term.clone(),
            messages: self.short_term.messages().iter().cloned().collect(),
            window_size: self.short_term.window_size(),
        };

        let json =
            serde_json::to_string_pretty(&session).map_err(|e| MemoryError::PersistenceError {
                message: format!("Failed to serialize session: {}", e),
            })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoryError::PersistenceError {
                message: format!("Failed to create directory: {}", e),
            })?;
        }

        std::fs::write(path, json).map_err(|e| MemoryError::PersistenceError {
            message: format!("Failed to write session file: {}", e),
        })?;

        Ok(())
    }

    /// Load a session from a JSON file.
    pub fn load_session(path: &Path) -> Result<Self, MemoryError> {
        let json = std::fs::read_to_string(path).map_err(|e| MemoryError::SessionLoadFailed {
            message: format!("Failed to read session file: {}", e),
        })?;

        let session: Session =
            serde_json::from_str(&json).map_err(|e| MemoryError::SessionLoadFailed {
                message: format!("Failed to deserialize session: {}", e),
            })?;

        let mut memory = MemorySystem::new(session.window_size);
        memory.working = session.working;
        memory.long_term = session.long_term;
        for msg in session.messages {
            memory.short_term.add(msg);
        }

        Ok(memory)
    }
}

impl ShortTermMemory {
    /// Get the window size.
    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

/// Result of a context compression operation.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub messages_before: usize,
    pub messages_after: usize,
    pub compressed_count: usize,
}

// ---------------------------------------------------------------------------
// Memory Flusher
// ---------------------------------------------------------------------------

/// Configuration for automatic memory flushing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Whether automatic flushing is enabled.
    pub enabled: bool,
    /// Flush interval in seconds (0 = disabled).
    pub interval_secs: u64,
    /// Number of messages that triggers an auto-flush (0 = disabled).
    pub flush_on_message_count: usize,
    /// Path where flushed data is written.
    pub flush_path: Option<std::path::PathBuf>,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300, // 5 minutes
            flush_on_message_count: 50,
            flush_path: None,
        }
    }
}

/// Tracks dirty state and triggers for automatic memory persistence.
#[derive(Debug, Clone)]
pub struct MemoryFlusher {
    config: FlushConfig,
    dirty: bool,
    messages_since_flush: usize,
    last_flush: DateTime<Utc>,
    total_flushes: usize,
}

impl MemoryFlusher {
    /// Create a new flusher with the given configuration.
    pub fn new(config: FlushConfig) -> Self {
        Self {
            config,
            dirty: false,
            messages_since_flush: 0,
            last_flush: Utc::now(),
            total_flushes: 0,
        }
    }

    /// Notify the flusher that a message was added.
    pub fn on_message_added(&mut self) {
        self.dirty = true;
        self.messages_since_flush += 1;
    }

    /// Check whether a flush should happen based on the configured triggers.
    pub fn should_flush(&self) -> bool {
        if !self.config.enabled || !self.dirty {
            return false;
        }

        // Message-count trigger
        if self.config.flush_on_message_count > 0
            && self.messages_since_flush >= self.config.flush_on_message_count
        {
            return true;
        }

        // Time-based trigger
        if self.config.interval_secs > 0 {
            let elapsed = (Utc::now() - self.last_flush).num_seconds();
            if elapsed >= self.config.interval_secs as i64 {
                return true;
            }
        }

        false
    }

    /// Perform a flush of the memory system to disk.
    pub fn flush(&mut self, memory: &MemorySystem) -> Result<(), MemoryError> {
        let path =
            self.config
                .flush_path
                .as_ref()
                .ok_or_else(|| MemoryError::PersistenceError {
                    message: "No flush path configured".to_string(),
                })?;

        memory.save_session(path)?;
        self.mark_flushed();
        Ok(())
    }

    /// Force a flush regardless of triggers.
    pub fn force_flush(&mut self, memory: &MemorySystem) -> Result<(), MemoryError> {
        if !self.dirty {
            return Ok(()); // nothing to flush
        }
        self.flush(memory)
    }

    /// Whether there is unflushed data.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Messages added since the last flush.
    pub fn messages_since_flush(&self) -> usize {
        self.messages_since_flush
    }

    /// Total number of flushes performed.
    pub fn total_flushes(&self) -> usize {
        self.total_flushes
    }

    /// Mark the flush as completed (reset counters).
    fn mark_flushed(&mut self) {
        self.dirty = false;
        self.messages_since_flush = 0;
        self.last_flush = Utc::now();
        self.total_flushes += 1;
    }
}

// ---------------------------------------------------------------------------
// Knowledge Distiller — Cross-Session Learning
// ---------------------------------------------------------------------------

/// A distilled behavioral rule generated from accumulated corrections and facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralRule {
    /// Unique identifier.
    pub id: Uuid,
    /// Human-readable rule description (injected into system prompt).
    pub rule: String,
    /// Source entries (correction/fact IDs) that contributed to this rule.
    pub source_ids: Vec<Uuid>,
    /// How many source entries support this rule (higher = more confidence).
    pub support_count: usize,
    /// When this rule was distilled.
    pub created_at: DateTime<Utc>,
}

/// Persistent knowledge store containing distilled behavioral rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeStore {
    pub rules: Vec<BehavioralRule>,
    /// Correction IDs already processed by the distiller.
    pub processed_correction_ids: Vec<Uuid>,
    /// Fact IDs already processed by the distiller.
    pub processed_fact_ids: Vec<Uuid>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a knowledge store from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self, MemoryError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = std::fs::read_to_string(path).map_err(|e| MemoryError::PersistenceError {
            message: format!("Failed to read knowledge store: {}", e),
        })?;
        serde_json::from_str(&json).map_err(|e| MemoryError::PersistenceError {
            message: format!("Failed to parse knowledge store: {}", e),
        })
    }

    /// Save the knowledge store to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoryError::PersistenceError {
                message: format!("Failed to create knowledge directory: {}", e),
            })?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| MemoryError::PersistenceError {
                message: format!("Failed to serialize knowledge store: {}", e),
            })?;
        std::fs::write(path, json).map_err(|e| MemoryError::PersistenceError {
            message: format!("Failed to write knowledge store: {}", e),
        })
    }
}

/// The `KnowledgeDistiller` processes accumulated corrections and facts from
/// `LongTermMemory` to generate compressed behavioral rules. These rules
/// are injected into the system prompt to influence future agent behavior,
/// creating a cross-session learning loop.
pub struct KnowledgeDistiller {
    store: KnowledgeStore,
    max_rules: usize,
    min_entries: usize,
    store_path: Option<std::path::PathBuf>,
}

impl KnowledgeDistiller {
    /// Create a new distiller from config. If `config` is None, creates a
    /// disabled distiller that returns no rules.
    pub fn new(config: Option<&crate::config::KnowledgeConfig>) -> Self {
        match config {
            Some(cfg) if cfg.enabled => {
                let store = cfg
                    .knowledge_path
                    .as_ref()
                    .and_then(|p| KnowledgeStore::load(p).ok())
                    .unwrap_or_default();
                Self {
                    store,
                    max_rules: cfg.max_rules,
                    min_entries: cfg.min_entries_for_distillation,
                    store_path: cfg.knowledge_path.clone(),
                }
            }
            _ => Self {
                store: KnowledgeStore::new(),
                max_rules: 0,
                min_entries: usize::MAX,
                store_path: None,
            },
        }
    }

    /// Run the distillation process over long-term memory.
    ///
    /// Groups corrections by context patterns and generates compressed rules.
    /// Only processes entries not yet seen by the distiller.
    pub fn distill(&mut self, long_term: &LongTermMemory) {
        // Collect new (unprocessed) corrections
        let new_corrections: Vec<&Correction> = long_term
            .corrections
            .iter()
            .filter(|c| !self.store.processed_correction_ids.contains(&c.id))
            .collect();

        // Collect new (unprocessed) facts
        let new_facts: Vec<&Fact> = long_term
            .facts
            .iter()
            .filter(|f| !self.store.processed_fact_ids.contains(&f.id))
            .collect();

        let total_new = new_corrections.len() + new_facts.len();
        if total_new < self.min_entries {
            return; // Not enough new data to distill
        }

        // --- Distill corrections into rules ---
        // Group corrections by common patterns in their context field.
        let mut context_groups: HashMap<String, Vec<&Correction>> = HashMap::new();
        for correction in &new_corrections {
            // Normalize the context to a group key (first 50 chars, lowercased)
            let key = correction
                .context
                .chars()
                .take(50)
                .collect::<String>()
                .to_lowercase();
            context_groups.entry(key).or_default().push(correction);
        }

        // Generate a rule per group that has enough entries
        for group in context_groups.values() {
            if group.len() >= 2 {
                // Multiple corrections with similar context → a behavioral rule
                let corrected_patterns: Vec<&str> =
                    group.iter().map(|c| c.corrected.as_str()).collect();
                let rule_text = format!(
                    "Based on {} previous corrections: prefer {}",
                    group.len(),
                    corrected_patterns.join("; ")
                );
                let source_ids: Vec<Uuid> = group.iter().map(|c| c.id).collect();
                self.store.rules.push(BehavioralRule {
                    id: Uuid::new_v4(),
                    rule: rule_text,
                    source_ids,
                    support_count: group.len(),
                    created_at: Utc::now(),
                });
            } else {
                // Single correction → direct rule
                for c in group {
                    self.store.rules.push(BehavioralRule {
                        id: Uuid::new_v4(),
                        rule: format!("Instead of '{}', prefer '{}'", c.original, c.corrected),
                        source_ids: vec![c.id],
                        support_count: 1,
                        created_at: Utc::now(),
                    });
                }
            }
        }

        // --- Distill preferences from facts ---
        // Facts tagged with "preference" or containing directive language get
        // turned into rules directly.
        for fact in &new_facts {
            let is_preference = fact.tags.iter().any(|t| t == "preference")
                || fact.content.starts_with("Prefer")
                || fact.content.starts_with("Always")
                || fact.content.starts_with("Never")
                || fact.content.starts_with("Don't")
                || fact.content.starts_with("Use ");
            if is_preference {
                self.store.rules.push(BehavioralRule {
                    id: Uuid::new_v4(),
                    rule: fact.content.clone(),
                    source_ids: vec![fact.id],
                    support_count: 1,
                    created_at: Utc::now(),
                });
            }
        }

        // Mark all new entries as processed
        for c in &new_corrections {
            self.store.processed_correction_ids.push(c.id);
        }
        for f in &new_facts {
            self.store.processed_fact_ids.push(f.id);
        }

        // Trim rules to max_rules, keeping highest support_count
        if self.store.rules.len() > self.max_rules {
            self.store
                .rules
                .sort_by(|a, b| b.support_count.cmp(&a.support_count));
            self.store.rules.truncate(self.max_rules);
        }

        // Persist if a store path is configured
        if let Some(ref path) = self.store_path {
            let _ = self.store.save(path);
        }
    }

    /// Get the current distilled rules formatted for system prompt injection.
    ///
    /// Returns an empty string if no rules exist.
    pub fn rules_for_prompt(&self) -> String {
        if self.store.rules.is_empty() {
            return String::new();
        }
        let mut prompt = String::from(
            "\n\n## Learned Behavioral Rules\n\
             The following rules were distilled from previous sessions. Follow them:\n",
        );
        for (i, rule) in self.store.rules.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, rule.rule));
        }
        prompt
    }

    /// Get the number of distilled rules.
    pub fn rule_count(&self) -> usize {
        self.store.rules.len()
    }

    /// Get the knowledge store reference (for diagnostics/REPL).
    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }
}
