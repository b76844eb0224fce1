//! Agent orchestrator implementing the Think → Act → Observe event loop.
//!
//! The `Agent` struct ties together the Brain, ToolRegistry, Memory, and Safety
//! Guardian to autonomously execute tasks through LLM-powered reasoning.

use crate::brain::{Brain, LlmProvider};
use crate::completion_cache::CompletionCache;
use crate::config::AgentConfig;
use crate::error::{AgentError, LlmError, RustantError, ToolError};
use crate::explanation::{DecisionExplanation, DecisionType, ExplanationBuilder, FactorInfluence};
use crate::memory::MemorySystem;
use crate::router::{MessageOrigin, ModelRouter, Tier, classify};
use crate::safety::{
    ActionDetails, ActionRequest, ApprovalContext, ApprovalDecision, ContractCheckResult,
    PermissionResult, ReversibilityInfo, SafetyGuardian,
};
use crate::summarizer::ContextSummarizer;
use crate::types::{
    AgentState, AgentStatus, CompletionResponse, Content, CostEstimate, Message, ProgressUpdate,
    RiskLevel, Role, StreamEvent, TokenUsage, ToolDefinition, ToolOutput,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Truncate a string to at most `max_chars` characters, respecting UTF-8 boundaries.
fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Canned reply for a `Tier::Reflex` task — a pure acknowledgement never
/// reaches the model, so the response just mirrors the sentiment back.
fn reflex_acknowledgement(task: &str) -> String {
    let lower = task.trim().to_lowercase();
    if lower.contains("thank") || lower == "ty" || lower == "thx" {
        "You're welcome!".to_string()
    } else if lower.contains("no") || lower.contains("nope") {
        "Understood.".to_string()
    } else {
        "Got it.".to_string()
    }
}

/// Messages sent to the agent loop via the handle.
pub enum AgentMessage {
    ProcessTask {
        task: String,
        reply: oneshot::Sender<TaskResult>,
    },
    Cancel {
        task_id: Uuid,
    },
    GetStatus {
        reply: oneshot::Sender<AgentStatus>,
    },
    Shutdown,
}

/// The result of a completed task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub success: bool,
    pub response: String,
    pub iterations: usize,
    pub total_usage: TokenUsage,
    pub total_cost: CostEstimate,
    /// Tier the inbound message classified into (`reflex`, `simple`,
    /// `standard`, `complex`, `voice`), when a [`ModelRouter`] was attached
    /// via [`Agent::with_router`]. `None` when no router is attached, so
    /// callers built against the single-provider path keep working.
    pub tier: Option<String>,
    /// `true` when this result was served from the completion cache without
    /// any model call — cost and tier reflect that (cost always zero).
    pub cached: bool,
}

/// Severity of a budget warning or exceeded condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSeverity {
    /// Budget usage is approaching the limit.
    Warning,
    /// Budget limit has been exceeded.
    Exceeded,
}

/// Event emitted for context window health monitoring.
#[derive(Debug, Clone)]
pub enum ContextHealthEvent {
    /// Context usage is approaching the limit (>= 70%).
    Warning {
        usage_percent: u8,
        total_tokens: usize,
        context_window: usize,
    },
    /// Context usage is critical (>= 90%).
    Critical {
        usage_percent: u8,
        total_tokens: usize,
        context_window: usize,
    },
    /// Context compression just occurred.
    Compressed {
        messages_compressed: usize,
        was_llm_summarized: bool,
        pinned_preserved: usize,
    },
}

/// Callback trait for user interaction (approval, display).
#[async_trait::async_trait]
pub trait AgentCallback: Send + Sync {
    /// Display a message from the assistant to the user.
    async fn on_assistant_message(&self, message: &str);

    /// Display a streaming token from the assistant.
    async fn on_token(&self, token: &str);

    /// Request approval for an action. Returns the user's decision.
    async fn request_approval(&self, action: &ActionRequest) -> ApprovalDecision;

    /// Notify about a tool execution.
    async fn on_tool_start(&self, tool_name: &str, args: &serde_json::Value);

    /// Notify about a tool result.
    async fn on_tool_result(&self, tool_name: &str, output: &ToolOutput, duration_ms: u64);

    /// Notify about agent status changes.
    async fn on_status_change(&self, status: AgentStatus);

    /// Notify about token usage and cost after each LLM call.
    async fn on_usage_update(&self, usage: &TokenUsage, cost: &CostEstimate);

    /// Notify about a decision explanation for a tool selection.
    async fn on_decision_explanation(&self, explanation: &DecisionExplanation);

    /// Notify about a budget warning or exceeded condition.
    /// Default is a no-op for backward compatibility.
    async fn on_budget_warning(&self, _message: &str, _severity: BudgetSeverity) {}

    /// Notify about progress during tool execution (streaming output, file operations, etc.).
    /// Default is a no-op for backward compatibility.
    async fn on_progress(&self, _progress: &ProgressUpdate) {}

    /// Request clarification from the user. Returns the user's answer.
    /// Called when the agent needs more information to proceed.
    /// Default returns empty string for backward compatibility.
    async fn on_clarification_request(&self, _question: &str) -> String {
        String::new()
    }

    /// Notify about context window health changes (warnings, compression events).
    /// Default is a no-op for backward compatibility.
    async fn on_context_health(&self, _event: &ContextHealthEvent) {}

    /// A channel digest has been generated and is ready for review.
    /// Called when the digest system completes a summary for the configured period.
    /// Default is a no-op for backward compatibility.
    async fn on_channel_digest(&self, _digest: &serde_json::Value) {}

    /// A message on a channel needs immediate user attention (escalation).
    ///
    /// Called when the intelligence layer classifies a message at or above the
    /// escalation threshold. Uses `&str` parameters rather than `ClassifiedMessage`
    /// to keep the callback trait decoupled from the classification system — callers
    /// can format the alert data however they choose.
    ///
    /// Default is a no-op for backward compatibility.
    async fn on_channel_alert(&self, _channel: &str, _sender: &str, _summary: &str) {}

    /// A scheduled follow-up reminder has been triggered.
    /// Called when a cron-scheduled reminder fires for a previously classified
    /// message that requires follow-up.
    /// Default is a no-op for backward compatibility.
    async fn on_reminder(&self, _reminder: &serde_json::Value) {}
}

/// A tool executor function type. The agent holds tool executors and their definitions.
pub type ToolExecutor = Box<
    dyn Fn(
            serde_json::Value,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<ToolOutput, ToolError>> + Send>,
        > + Send
        + Sync,
>;

/// A registered tool with its definition and executor.
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub risk_level: RiskLevel,
    pub executor: ToolExecutor,
}

/// The Agent orchestrator running the Think → Act → Observe loop.
pub struct Agent {
    brain: Brain,
    memory: MemorySystem,
    safety: SafetyGuardian,
    tools: HashMap<String, RegisteredTool>,
    state: AgentState,
    #[allow(dead_code)]
    config: AgentConfig,
    cancellation: CancellationToken,
    callback: Arc<dyn AgentCallback>,
    /// LLM-based context summarizer for intelligent compression.
    summarizer: ContextSummarizer,
    /// Token budget manager for cost control.
    budget: crate::brain::TokenBudgetManager,
    /// Cross-session knowledge distiller for learning from corrections/facts.
    knowledge: crate::memory::KnowledgeDistiller,
    /// Per-tool token usage tracking for budget breakdown.
    tool_token_usage: HashMap<String, usize>,
    /// Optional tiered model router — classifies each incoming task and
    /// swaps the brain's provider to the tier's (provider, model) slot
    /// before the THINK step. Absent in tests/callers that want a single
    /// fixed provider.
    router: Option<Arc<ModelRouter>>,
    /// Optional content-hash response cache consulted before the first
    /// model call of a task and populated after the final one.
    completion_cache: Option<Arc<CompletionCache>>,
    /// Optional execution-trace store. When attached, each task's tool
    /// approvals/denials/executions and completion status are recorded as
    /// an [`crate::audit::ExecutionTrace`] for the dashboard's audit view.
    audit_store: Option<Arc<tokio::sync::Mutex<crate::audit::AuditStore>>>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        config: AgentConfig,
        callback: Arc<dyn AgentCallback>,
    ) -> Self {
        let summarizer = ContextSummarizer::new(Arc::clone(&provider));
        let brain = Brain::new(provider, crate::brain::DEFAULT_SYSTEM_PROMPT);
        let memory = MemorySystem::new(config.memory.window_size);
        let safety = SafetyGuardian::new(config.safety.clone());
        let max_iter = config.safety.max_iterations;
        let budget = crate::brain::TokenBudgetManager::new(config.budget.as_ref());
        let knowledge = crate::memory::KnowledgeDistiller::new(config.knowledge.as_ref());

        Self {
            brain,
            memory,
            safety,
            tools: HashMap::new(),
            state: AgentState::new(max_iter),
            config,
            cancellation: CancellationToken::new(),
            callback,
            summarizer,
            budget,
            knowledge,
            tool_token_usage: HashMap::new(),
            router: None,
            completion_cache: None,
            audit_store: None,
        }
    }

    /// Attach a tiered model router. Once set, each call to [`process_task`]
    /// classifies the incoming task and selects the router's provider for
    /// that tier instead of the fixed provider passed to [`Agent::new`].
    ///
    /// [`process_task`]: Agent::process_task
    pub fn with_router(mut self, router: Arc<ModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Attach a completion cache consulted before the first model call of
    /// each task and populated with the final response.
    pub fn with_completion_cache(mut self, cache: Arc<CompletionCache>) -> Self {
        self.completion_cache = Some(cache);
        self
    }

    /// Attach the remote knowledge-graph client to this agent's memory
    /// subsystem, enabling top-k graph results on the read path and
    /// background ingestion on the write path.
    pub fn with_graph_memory(mut self, graph: Arc<crate::graph_memory::GraphMemoryClient>) -> Self {
        self.memory = self.memory.with_graph(graph);
        self
    }

    /// Attach an [`crate::audit::AuditStore`] to record a full execution
    /// trace (tool approvals/denials/executions, LLM calls, completion
    /// status) for each task, surfaced via the dashboard's audit endpoint.
    pub fn with_audit_store(
        mut self,
        store: Arc<tokio::sync::Mutex<crate::audit::AuditStore>>,
    ) -> Self {
        self.audit_store = Some(store);
        self
    }

    /// Register a tool with the agent.
    pub fn register_tool(&mut self, tool: RegisteredTool) {
        self.tools.insert(tool.definition.name.clone(), tool);
    }

    /// Get tool definitions for the LLM.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition.clone()).collect();

        // Add the ask_user pseudo-tool so the LLM knows it can ask clarifying questions.
        defs.push(ToolDefinition {
            name: "ask_user".to_string(),
            description: "Ask the user a clarifying question when you need more information to proceed. Use this when the task is ambiguous or you need to confirm something before taking action.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to ask the user"
                    }
                },
                "required": ["question"]
            }),
        });

        defs
    }

    /// Process a user task through the agent loop. Equivalent to
    /// [`process_task_from`](Self::process_task_from) with [`MessageOrigin::Text`].
    pub async fn process_task(&mut self, task: &str) -> Result<TaskResult, RustantError> {
        self.process_task_from(task, MessageOrigin::Text).await
    }

    /// Process a user task through the agent loop, classifying it into a
    /// router tier first when a [`ModelRouter`] is attached.
    ///
    /// Tier classification (`router::classify`) and provider selection
    /// happen once per task, before the first THINK step:
    /// - `Tier::Reflex` is served with a canned acknowledgement and never
    ///   reaches the model at all (zero cost).
    /// - Any other tier swaps the brain onto that tier's provider for the
    ///   remainder of this task.
    ///
    /// If a [`CompletionCache`] is attached, a hit against the opening
    /// conversation (system + history + this task, under the tier's model)
    /// short-circuits the whole loop.
    pub async fn process_task_from(
        &mut self,
        task: &str,
        origin: MessageOrigin,
    ) -> Result<TaskResult, RustantError> {
        let task_id = Uuid::new_v4();
        info!(task_id = %task_id, task = task, "Starting task processing");

        self.state.start_task(task);
        self.state.task_id = Some(task_id);
        self.memory.start_new_task(task);
        self.budget.reset_task();
        self.tool_token_usage.clear();
        let safety_log_start = self.safety.audit_log().len();

        // Run knowledge distillation from long-term memory and inject into brain
        self.knowledge.distill(&self.memory.long_term);
        let mut knowledge_addendum = self.knowledge.rules_for_prompt();

        // Top-k graph results for the current message, when the graph layer
        // is connected. Loss of graph ⇒ still answers, no cross-entity
        // traversal — `graph_query` already degrades to an empty result set.
        let graph_outcome = self.memory.graph_query(task).await;
        if graph_outcome.source == "graph" && !graph_outcome.results.is_empty() {
            knowledge_addendum.push_str("\n\nRelated knowledge:\n");
            for result in graph_outcome.results.iter().take(5) {
                knowledge_addendum.push_str(&format!("- {}\n", result.text));
            }
        }
        self.brain.set_knowledge_addendum(knowledge_addendum);

        let tier = self.router.as_ref().map(|_| classify(task, origin));
        if let Some(tier) = tier {
            debug!(task_id = %task_id, tier = %tier, "classified inbound task");
            if tier == Tier::Reflex {
                self.memory.add_message(Message::user(task));
                let response = reflex_acknowledgement(task);
                self.memory.add_message(Message::assistant(&response));
                self.state.complete();
                self.callback.on_status_change(AgentStatus::Complete).await;
                self.record_execution_trace(
                    task_id,
                    task,
                    true,
                    0,
                    safety_log_start,
                    TokenUsage::default(),
                    CostEstimate::default(),
                )
                .await;
                return Ok(TaskResult {
                    task_id,
                    success: true,
                    response,
                    iterations: 0,
                    total_usage: TokenUsage::default(),
                    total_cost: CostEstimate::default(),
                    tier: Some(tier.to_string()),
                    cached: false,
                });
            }
            if let Some(router) = &self.router {
                self.brain.set_provider(router.provider_for(tier));
            }
        }

        self.memory.add_message(Message::user(task));
        self.callback.on_status_change(AgentStatus::Thinking).await;

        if let Some(cache) = &self.completion_cache {
            let conversation = self.memory.context_messages();
            let model = self.brain.model_name().to_string();
            if let Some(hit) = cache.get(&conversation, &model) {
                let text = hit.content.message.content.as_text().unwrap_or_default().to_string();
                self.memory.add_message(Message::assistant(&text));
                self.state.complete();
                self.callback.on_status_change(AgentStatus::Complete).await;
                self.record_execution_trace(
                    task_id,
                    task,
                    true,
                    0,
                    safety_log_start,
                    TokenUsage::default(),
                    CostEstimate::default(),
                )
                .await;
                return Ok(TaskResult {
                    task_id,
                    success: true,
                    response: text,
                    iterations: 0,
                    total_usage: TokenUsage::default(),
                    total_cost: CostEstimate::default(),
                    tier: tier.map(|t| t.to_string()),
                    cached: true,
                });
            }
        }

        let mut final_response = String::new();

        loop {
            // Check cancellation
            if self.cancellation.is_cancelled() {
                self.state.set_error();
                self.record_execution_trace(
                    task_id,
                    task,
                    false,
                    self.state.iteration,
                    safety_log_start,
                    *self.brain.total_usage(),
                    *self.brain.total_cost(),
                )
                .await;
                return Err(RustantError::Agent(AgentError::Cancelled));
            }

            // Check iteration limit
            if !self.state.increment_iteration() {
                warn!(
                    task_id = %task_id,
                    iterations = self.state.iteration,
                    "Maximum iterations reached"
                );
                self.state.set_error();
                self.record_execution_trace(
                    task_id,
                    task,
                    false,
                    self.state.iteration,
                    safety_log_start,
                    *self.brain.total_usage(),
                    *self.brain.total_cost(),
                )
                .await;
                return Err(RustantError::Agent(AgentError::MaxIterationsReached {
                    max: self.state.max_iterations,
                }));
            }

            debug!(
                task_id = %task_id,
                iteration = self.state.iteration,
                "Agent loop iteration"
            );

            // --- THINK ---
            self.state.status = AgentStatus::Thinking;
            self.callback.on_status_change(AgentStatus::Thinking).await;

            let conversation = self.memory.context_messages();
            let tools = Some(self.tool_definitions());

            // Context health check before LLM call
            {
                let context_window = self.brain.provider().context_window();
                let breakdown = self.memory.context_breakdown(context_window);
                let usage_percent = (breakdown.usage_ratio() * 100.0) as u8;
                if usage_percent >= 90 {
                    self.callback
                        .on_context_health(&ContextHealthEvent::Critical {
                            usage_percent,
                            total_tokens: breakdown.total_tokens,
                            context_window: breakdown.context_window,
                        })
                        .await;
                } else if usage_percent >= 70 {
                    self.callback
                        .on_context_health(&ContextHealthEvent::Warning {
                            usage_percent,
                            total_tokens: breakdown.total_tokens,
                            context_window: breakdown.context_window,
                        })
                        .await;
                }
            }

            // Pre-call budget check
            let estimated_tokens = self.brain.estimate_tokens(&conversation);
            let (input_rate, output_rate) = self.brain.provider_cost_rates();
            let budget_result = self
                .budget
                .check_budget(estimated_tokens, input_rate, output_rate);
            match &budget_result {
                crate::brain::BudgetCheckResult::Exceeded { message } => {
                    let top = self.top_tool_consumers(3);
                    let enriched = if top.is_empty() {
                        message.clone()
                    } else {
                        format!("{}. Top consumers: {}", message, top)
                    };
                    self.callback
                        .on_budget_warning(&enriched, BudgetSeverity::Exceeded)
                        .await;
                    if self.budget.should_halt_on_exceed() {
                        warn!("Budget exceeded, halting: {}", enriched);
                        self.record_execution_trace(
                            task_id,
                            task,
                            false,
                            self.state.iteration,
                            safety_log_start,
                            *self.brain.total_usage(),
                            *self.brain.total_cost(),
                        )
                        .await;
                        return Err(RustantError::Agent(AgentError::BudgetExceeded {
                            message: enriched,
                        }));
                    }
                    warn!("Budget warning (soft limit): {}", enriched);
                }
                crate::brain::BudgetCheckResult::Warning { message, .. } => {
                    let top = self.top_tool_consumers(3);
                    let enriched = if top.is_empty() {
                        message.clone()
                    } else {
                        format!("{}. Top consumers: {}", message, top)
                    };
                    self.callback
                        .on_budget_warning(&enriched, BudgetSeverity::Warning)
                        .await;
                    debug!("Budget warning: {}", enriched);
                }
                crate::brain::BudgetCheckResult::Ok => {}
            }

            let response = if self.config.llm.use_streaming {
                self.think_streaming(&conversation, tools).await?
            } else {
                self.brain.think_with_retry(&conversation, tools, 3).await?
            };

            // Record usage in budget manager and emit live update
            self.budget.record_usage(
                &response.usage,
                &CostEstimate {
                    input_cost: response.usage.input_tokens as f64 * input_rate,
                    output_cost: response.usage.output_tokens as f64 * output_rate,
                },
            );
            self.callback
                .on_usage_update(self.brain.total_usage(), self.brain.total_cost())
                .await;

            // --- DECIDE ---
            self.state.status = AgentStatus::Deciding;
            match &response.message.content {
                Content::Text { text } => {
                    // LLM produced a text response — task may be complete
                    info!(task_id = %task_id, "Agent produced text response");
                    self.callback.on_assistant_message(text).await;
                    if let Some(cache) = &self.completion_cache {
                        cache.set(&conversation, self.brain.model_name(), response.clone());
                    }
                    self.memory.add_message(response.message.clone());
                    if let Some(graph) = self.memory.graph_client() {
                        let ingest_text = text.clone();
                        tokio::spawn(async move {
                            let _ = graph.add(&ingest_text, "conversation").await;
                        });
                    }
                    final_response = text.clone();
                    // Text response means the agent is done thinking
                    break;
                }
                Content::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    // LLM wants to call a tool
                    info!(
                        task_id = %task_id,
                        tool = name,
                        "Agent requesting tool execution"
                    );
                    self.memory.add_message(response.message.clone());

                    // Build and emit decision explanation
                    let explanation = self.build_decision_explanation(name, arguments);
                    self.callback.on_decision_explanation(&explanation).await;

                    // --- ACT ---
                    let result = self.execute_tool(id, name, arguments).await;

                    // --- OBSERVE ---
                    let result_tokens = match &result {
                        Ok(output) => {
                            let result_msg = Message::tool_result(id, &output.content, false);
                            let tokens = output.content.len() / 4; // rough estimate
                            self.memory.add_message(result_msg);
                            tokens
                        }
                        Err(e) => {
                            let error_msg = format!("Tool error: {}", e);
                            let tokens = error_msg.len() / 4;
                            let result_msg = Message::tool_result(id, &error_msg, true);
                            self.memory.add_message(result_msg);
                            tokens
                        }
                    };
                    *self.tool_token_usage.entry(name.to_string()).or_insert(0) += result_tokens;

                    // Check context compression
                    if self.memory.short_term.needs_compression() {
                        debug!("Triggering LLM-based context compression");
                        let msgs_to_summarize: Vec<Message> = self
                            .memory
                            .short_term
                            .messages_to_summarize()
                            .into_iter()
                            .cloned()
                            .collect();
                        let msgs_count = msgs_to_summarize.len();
                        let pinned_count = self.memory.short_term.pinned_count();

                        let (summary_text, was_llm) = match self
                            .summarizer
                            .summarize(&msgs_to_summarize)
                            .await
                        {
                            Ok(result) => {
                                info!(
                                    messages_summarized = result.messages_summarized,
                                    tokens_saved = result.tokens_saved,
                                    "Context compression via LLM summarization"
                                );
                                (result.text, true)
                            }
                            Err(e) => {
                                warn!(error = %e, "LLM summarization failed, falling back to truncation");
                                // Fallback: smart structured summary preserving tool names
                                // and first/last messages instead of naive truncation
                                let text = crate::summarizer::smart_fallback_summary(
                                    &msgs_to_summarize,
                                    500,
                                );
                                (text, false)
                            }
                        };

                        self.memory.short_term.compress(summary_text);

                        // Notify about compression
                        self.callback
                            .on_context_health(&ContextHealthEvent::Compressed {
                                messages_compressed: msgs_count,
                                was_llm_summarized: was_llm,
                                pinned_preserved: pinned_count,
                            })
                            .await;
                    }

                    // Continue loop — agent needs to observe and think again
                }
                Content::MultiPart { parts } => {
                    // Handle multi-part responses (text + tool calls)
                    self.memory.add_message(response.message.clone());

                    let mut has_tool_call = false;
                    for part in parts {
                        match part {
                            Content::Text { text } => {
                                self.callback.on_assistant_message(text).await;
                                final_response = text.clone();
                            }
                            Content::ToolCall {
                                id,
                                name,
                                arguments,
                            } => {
                                has_tool_call = true;

                                // Build and emit decision explanation (same as single ToolCall path)
                                let explanation = self.build_decision_explanation(name, arguments);
                                self.callback.on_decision_explanation(&explanation).await;

                                let result = self.execute_tool(id, name, arguments).await;
                                // Note: fact recording for cross-session learning is handled
                                // inside execute_tool() — no need to duplicate it here.
                                let result_tokens = match &result {
                                    Ok(output) => {
                                        let msg = Message::tool_result(id, &output.content, false);
                                        let tokens = output.content.len() / 4;
                                        self.memory.add_message(msg);
                                        tokens
                                    }
                                    Err(e) => {
                                        let error_msg = format!("Tool error: {}", e);
                                        let tokens = error_msg.len() / 4;
                                        let msg = Message::tool_result(id, &error_msg, true);
                                        self.memory.add_message(msg);
                                        tokens
                                    }
                                };

                                // Track per-tool token usage (same as single ToolCall path)
                                *self.tool_token_usage.entry(name.to_string()).or_insert(0) +=
                                    result_tokens;
                            }
                            _ => {}
                        }
                    }

                    if !has_tool_call {
                        break; // Only text, we're done
                    }

                    // Check context compression after multipart tool calls
                    if self.memory.short_term.needs_compression() {
                        debug!("Triggering LLM-based context compression (multipart)");
                        let msgs_to_summarize: Vec<Message> = self
                            .memory
                            .short_term
                            .messages_to_summarize()
                            .into_iter()
                            .cloned()
                            .collect();
                        let msgs_count = msgs_to_summarize.len();
                        let pinned_count = self.memory.short_term.pinned_count();

                        let (summary_text, was_llm) = match self
                            .summarizer
                            .summarize(&msgs_to_summarize)
                            .await
                        {
                            Ok(result) => {
                                info!(
                                    messages_summarized = result.messages_summarized,
                                    tokens_saved = result.tokens_saved,
                                    "Context compression via LLM summarization (multipart)"
                                );
                                (result.text, true)
                            }
                            Err(e) => {
                                warn!(error = %e, "LLM summarization failed, falling back to truncation");
                                let text = crate::summarizer::smart_fallback_summary(
                                    &msgs_to_summarize,
                                    500,
                                );
                                (text, false)
                            }
                        };

                        self.memory.short_term.compress(summary_text);

                        self.callback
                            .on_context_health(&ContextHealthEvent::Compressed {
                                messages_compressed: msgs_count,
                                was_llm_summarized: was_llm,
                                pinned_preserved: pinned_count,
                            })
                            .await;
                    }

                    // Continue loop — agent needs to observe and think again
                }
                Content::ToolResult { .. } => {
                    // Shouldn't happen from LLM directly, but handle gracefully
                    warn!("Received unexpected ToolResult from LLM");
                    break;
                }
            }
        }

        self.state.complete();
        self.callback.on_status_change(AgentStatus::Complete).await;

        info!(
            task_id = %task_id,
            iterations = self.state.iteration,
            total_tokens = self.brain.total_usage().total(),
            total_cost = format!("${:.4}", self.brain.total_cost().total()),
            "Task completed"
        );

        self.record_execution_trace(
            task_id,
            task,
            true,
            self.state.iteration,
            safety_log_start,
            *self.brain.total_usage(),
            *self.brain.total_cost(),
        )
        .await;

        Ok(TaskResult {
            task_id,
            success: true,
            response: final_response,
            iterations: self.state.iteration,
            total_usage: *self.brain.total_usage(),
            total_cost: *self.brain.total_cost(),
            tier: tier.map(|t| t.to_string()),
            cached: false,
        })
    }

    /// Perform a streaming think operation, sending tokens to the callback as they arrive.
    /// Returns a CompletionResponse equivalent to the non-streaming path.
    async fn think_streaming(
        &mut self,
        conversation: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<CompletionResponse, LlmError> {
        let (tx, mut rx) = mpsc::channel(64);

        // Build messages and request manually to avoid double borrow
        let messages = self.brain.build_messages(conversation);
        let token_estimate = self.brain.provider().estimate_tokens(&messages);
        let context_limit = self.brain.provider().context_window();

        if token_estimate > context_limit {
            return Err(LlmError::ContextOverflow {
                used: token_estimate,
                limit: context_limit,
            });
        }

        let request = crate::types::CompletionRequest {
            messages,
            tools,
            temperature: 0.7,
            max_tokens: None,
            stop_sequences: Vec::new(),
            model: None,
        };

        // Run the streaming completion
        self.brain
            .provider()
            .complete_streaming(request, tx)
            .await?;

        // Consume events from the channel
        let mut text_parts = String::new();
        let mut usage = TokenUsage::default();

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    self.callback.on_token(&token).await;
                    text_parts.push_str(&token);
                }
                StreamEvent::Done { usage: u } => {
                    usage = u;
                    break;
                }
                StreamEvent::Error(e) => {
                    return Err(LlmError::Streaming { message: e });
                }
                _ => {}
            }
        }

        // Track usage in brain
        self.brain.track_usage(&usage);

        let message = Message::new(Role::Assistant, Content::text(text_parts));
        Ok(CompletionResponse {
            message,
            usage,
            model: self.brain.model_name().to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    /// Execute a tool with safety checks.
    async fn execute_tool(
        &mut self,
        _call_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        // Handle ask_user pseudo-tool before regular tool lookup.
        // This bypasses safety checks since it's read-only user interaction.
        if tool_name == "ask_user" {
            self.state.status = AgentStatus::WaitingForClarification;
            self.callback
                .on_status_change(AgentStatus::WaitingForClarification)
                .await;
            let question = arguments
                .get("question")
                .and_then(|v| v.as_str())
                .unwrap_or("Can you provide more details?");
            let answer = self.callback.on_clarification_request(question).await;
            self.state.status = AgentStatus::Executing;
            self.callback.on_status_change(AgentStatus::Executing).await;
            return Ok(ToolOutput::text(answer));
        }

        // Look up the tool
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound {
                name: tool_name.to_string(),
            })?;

        // Build rich approval context from action details
        let details = Self::parse_action_details(tool_name, arguments);
        let approval_context = Self::build_approval_context(tool_name, &details, tool.risk_level);

        // Build action request with rich context
        let action = SafetyGuardian::create_rich_action_request(
            tool_name,
            tool.risk_level,
            format!("Execute tool: {}", tool_name),
            details,
            approval_context,
        );

        // Check permissions
        let perm = self.safety.check_permission(&action);
        match perm {
            PermissionResult::Allowed => {
                // Proceed
            }
            PermissionResult::Denied { reason } => {
                // Emit explanation for safety denial decision
                let mut builder = ExplanationBuilder::new(DecisionType::ErrorRecovery {
                    error: format!("Permission denied for tool '{}'", tool_name),
                    strategy: "Returning error to LLM for re-planning".to_string(),
                });
                builder.add_reasoning_step(format!("Denied: {}", reason), None);
                builder.set_confidence(1.0);
                let explanation = builder.build();
                self.callback.on_decision_explanation(&explanation).await;

                return Err(ToolError::PermissionDenied {
                    name: tool_name.to_string(),
                    reason,
                });
            }
            PermissionResult::RequiresApproval { context: _ } => {
                self.state.status = AgentStatus::WaitingForApproval;
                self.callback
                    .on_status_change(AgentStatus::WaitingForApproval)
                    .await;

                let decision = self.callback.request_approval(&action).await;
                let approved = decision != ApprovalDecision::Deny;
                self.safety.log_approval_decision(tool_name, approved);

                match decision {
                    ApprovalDecision::Approve => {
                        // Single approval, proceed
                    }
                    ApprovalDecision::ApproveAllSimilar => {
                        // Add to session allowlist for future auto-approval
                        self.safety
                            .add_session_allowlist(tool_name.to_string(), tool.risk_level);
                        info!(
                            tool = tool_name,
                            risk = %tool.risk_level,
                            "Added tool to session allowlist (approve all similar)"
                        );
                    }
                    ApprovalDecision::Deny => {
                        // Emit explanation for user denial decision
                        let mut builder = ExplanationBuilder::new(DecisionType::ErrorRecovery {
                            error: format!("User denied approval for tool '{}'", tool_name),
                            strategy: "Returning error to LLM for re-planning".to_string(),
                        });
                        builder.add_reasoning_step(
                            "User rejected the action in approval dialog".to_string(),
                            None,
                        );
                        builder.set_confidence(1.0);
                        let explanation = builder.build();
                        self.callback.on_decision_explanation(&explanation).await;

                        // Record correction for cross-session learning:
                        // the agent's proposed action was rejected by the user.
                        self.memory.long_term.add_correction(
                            format!(
                                "Attempted tool '{}' with args: {}",
                                tool_name,
                                arguments.to_string().chars().take(200).collect::<String>()
                            ),
                            "User denied this action".to_string(),
                            format!(
                                "Tool '{}' denied by user; goal: {:?}",
                                tool_name, self.memory.working.current_goal
                            ),
                        );

                        return Err(ToolError::PermissionDenied {
                            name: tool_name.to_string(),
                            reason: "User rejected the action".to_string(),
                        });
                    }
                }
            }
        }

        // Check safety contract pre-conditions
        let tool_entry = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound {
                name: tool_name.to_string(),
            })?;
        let risk_level = tool_entry.risk_level;
        let contract_result = self
            .safety
            .contract_enforcer_mut()
            .check_pre(tool_name, risk_level, arguments);
        if contract_result != ContractCheckResult::Satisfied {
            warn!(
                tool = tool_name,
                result = ?contract_result,
                "Safety contract violation (pre-check)"
            );

            // Emit explanation for contract violation
            let mut builder = ExplanationBuilder::new(DecisionType::ErrorRecovery {
                error: format!("Contract violation: {:?}", contract_result),
                strategy: "Returning error to LLM for re-planning".to_string(),
            });
            builder.set_confidence(1.0);
            let explanation = builder.build();
            self.callback.on_decision_explanation(&explanation).await;

            return Err(ToolError::PermissionDenied {
                name: tool_name.to_string(),
                reason: format!("Safety contract violation: {:?}", contract_result),
            });
        }

        // Execute the tool
        self.state.status = AgentStatus::Executing;
        self.callback.on_status_change(AgentStatus::Executing).await;
        self.callback.on_tool_start(tool_name, arguments).await;

        let start = Instant::now();

        // Re-fetch the executor (borrow checker requires separate borrow from the one above)
        let executor = &self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound {
                name: tool_name.to_string(),
            })?
            .executor;
        let result = (executor)(arguments.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        // Record execution in contract enforcer
        self.safety
            .contract_enforcer_mut()
            .record_execution(risk_level, 0.0);

        match &result {
            Ok(output) => {
                self.safety.log_execution(tool_name, true, duration_ms);
                self.safety
                    .record_behavioral_outcome(tool_name, risk_level, true);
                self.callback
                    .on_tool_result(tool_name, output, duration_ms)
                    .await;

                // Record fact from successful tool execution for cross-session learning.
                // Only record non-trivial (>10 chars) and non-huge (<5000 chars) outputs
                // to avoid noise and memory bloat.
                if output.content.len() > 10 && output.content.len() < 5000 {
                    let summary = if output.content.chars().count() > 200 {
                        format!("{}...", truncate_str(&output.content, 200))
                    } else {
                        output.content.clone()
                    };
                    self.memory.long_term.add_fact(
                        crate::memory::Fact::new(
                            format!("Tool '{}' result: {}", tool_name, summary),
                            format!("tool:{}", tool_name),
                        )
                        .with_tags(vec!["tool_result".to_string(), tool_name.to_string()]),
                    );
                }
            }
            Err(e) => {
                self.safety.log_execution(tool_name, false, duration_ms);
                self.safety
                    .record_behavioral_outcome(tool_name, risk_level, false);
                let error_output = ToolOutput::error(e.to_string());
                self.callback
                    .on_tool_result(tool_name, &error_output, duration_ms)
                    .await;
            }
        }

        result
    }

    /// Build rich approval context from action details, providing users with
    /// reasoning, consequences, and reversibility information.
    fn build_approval_context(
        tool_name: &str,
        details: &ActionDetails,
        risk_level: RiskLevel,
    ) -> ApprovalContext {
        let mut ctx = ApprovalContext::new();

        // Derive consequences from action details
        match details {
            ActionDetails::FileWrite { path, size_bytes } => {
                ctx = ctx
                    .with_reasoning(format!(
                        "Writing {} bytes to {}",
                        size_bytes,
                        path.display()
                    ))
                    .with_consequence(format!(
                        "File '{}' will be created or overwritten",
                        path.display()
                    ))
                    .with_reversibility(ReversibilityInfo {
                        is_reversible: true,
                        undo_description: Some(
                            "Revert via git checkout or checkpoint restore".to_string(),
                        ),
                        undo_window: None,
                    });
            }
            ActionDetails::FileDelete { path } => {
                ctx = ctx
                    .with_reasoning(format!("Deleting file {}", path.display()))
                    .with_consequence(format!(
                        "File '{}' will be permanently removed",
                        path.display()
                    ))
                    .with_reversibility(ReversibilityInfo {
                        is_reversible: true,
                        undo_description: Some(
                            "Restore via git checkout or checkpoint".to_string(),
                        ),
                        undo_window: None,
                    });
            }
            ActionDetails::ShellCommand { command } => {
                ctx = ctx
                    .with_reasoning(format!("Executing shell command: {}", command))
                    .with_consequence("Shell command will run in the agent workspace".to_string());
                if risk_level >= RiskLevel::Execute {
                    ctx = ctx.with_consequence(
                        "Command may modify system state or produce side effects".to_string(),
                    );
                }
            }
            ActionDetails::NetworkRequest { host, method } => {
                ctx = ctx
                    .with_reasoning(format!("Making {} request to {}", method, host))
                    .with_consequence(format!("Network request will be sent to {}", host));
            }
            ActionDetails::GitOperation { operation } => {
                ctx = ctx
                    .with_reasoning(format!("Git operation: {}", operation))
                    .with_reversibility(ReversibilityInfo {
                        is_reversible: true,
                        undo_description: Some(
                            "Git operations are generally reversible via reflog".to_string(),
                        ),
                        undo_window: None,
                    });
            }
            _ => {
                ctx = ctx.with_reasoning(format!("Executing {} tool", tool_name));
            }
        }

        // Add preview for destructive tools
        ctx = ctx.with_preview_from_tool(tool_name, details);

        ctx
    }

    /// Parse tool arguments into a specific `ActionDetails` variant based on tool name.
    /// This enables `build_approval_context()` to produce rich reasoning, consequences,
    /// and reversibility info instead of always falling through to the `Other` catch-all.
    fn parse_action_details(tool_name: &str, arguments: &serde_json::Value) -> ActionDetails {
        match tool_name {
            "file_read" | "file_list" | "file_search" => {
                if let Some(path) = arguments.get("path").and_then(|v| v.as_str()) {
                    ActionDetails::FileRead { path: path.into() }
                } else {
                    ActionDetails::Other {
                        info: arguments.to_string(),
                    }
                }
            }
            "file_write" | "file_patch" => {
                let path = arguments
                    .get("path")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                let size = arguments
                    .get("content")
                    .and_then(|v| v.as_str())
                    .map(|s| s.len())
                    .unwrap_or(0);
                ActionDetails::FileWrite {
                    path: path.into(),
                    size_bytes: size,
                }
            }
            "shell_exec" => {
                let cmd = arguments
                    .get("command")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(unknown)");
                ActionDetails::ShellCommand {
                    command: cmd.to_string(),
                }
            }
            "git_status" | "git_diff" => ActionDetails::GitOperation {
                operation: tool_name.to_string(),
            },
            "git_commit" => {
                let msg = arguments
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let truncated = truncate_str(msg, 80);
                ActionDetails::GitOperation {
                    operation: format!("commit: {}", truncated),
                }
            }
            _ => ActionDetails::Other {
                info: arguments.to_string(),
            },
        }
    }

    /// Build a decision explanation for a tool selection.
    fn build_decision_explanation(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> DecisionExplanation {
        let risk_level = self
            .tools
            .get(tool_name)
            .map(|t| t.risk_level)
            .unwrap_or(RiskLevel::Execute);

        let mut builder = ExplanationBuilder::new(DecisionType::ToolSelection {
            selected_tool: tool_name.to_string(),
        });

        // Add reasoning based on the tool and arguments
        builder.add_reasoning_step(
            format!("Selected tool '{}' (risk: {})", tool_name, risk_level),
            None,
        );

        // Add argument summary as evidence
        if let Some(obj) = arguments.as_object() {
            let param_keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
            if !param_keys.is_empty() {
                builder.add_reasoning_step(
                    format!("Parameters: {}", param_keys.join(", ")),
                    Some(&arguments.to_string()),
                );
            }
        }

        // Context factors from memory and safety state
        if let Some(goal) = &self.memory.working.current_goal {
            builder.add_context_factor(
                &format!("Current goal: {}", goal),
                FactorInfluence::Positive,
            );
        }

        builder.add_context_factor(
            &format!("Approval mode: {}", self.safety.approval_mode()),
            FactorInfluence::Neutral,
        );

        builder.add_context_factor(
            &format!(
                "Iteration {}/{}",
                self.state.iteration, self.state.max_iterations
            ),
            if self.state.iteration as f64 / self.state.max_iterations as f64 > 0.8 {
                FactorInfluence::Negative
            } else {
                FactorInfluence::Neutral
            },
        );

        // List other available tools as considered alternatives
        for (name, tool) in &self.tools {
            if name != tool_name && tool.risk_level <= risk_level {
                builder.add_alternative(name, "Not selected by LLM for this step", tool.risk_level);
            }
        }

        // Set confidence based on risk level
        let confidence = match risk_level {
            RiskLevel::ReadOnly => 0.95,
            RiskLevel::Write => 0.80,
            RiskLevel::Execute => 0.70,
            RiskLevel::Network => 0.75,
            RiskLevel::Destructive => 0.50,
        };
        builder.set_confidence(confidence);

        builder.build()
    }

    /// Get the current agent state.
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Get a cancellation token for this agent.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Cancel the current task.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Get the brain reference (for usage stats).
    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    /// Get the safety guardian reference (for audit log).
    pub fn safety(&self) -> &SafetyGuardian {
        &self.safety
    }

    /// Get a mutable reference to the safety guardian (for contract setup).
    pub fn safety_mut(&mut self) -> &mut SafetyGuardian {
        &mut self.safety
    }

    /// Get the memory system reference.
    pub fn memory(&self) -> &MemorySystem {
        &self.memory
    }

    /// Get a mutable reference to the memory system.
    pub fn memory_mut(&mut self) -> &mut MemorySystem {
        &mut self.memory
    }

    /// Get a reference to the agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Get a mutable reference to the agent configuration.
    pub fn config_mut(&mut self) -> &mut AgentConfig {
        &mut self.config
    }

    /// Get per-tool token usage breakdown (tool_name -> estimated tokens).
    pub fn tool_token_breakdown(&self) -> &HashMap<String, usize> {
        &self.tool_token_usage
    }

    /// Build and record an [`crate::audit::ExecutionTrace`] for this task, if
    /// an audit store is attached. Safety-layer events accumulated since
    /// `safety_log_start` (tool requests/approvals/denials/executions) are
    /// folded into the trace alongside the final iteration count and usage.
    async fn record_execution_trace(
        &self,
        task_id: Uuid,
        goal: &str,
        success: bool,
        iterations: usize,
        safety_log_start: usize,
        total_usage: TokenUsage,
        total_cost: CostEstimate,
    ) {
        let Some(store) = &self.audit_store else {
            return;
        };
        let mut trace =
            crate::audit::ExecutionTrace::new(self.safety.session_id(), task_id, goal);
        for entry in self.safety.audit_log().iter().skip(safety_log_start) {
            trace.push_event(crate::audit::TraceEventKind::from_audit_event(&entry.event));
        }
        trace.iterations = iterations;
        trace.total_usage = total_usage;
        trace.total_cost = total_cost;
        trace.complete(success);
        store.lock().await.add_trace(trace);
    }

    /// Format top token consumers as a summary string.
    pub fn top_tool_consumers(&self, n: usize) -> String {
        if self.tool_token_usage.is_empty() {
            return String::new();
        }
        let total: usize = self.tool_token_usage.values().sum();
        if total == 0 {
            return String::new();
        }
        let mut sorted: Vec<_> = self.tool_token_usage.iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(a.1));
        let top: Vec<String> = sorted
            .iter()
            .take(n)
            .map(|(name, tokens)| {
                let pct = (**tokens as f64 / total as f64 * 100.0) as u8;
                format!("{} ({}%)", name, pct)
            })
            .collect();
        top.join(", ")
    }

    /// Compact the conversation context by summarizing older messages.
    /// Returns (messages_before, messages_after).
    pub fn compact(&mut self) -> (usize, usize) {
        let before = self.memory.short_term.len();
        if before <= 2 {
            return (before, before);
        }
        let msgs: Vec<crate::types::Message> =
            self.memory.short_term.messages().iter().cloned().collect();
        let summary = crate::summarizer::smart_fallback_summary(&msgs, 500);
        self.memory.short_term.compress(summary);
        let after = self.memory.short_term.len();
        (before, after)
    }
}

/// A no-op callback for testing.
pub struct NoOpCallback;

#[async_trait::async_trait]
impl AgentCallback for NoOpCallback {
    async fn on_assistant_message(&self, _message: &str) {}
    async fn on_token(&self, _token: &str) {}
    async fn request_approval(&self, _action: &ActionRequest) -> ApprovalDecision {
        ApprovalDecision::Approve // auto-approve in tests
    }
    async fn on_tool_start(&self, _tool_name: &str, _args: &serde_json::Value) {}
    async fn on_tool_result(&self, _tool_name: &str, _output: &ToolOutput, _duration_ms: u64) {}
    async fn on_status_change(&self, _status: AgentStatus) {}
    async fn on_usage_update(&self, _usage: &TokenUsage, _cost: &CostEstimate) {}
    async fn on_decision_explanation(&self, _explanation: &DecisionExplanation) {}
}

/// A callback that records all events for test assertions.
pub struct RecordingCallback {
    messages: tokio::sync::Mutex<Vec<String>>,
    tool_calls: tokio::sync::Mutex<Vec<String>>,
    status_changes: tokio::sync::Mutex<Vec<AgentStatus>>,
    explanations: tokio::sync::Mutex<Vec<DecisionExplanation>>,
    budget_warnings: tokio::sync::Mutex<Vec<(String, BudgetSeverity)>>,
    context_health_events: tokio::sync::Mutex<Vec<ContextHealthEvent>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self {
            messages: tokio::sync::Mutex::new(Vec::new()),
            tool_calls: tokio::sync::Mutex::new(Vec::new()),
            status_changes: tokio::sync::Mutex::new(Vec::new()),
            explanations: tokio::sync::Mutex::new(Vec::new()),
            budget_warnings: tokio::sync::Mutex::new(Vec::new()),
            context_health_events: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    pub async fn tool_calls(&self) -> Vec<String> {
        self.tool_calls.lock().await.clone()
    }

    pub async fn status_changes(&self) -> Vec<AgentStatus> {
        self.status_changes.lock().await.clone()
    }

    pub async fn explanations(&self) -> Vec<DecisionExplanation> {
        self.explanations.lock().await.clone()
    }

    pub async fn budget_warnings(&self) -> Vec<(String, BudgetSeverity)> {
        self.budget_warnings.lock().await.clone()
    }

    pub async fn context_health_events(&self) -> Vec<ContextHealthEvent> {
        self.context_health_events.lock().await.clone()
    }
}

impl Default for RecordingCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AgentCallback for RecordingCallback {
    async fn on_assistant_message(&self, message: &str) {
        self.messages.lock().await.push(message.to_string());
    }
    async fn on_token(&self, _token: &str) {}
    async fn request_approval(&self, _action: &ActionRequest) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
    async fn on_tool_start(&self, tool_name: &str, _args: &serde_json::Value) {
        self.tool_calls.lock().await.push(tool_name.to_string());
    }
    async fn on_tool_result(&self, _tool_name: &str, _output: &ToolOutput, _duration_ms: u64) {}
    async fn on_status_change(&self, status: AgentStatus) {
        self.status_changes.lock().await.push(status);
    }
    async fn on_usage_update(&self, _usage: &TokenUsage, _cost: &CostEstimate) {}
    async fn on_decision_explanation(&self, explanation: &DecisionExplanation) {
        self.explanations.lock().await.push(explanation.clone());
    }
    async fn on_budget_warning(&self, message: &str, severity: BudgetSeverity) {
        self.budget_warnings
            .lock()
            .await
            .push((message.to_string(), severity));
    }
    async fn on_context_health(&self, event: &ContextHealthEvent) {
        self.context_health_events.lock().await.push(event.clone());
    }
}
