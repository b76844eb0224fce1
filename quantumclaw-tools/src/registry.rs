//! Tool Registry — manages dynamic tool registration, validation, and execution.
//!
//! Tools are registered at startup and can be added/removed at runtime.
//! The registry provides tool definitions for the LLM and executes tool calls
//! with proper validation and timeout handling.

use async_trait::async_trait;
use quantumclaw_core::approvals::{ApprovalOutcome, ExecApprovals};
use quantumclaw_core::audit::AuditLog;
use quantumclaw_core::error::ToolError;
use quantumclaw_core::safety::{ActionDetails, ActionRequest};
use quantumclaw_core::trust::{TrustContext, TrustKernel, TrustOutcome};
use quantumclaw_core::types::{RiskLevel, ToolDefinition, ToolOutput};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Trait that all tools must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// The risk level of this tool.
    fn risk_level(&self) -> RiskLevel;

    /// Maximum execution time before timeout.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// How often `execute_guarded` re-checks a pending approval while awaiting
/// an operator's decision.
const APPROVAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The tool registry holds all registered tools and handles execution.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Returns error if a tool with the same name is already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered { name });
        }
        debug!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> Result<(), ToolError> {
        if self.tools.remove(name).is_none() {
            return Err(ToolError::NotFound {
                name: name.to_string(),
            });
        }
        debug!(tool = %name, "Unregistered tool");
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool definitions (for sending to LLM).
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// List all registered tool names.
    pub fn list_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name with the given arguments, applying timeout.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        let timeout = tool.timeout();
        info!(tool = %name, timeout_secs = timeout.as_secs(), "Executing tool");

        match tokio::time::timeout(timeout, tool.execute(args)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                name: name.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Full gated execution pipeline per the base spec's `ToolRegistry.execute`
    /// steps 1–3: trust check, approval queueing, enforced-timeout dispatch.
    /// Steps 4–5 (output truncation, `{ok, result|error}` shaping) are the
    /// caller's responsibility once this returns, since truncation limits
    /// differ per tool kind.
    ///
    /// `TrustKernel::check` is called exactly once, before the handler is
    /// ever reached — a deny short-circuits here and the underlying tool is
    /// never invoked.
    pub async fn execute_guarded(
        &self,
        name: &str,
        args: serde_json::Value,
        caller: &str,
        trust: &TrustKernel,
        trust_context: &TrustContext,
        audit: &AuditLog,
        approvals: &ExecApprovals,
        require_approval: &[String],
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        let action = ActionRequest {
            id: Uuid::new_v4(),
            tool_name: name.to_string(),
            risk_level: tool.risk_level(),
            description: format!("{caller} invokes {name}"),
            details: ActionDetails::Other {
                info: args.to_string(),
            },
            timestamp: chrono::Utc::now(),
            approval_context: Default::default(),
        };

        let decision = trust.check(&action, trust_context, audit).await;
        if decision.outcome == TrustOutcome::Deny {
            let reason = decision.reason.unwrap_or_else(|| "denied by trust policy".to_string());
            warn!(tool = %name, reason = %reason, "trust kernel denied tool call");
            return Ok(ToolOutput::error(reason));
        }

        if require_approval.iter().any(|kind| kind == name) {
            let approval_id = approvals.request(name, args.clone());
            audit
                .log(
                    caller,
                    "approval_requested",
                    format!("tool={name} approval_id={approval_id}"),
                    None,
                )
                .await;

            // Block the call on the operator's decision rather than handing
            // the model a "pending" placeholder it has no way to follow up
            // on. `ExecApprovals::check` auto-denies in place once the TTL
            // passes, so this loop also covers the expiry case without a
            // separate wait.
            let resolved = loop {
                let Some(approval) = approvals.check(approval_id, chrono::Utc::now()) else {
                    warn!(tool = %name, %approval_id, "approval record vanished while awaiting decision");
                    return Ok(ToolOutput::error(format!(
                        "tool '{name}' approval {approval_id} was lost before a decision was recorded"
                    )));
                };
                if approval.decision.is_some() {
                    break approval;
                }
                tokio::time::sleep(APPROVAL_POLL_INTERVAL).await;
            };

            match resolved.decision {
                Some(ApprovalOutcome::Approved) => {
                    audit
                        .log(
                            caller,
                            "approval_decided",
                            format!("tool={name} approval_id={approval_id} outcome=approved"),
                            None,
                        )
                        .await;
                    // Falls through to normal execution below.
                }
                Some(ApprovalOutcome::Denied) => {
                    let reason = if chrono::Utc::now() >= resolved.expires_at {
                        "expired"
                    } else {
                        "denied"
                    };
                    audit
                        .log(
                            caller,
                            "approval_decided",
                            format!(
                                "tool={name} approval_id={approval_id} outcome=denied reason={reason}"
                            ),
                            None,
                        )
                        .await;
                    return Ok(ToolOutput::error(format!(
                        "tool '{name}' denied (approval {approval_id}, reason={reason})"
                    )));
                }
                None => unreachable!("loop only breaks once a decision is recorded"),
            }
        }

        let result = self.execute(name, args).await;
        match &result {
            Ok(output) => {
                audit
                    .log(caller, "tool_executed", format!("tool={name} ok=true"), None)
                    .await;
                let _ = output;
            }
            Err(e) => {
                audit
                    .log(caller, "tool_executed", format!("tool={name} ok=false error={e}"), None)
                    .await;
            }
        }
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
