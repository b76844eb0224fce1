//! Gateway event types and message protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by the gateway to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// A client has connected.
    Connected { connection_id: Uuid },
    /// A client has disconnected.
    Disconnected { connection_id: Uuid },
    /// A new task was submitted.
    TaskSubmitted { task_id: Uuid, description: String },
    /// Progress update on a running task.
    TaskProgress {
        task_id: Uuid,
        progress: f32,
        message: String,
    },
    /// A task has completed.
    TaskCompleted {
        task_id: Uuid,
        success: bool,
        summary: String,
    },
    /// An assistant message (full).
    AssistantMessage { content: String },
    /// A single token from a streaming response.
    StreamToken { token: String },
    /// A tool is being executed.
    ToolExecution {
        tool_name: String,
        status: ToolStatus,
    },
    /// An error occurred.
    Error { code: String, message: String },
    /// A channel message was received.
    ChannelMessageReceived {
        channel_type: String,
        message: String,
    },
    /// A task was dispatched to a node.
    NodeTaskDispatched { node_id: String, task_name: String },
    /// An agent was spawned.
    AgentSpawned { agent_id: String, name: String },
    /// An agent was terminated.
    AgentTerminated { agent_id: String },
    /// Metrics update for dashboard monitoring.
    MetricsUpdate {
        active_connections: usize,
        active_sessions: usize,
        total_tool_calls: u64,
        total_llm_requests: u64,
        uptime_secs: u64,
    },
    /// An approval request awaiting user decision.
    ApprovalRequest {
        approval_id: Uuid,
        tool_name: String,
        description: String,
        risk_level: String,
    },
    /// A config snapshot was requested or changed.
    ConfigSnapshot { config_json: String },
    /// A heartbeat-driven message pushed to the user outside of any
    /// chat turn (scheduled task, auto-learn question, weekly summary).
    ProactiveMessage { source: String, message: String },
}

/// Status of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolStatus {
    Started,
    Running,
    Completed,
    Failed,
}

/// Messages sent from clients to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Authenticate with a token.
    Authenticate { token: String },
    /// Submit a new task to the agent.
    SubmitTask { description: String },
    /// Cancel a running task.
    CancelTask { task_id: Uuid },
    /// Request the current status.
    GetStatus,
    /// Keep-alive ping.
    Ping { timestamp: DateTime<Utc> },
    /// List connected channels.
    ListChannels,
    /// List registered nodes.
    ListNodes,
    /// Request current metrics for the dashboard.
    GetMetrics,
    /// Request current configuration snapshot.
    GetConfig,
    /// Submit an approval decision.
    ApprovalDecision {
        approval_id: Uuid,
        approved: bool,
        reason: Option<String>,
    },
}

/// Messages sent from the gateway to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Authentication succeeded.
    Authenticated { connection_id: Uuid },
    /// Authentication failed.
    AuthFailed { reason: String },
    /// A gateway event.
    Event { event: GatewayEvent },
    /// Response to a GetStatus request.
    StatusResponse {
        connected_clients: usize,
        active_tasks: usize,
        uptime_secs: u64,
    },
    /// Pong response to a Ping.
    Pong { timestamp: DateTime<Utc> },
    /// Channel status listing.
    ChannelStatus { channels: Vec<(String, String)> },
    /// Node status listing.
    NodeStatus { nodes: Vec<(String, String)> },
    /// Metrics snapshot for dashboard.
    MetricsResponse {
        active_connections: usize,
        active_sessions: usize,
        total_tool_calls: u64,
        total_llm_requests: u64,
        uptime_secs: u64,
    },
    /// Configuration snapshot.
    ConfigResponse { config_json: String },
    /// Approval decision acknowledgment.
    ApprovalAck { approval_id: Uuid, accepted: bool },
}
