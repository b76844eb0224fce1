//! # Rustant Tools
//!
//! Built-in tool implementations for the Rustant agent: file operations,
//! shell execution, web access, canvas rendering, process inspection,
//! knowledge-graph search, agent spawning, and cross-channel delivery.

pub mod canvas;
pub mod cross_channel;
pub mod file;
pub mod knowledge_graph;
#[macro_use]
pub mod macros;
pub mod registry;
pub mod shell;
pub mod spawn_agent;
pub mod system_monitor;
pub mod utils;
pub mod web;

use quantumclaw_core::agent::RegisteredTool;
use quantumclaw_core::agent_registry::AgentRegistry;
use quantumclaw_core::approvals::ExecApprovals;
use quantumclaw_core::audit::AuditLog;
use quantumclaw_core::channels::manager::ChannelManager;
use quantumclaw_core::identity::IdentityManager;
use quantumclaw_core::trust::{TrustContext, TrustKernel};
use quantumclaw_core::types::ProgressUpdate;
use registry::{Tool, ToolRegistry};
use spawn_agent::SharedAgentRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Register the base built-in tools with the given workspace path.
///
/// Covers the stateless/workspace-scoped tools: file I/O, shell execution,
/// web access, canvas rendering, process inspection, and knowledge-graph
/// search. `spawn_agent` and `cross_channel_send` need runtime-wide shared
/// state (the agent registry, identity manager, channel manager) and are
/// registered separately via [`register_agent_tools`].
pub fn register_builtin_tools(registry: &mut ToolRegistry, workspace: PathBuf) {
    register_builtin_tools_with_progress(registry, workspace, None);
}

/// Register the base built-in tools, optionally with a progress channel for
/// streaming shell output.
pub fn register_builtin_tools_with_progress(
    registry: &mut ToolRegistry,
    workspace: PathBuf,
    progress_tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
) {
    let shell_tool: Arc<dyn Tool> = if let Some(tx) = progress_tx {
        Arc::new(shell::ShellExecTool::with_progress(workspace.clone(), tx))
    } else {
        Arc::new(shell::ShellExecTool::new(workspace.clone()))
    };

    let shared_canvas = canvas::create_shared_canvas();

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(file::FileReadTool::new(workspace.clone())),
        Arc::new(file::FileListTool::new(workspace.clone())),
        Arc::new(file::FileWriteTool::new(workspace.clone())),
        shell_tool,
        Arc::new(utils::EchoTool),
        Arc::new(utils::DateTimeTool),
        Arc::new(utils::CalculatorTool),
        Arc::new(web::WebSearchTool::new()),
        Arc::new(web::WebFetchTool::new()),
        Arc::new(knowledge_graph::KnowledgeGraphTool::new(workspace.clone())),
        Arc::new(system_monitor::SystemMonitorTool::new(workspace.clone())),
        Arc::new(canvas::CanvasPushTool::new(shared_canvas.clone())),
        Arc::new(canvas::CanvasClearTool::new(shared_canvas.clone())),
        Arc::new(canvas::CanvasUpdateTool::new(shared_canvas.clone())),
        Arc::new(canvas::CanvasSnapshotTool::new(shared_canvas.clone())),
        Arc::new(canvas::CanvasInteractTool::new(shared_canvas)),
    ];

    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!("Failed to register tool: {}", e);
        }
    }
}

/// Register the tools that need runtime-wide shared state rather than just
/// a workspace path: `spawn_agent` (agent registry + identity manager) and
/// `cross_channel_send` (channel manager).
pub fn register_agent_tools(
    registry: &mut ToolRegistry,
    agent_registry: SharedAgentRegistry,
    identity: Arc<Mutex<IdentityManager>>,
    agents_dir: PathBuf,
    channels: Arc<ChannelManager>,
) {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(spawn_agent::SpawnAgentTool::new(
            agent_registry,
            identity,
            agents_dir,
        )),
        Arc::new(cross_channel::CrossChannelSendTool::new(channels)),
    ];

    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!("Failed to register tool: {}", e);
        }
    }
}

/// Bridges the policy-gated [`ToolRegistry`] into the shape [`Agent`](quantumclaw_core::agent::Agent)
/// expects its tools in.
///
/// Every closure captures the same `Arc<ToolRegistry>` plus the trust/audit/
/// approval handles and routes through [`ToolRegistry::execute_guarded`], so
/// an agent's tool calls always go through the trust-kernel check and
/// approval queue (§4.10-4.11) rather than calling a tool's handler
/// directly. `caller` is the agent name attributed to every audit entry and
/// approval request this agent's tool calls produce.
pub fn to_registered_tools(
    registry: Arc<ToolRegistry>,
    trust: Arc<TrustKernel>,
    audit: Arc<AuditLog>,
    approvals: Arc<ExecApprovals>,
    require_approval: Arc<Vec<String>>,
    caller: Arc<str>,
) -> Vec<RegisteredTool> {
    registry
        .list_definitions()
        .into_iter()
        .filter_map(|definition| {
            let tool = registry.get(&definition.name)?;
            let risk_level = tool.risk_level();
            let name = definition.name.clone();
            let registry = registry.clone();
            let trust = trust.clone();
            let audit = audit.clone();
            let approvals = approvals.clone();
            let require_approval = require_approval.clone();
            let caller = caller.clone();

            let executor: quantumclaw_core::agent::ToolExecutor = Box::new(move |args| {
                let registry = registry.clone();
                let trust = trust.clone();
                let audit = audit.clone();
                let approvals = approvals.clone();
                let require_approval = require_approval.clone();
                let caller = caller.clone();
                let name = name.clone();
                Box::pin(async move {
                    registry
                        .execute_guarded(
                            &name,
                            args,
                            &caller,
                            &trust,
                            &TrustContext::default(),
                            &audit,
                            &approvals,
                            &require_approval,
                        )
                        .await
                })
            });

            Some(RegisteredTool {
                definition,
                risk_level,
                executor,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantumclaw_core::agent_registry::AgentDescriptor;
    use quantumclaw_core::secret_store::SecretStore;
    use tempfile::TempDir;

    #[test]
    fn test_register_all_builtin_tools() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, dir.path().to_path_buf());

        assert_eq!(registry.len(), 15);

        let names = registry.list_names();
        assert!(names.contains(&"file_read".to_string()));
        assert!(names.contains(&"file_list".to_string()));
        assert!(names.contains(&"file_write".to_string()));
        assert!(names.contains(&"shell_exec".to_string()));
        assert!(names.contains(&"echo".to_string()));
        assert!(names.contains(&"datetime".to_string()));
        assert!(names.contains(&"calculator".to_string()));
        assert!(names.contains(&"web_search".to_string()));
        assert!(names.contains(&"web_fetch".to_string()));
        assert!(names.contains(&"knowledge_graph".to_string()));
        assert!(names.contains(&"system_monitor".to_string()));
        assert!(names.contains(&"canvas_push".to_string()));
        assert!(names.contains(&"canvas_clear".to_string()));
        assert!(names.contains(&"canvas_update".to_string()));
        assert!(names.contains(&"canvas_snapshot".to_string()));
        assert!(names.contains(&"canvas_interact".to_string()));
    }

    #[test]
    fn test_tool_definitions_are_valid_json() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, dir.path().to_path_buf());

        let definitions = registry.list_definitions();
        for def in &definitions {
            assert!(!def.name.is_empty(), "Tool name should not be empty");
            assert!(
                !def.description.is_empty(),
                "Tool description should not be empty"
            );
            assert!(
                def.parameters.is_object(),
                "Parameters should be a JSON object for tool '{}'",
                def.name
            );
        }
    }

    #[tokio::test]
    async fn test_register_agent_tools() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();

        let vault_path = dir.path().join("secrets.enc");
        let mut store = SecretStore::load(&vault_path, b"salt").unwrap();
        let identity = IdentityManager::init(&dir.path().join("aid.json"), &mut store, "primary", None)
            .await
            .unwrap();

        let descriptor = AgentDescriptor {
            name: "primary".into(),
            dir: dir.path().to_path_buf(),
            soul: String::new(),
            identity: None,
            hatched: true,
        };
        let agent_registry = Arc::new(Mutex::new(AgentRegistry::from_descriptors(
            vec![descriptor],
            "primary",
        )));

        register_agent_tools(
            &mut registry,
            agent_registry,
            Arc::new(Mutex::new(identity)),
            dir.path().join("agents"),
            Arc::new(ChannelManager::new()),
        );

        let names = registry.list_names();
        assert!(names.contains(&"spawn_agent".to_string()));
        assert!(names.contains(&"cross_channel_send".to_string()));
    }

    #[tokio::test]
    async fn test_to_registered_tools_runs_through_trust_kernel() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, dir.path().to_path_buf());
        let registry = Arc::new(registry);

        let trust = Arc::new(TrustKernel::load(&dir.path().join("VALUES.md")).unwrap());
        let audit = Arc::new(AuditLog::in_memory());
        let approvals = Arc::new(ExecApprovals::in_memory());

        let tools = to_registered_tools(
            registry.clone(),
            trust,
            audit,
            approvals,
            Arc::new(Vec::new()),
            Arc::from("primary"),
        );

        assert_eq!(tools.len(), registry.len());
        let echo = tools.iter().find(|t| t.definition.name == "echo").unwrap();
        let out = (echo.executor)(serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert!(!out.content.is_empty());
    }
}
