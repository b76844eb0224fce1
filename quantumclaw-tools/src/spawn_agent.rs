//! `spawn_agent` — creates a new named sub-agent directory and issues it a
//! scoped child AID signed by the spawning agent's identity.
//!
//! Generalizes the teacher's multi-agent council dispatch concept into a
//! single built-in tool: an agent asks for a named helper with a narrower
//! capability set, rather than a fixed council of pre-registered personas.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quantumclaw_core::agent_registry::{AgentDescriptor, AgentRegistry};
use quantumclaw_core::error::ToolError;
use quantumclaw_core::identity::IdentityManager;
use quantumclaw_core::types::{RiskLevel, ToolOutput};
use tokio::sync::Mutex;

use crate::registry::Tool;

/// Shared handle to the agent registry, mutated by `spawn_agent` (new agent
/// directories) and by the hatching flow.
pub type SharedAgentRegistry = Arc<Mutex<AgentRegistry>>;

/// Spawns a scoped child agent under `workspace/agents/<name>/`.
pub struct SpawnAgentTool {
    registry: SharedAgentRegistry,
    identity: Arc<Mutex<IdentityManager>>,
    agents_dir: PathBuf,
}

impl SpawnAgentTool {
    pub fn new(
        registry: SharedAgentRegistry,
        identity: Arc<Mutex<IdentityManager>>,
        agents_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            identity,
            agents_dir,
        }
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Create a new named sub-agent with its own SOUL and a scoped capability token \
         signed by the spawning agent. The child's scopes must be a subset of the \
         spawning agent's own scopes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Unique name for the new agent (used as its directory name)"
                },
                "soul": {
                    "type": "string",
                    "description": "Initial SOUL.md content describing the child's personality/purpose"
                },
                "scopes": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Capability scopes to grant the child. Must be a subset of the caller's own scopes."
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let name = args["name"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments {
                name: "spawn_agent".into(),
                reason: "'name' is required".into(),
            })?;
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(ToolError::InvalidArguments {
                name: "spawn_agent".into(),
                reason: format!("'{name}' is not a valid agent name"),
            });
        }

        let soul = args["soul"].as_str().unwrap_or("").to_string();
        let scopes: Vec<String> = args["scopes"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        {
            let registry = self.registry.lock().await;
            if registry.get_exact(name).is_some() {
                return Err(ToolError::ExecutionFailed {
                    name: "spawn_agent".into(),
                    message: format!("agent '{name}' already exists"),
                });
            }
        }

        let identity = self.identity.lock().await;
        let (_child_key, child_identity) = identity.issue_child(name, scopes).map_err(|e| {
            ToolError::PermissionDenied {
                name: "spawn_agent".into(),
                reason: e.to_string(),
            }
        })?;
        drop(identity);

        let dir = self.agents_dir.join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "spawn_agent".into(),
                message: format!("failed to create agent directory: {e}"),
            })?;
        tokio::fs::write(dir.join("SOUL.md"), &soul)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "spawn_agent".into(),
                message: format!("failed to write SOUL.md: {e}"),
            })?;
        let aid_json =
            serde_json::to_vec_pretty(&child_identity).map_err(|e| ToolError::ExecutionFailed {
                name: "spawn_agent".into(),
                message: format!("failed to serialize child AID: {e}"),
            })?;
        tokio::fs::write(dir.join("aid.json"), aid_json)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "spawn_agent".into(),
                message: format!("failed to write aid.json: {e}"),
            })?;

        let descriptor = AgentDescriptor {
            name: name.to_string(),
            dir: dir.clone(),
            soul,
            identity: Some(child_identity.clone()),
            hatched: false,
        };
        self.registry.lock().await.insert(descriptor);

        Ok(ToolOutput::text(format!(
            "spawned agent '{name}' (aid {}) with scopes {:?}",
            child_identity.id, child_identity.scopes
        )))
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Write
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }
}
