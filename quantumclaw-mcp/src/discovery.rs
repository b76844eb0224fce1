//! MCP server discovery — reads config and manages external MCP server processes.
//!
//! Discovers configured MCP servers from the agent config, spawns them as subprocesses,
//! and manages their lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for an external MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Server name (used as identifier).
    pub name: String,
    /// Command to start the server.
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the server process.
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Whether to auto-connect on startup.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

fn default_true() -> bool {
    true
}

/// State of a discovered MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerState {
    pub config: McpServerConfig,
    pub status: McpServerStatus,
    pub tools_count: usize,
}

/// Status of an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpServerStatus {
    /// Server is configured but not started.
    Configured,
    /// Server process is starting.
    Starting,
    /// Server is connected and initialized.
    Connected,
    /// Server process has stopped or crashed.
    Disconnected,
    /// Server failed to start.
    Failed(String),
}

/// Manages discovery and lifecycle of external MCP servers.
pub struct McpServerManager {
    servers: HashMap<String, McpServerState>,
}

impl McpServerManager {
    /// Create a new server manager.
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }

    /// Add a server configuration.
    pub fn add_server(&mut self, config: McpServerConfig) {
        let name = config.name.clone();
        self.servers.insert(
            name,
            McpServerState {
                config,
                status: McpServerStatus::Configured,
                tools_count: 0,
            },
        );
    }

    /// List all configured servers.
    pub fn list_servers(&self) -> Vec<&McpServerState> {
        self.servers.values().collect()
    }

    /// Get a server by name.
    pub fn get_server(&self, name: &str) -> Option<&McpServerState> {
        self.servers.get(name)
    }

    /// Update server status.
    pub fn set_status(&mut self, name: &str, status: McpServerStatus) {
        if let Some(state) = self.servers.get_mut(name) {
            state.status = status;
        }
    }

    /// Update the tool count for a server.
    pub fn set_tools_count(&mut self, name: &str, count: usize) {
        if let Some(state) = self.servers.get_mut(name) {
            state.tools_count = count;
        }
    }

    /// Remove a server.
    pub fn remove_server(&mut self, name: &str) -> Option<McpServerState> {
        self.servers.remove(name)
    }

    /// Number of configured servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no servers are configured.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Get servers that should auto-connect.
    pub fn auto_connect_servers(&self) -> Vec<&McpServerConfig> {
        self.servers
            .values()
            .filter(|s| s.config.auto_connect)
            .map(|s| &s.config)
            .collect()
    }
}

impl Default for McpServerManager {
    fn default() -> Self {
        Self::new()
    }
}
