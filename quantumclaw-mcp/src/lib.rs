//! # Rustant MCP
//!
//! Model Context Protocol (MCP) server implementation for Rustant.
//!
//! The MCP server exposes Rustant's tools and workspace resources via JSON-RPC 2.0
//! over stdio or HTTP, allowing external clients (like Claude Desktop) to use Rustant
//! as a tool provider.
//!
//! ## Architecture
//!
//! ```text
//! Client <-> Transport (stdio/channel) <-> McpServer <-> RequestHandler
//!                                                        |-- ToolRegistry
//!                                                        +-- ResourceManager
//! ```

pub mod client;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod resources;
pub mod transport;

use error::McpError;
use handlers::RequestHandler;
use protocol::{IncomingMessage, JsonRpcResponse, RequestId};
use resources::ResourceManager;
use quantumclaw_tools::registry::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use transport::Transport;

/// The MCP server that processes JSON-RPC messages over a transport.
pub struct McpServer {
    handler: RequestHandler,
}

impl McpServer {
    /// Create a new MCP server with the given tool registry and workspace path.
    pub fn new(tool_registry: Arc<ToolRegistry>, workspace: PathBuf) -> Self {
        let resource_manager = ResourceManager::new(workspace);
        let handler = RequestHandler::new(tool_registry, resource_manager);
        Self { handler }
    }

    /// Run the MCP server on the given transport, processing messages until EOF or error.
    pub async fn run<T: Transport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        info!("MCP server starting");

        loop {
            let message = match transport.read_message().await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    info!("Transport closed (EOF), shutting down MCP server");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Transport read error");
                    break;
                }
            };

            if message.trim().is_empty() {
                continue;
            }

            debug!(message = %message, "Received MCP message");

            match self.process_message(&message).await {
                Ok(Some(response)) => {
                    let response_json =
                        serde_json::to_string(&response).map_err(|e| McpError::InternalError {
                            message: format!("Failed to serialize response: {}", e),
                        })?;
                    debug!(response = %response_json, "Sending MCP response");
                    transport.write_message(&response_json).await?;
                }
                Ok(None) => {
                    // Notification — no response needed
                }
                Err(e) => {
                    error!(error = %e, "Error processing MCP message");
                    let error_response = JsonRpcResponse::from_mcp_error(RequestId::Null, e);
                    let error_json =
                        serde_json::to_string(&error_response).unwrap_or_else(|_| {
                            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#
                                .to_string()
                        });
                    transport.write_message(&error_json).await?;
                }
            }
        }

        transport.close().await?;
        info!("MCP server stopped");
        Ok(())
    }

    /// Process a single incoming JSON-RPC message.
    /// Returns `Some(response)` for requests, `None` for notifications.
    async fn process_message(&mut self, raw: &str) -> Result<Option<JsonRpcResponse>, McpError> {
        let incoming: IncomingMessage =
            serde_json::from_str(raw).map_err(|e| McpError::ParseError {
                message: format!("Invalid JSON-RPC message: {}", e),
            })?;

        if incoming.jsonrpc != "2.0" {
            return Err(McpError::InvalidRequest {
                message: format!("Expected jsonrpc version 2.0, got: {}", incoming.jsonrpc),
            });
        }

        if incoming.is_notification() {
            debug!(method = %incoming.method, "Processing notification");
            match self.handler.route(&incoming.method, incoming.params).await {
                Ok(_) => Ok(None),
                Err(e) => {
                    warn!(method = %incoming.method, error = %e, "Notification handler error");
                    Ok(None) // Still no response for notifications
                }
            }
        } else {
            let id = incoming.id.unwrap_or(RequestId::Null);
            debug!(method = %incoming.method, "Processing request");

            match self.handler.route(&incoming.method, incoming.params).await {
                Ok(result) => Ok(Some(JsonRpcResponse::success(id, result))),
                Err(e) => Ok(Some(JsonRpcResponse::from_mcp_error(id, e))),
            }
        }
    }

    /// Check if the server has been initialized by a client.
    pub fn is_initialized(&self) -> bool {
        self.handler.is_initialized()
    }
}
