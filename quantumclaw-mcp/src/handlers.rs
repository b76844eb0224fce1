//! MCP request handlers — routes JSON-RPC requests to the appropriate handler.

use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListResourcesResult,
    ListToolsResult, MCP_PROTOCOL_VERSION, McpTool, ReadResourceParams, ReadResourceResult,
    ResourcesCapability, ServerCapabilities, ServerInfo, ToolContent, ToolsCapability,
};
use crate::resources::ResourceManager;
use quantumclaw_core::config::McpSafetyConfig;
use quantumclaw_core::injection::InjectionDetector;
use quantumclaw_tools::registry::ToolRegistry;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Maximum tool output size in bytes (10 MB). Outputs exceeding this are truncated
/// to prevent OOM in MCP clients with limited buffer capacity.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Simple sliding-window rate limiter for MCP tool calls.
struct McpRateLimiter {
    timestamps: VecDeque<Instant>,
    max_per_minute: usize,
}

impl McpRateLimiter {
    fn new(max_per_minute: usize) -> Self {
        Self {
            timestamps: VecDeque::new(),
            max_per_minute,
        }
    }

    /// Returns `true` if the call is allowed, `false` if rate-limited.
    fn check_and_record(&mut self) -> bool {
        let now = Instant::now();
        let one_minute_ago = now - std::time::Duration::from_secs(60);

        // Evict old timestamps
        while self.timestamps.front().is_some_and(|&t| t < one_minute_ago) {
            self.timestamps.pop_front();
        }

        if self.timestamps.len() >= self.max_per_minute {
            return false;
        }

        self.timestamps.push_back(now);
        true
    }
}

/// Validate tool arguments against the tool's JSON schema.
fn validate_arguments(tool_name: &str, schema: &Value, arguments: &Value) -> Result<(), McpError> {
    match jsonschema::validate(schema, arguments) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Check if the error is from schema compilation vs validation
            let msg = e.to_string();
            if msg.contains("schema") && msg.contains("invalid") {
                warn!(tool = %tool_name, error = %msg, "Failed to compile tool schema — skipping validation");
                Ok(())
            } else {
                Err(McpError::InvalidParams {
                    message: format!("Schema validation failed for '{}': {}", tool_name, msg),
                })
            }
        }
    }
}

/// Handles MCP protocol requests by delegating to the tool registry and resource manager.
pub struct RequestHandler {
    tool_registry: Arc<ToolRegistry>,
    resource_manager: ResourceManager,
    initialized: bool,
    server_info: ServerInfo,
    /// Safety policy configuration for MCP tool calls.
    mcp_safety: McpSafetyConfig,
    /// Injection detector for scanning tool arguments and outputs.
    injection_detector: Option<InjectionDetector>,
    /// Rate limiter for tool calls.
    rate_limiter: Option<McpRateLimiter>,
}

impl RequestHandler {
    /// Create a new request handler with default safety settings.
    pub fn new(tool_registry: Arc<ToolRegistry>, resource_manager: ResourceManager) -> Self {
        Self::with_safety(tool_registry, resource_manager, McpSafetyConfig::default())
    }

    /// Create a new request handler with explicit safety configuration.
    pub fn with_safety(
        tool_registry: Arc<ToolRegistry>,
        resource_manager: ResourceManager,
        mcp_safety: McpSafetyConfig,
    ) -> Self {
        let injection_detector =
            if mcp_safety.enabled && (mcp_safety.scan_inputs || mcp_safety.scan_outputs) {
                Some(InjectionDetector::new())
            } else {
                None
            };

        let rate_limiter = if mcp_safety.enabled && mcp_safety.max_calls_per_minute > 0 {
            Some(McpRateLimiter::new(mcp_safety.max_calls_per_minute))
        } else {
            None
        };

        Self {
            tool_registry,
            resource_manager,
            initialized: false,
            server_info: ServerInfo {
                name: "rustant".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            mcp_safety,
            injection_detector,
            rate_limiter,
        }
    }

    /// Check if the server has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Handle the `initialize` request.
    pub fn handle_initialize(&mut self, params: InitializeParams) -> Result<Value, McpError> {
        info!(
            client = %params.client_info.name,
            client_version = ?params.client_info.version,
            protocol_version = %params.protocol_version,
            "MCP client connecting"
        );

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
                resources: Some(ResourcesCapability {
                    subscribe: Some(false),
                    list_changed: Some(false),
                }),
            },
            server_info: self.server_info.clone(),
        };

        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: format!("Failed to serialize initialize result: {}", e),
        })
    }

    /// Handle the `notifications/initialized` notification.
    pub fn handle_initialized(&self) {
        info!("MCP client initialized successfully");
    }

    /// Handle the `tools/list` request.
    pub fn handle_tools_list(&self) -> Result<Value, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let definitions = self.tool_registry.list_definitions();
        let tools: Vec<McpTool> = definitions
            .into_iter()
            .map(|def| McpTool {
                name: def.name,
                description: Some(def.description),
                input_schema: def.parameters,
            })
            .collect();

        debug!(count = tools.len(), "Listing tools");

        let result = ListToolsResult { tools };
        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: format!("Failed to serialize tools list: {}", e),
        })
    }

    /// Handle the `tools/call` request.
    ///
    /// When safety is enabled, enforces an 8-step pipeline before execution:
    /// 1. Rate limiting check
    /// 2. Denied tools list check
    /// 3. Risk level vs `max_risk_level` (unless in `allowed_tools`)
    /// 4. Input injection scan on serialized arguments
    /// 5. JSON schema validation
    /// 6. **Execute tool**
    /// 7. Output injection scan (warn-prefix, not block)
    /// 8. Audit log entry
    pub async fn handle_tools_call(&mut self, params: CallToolParams) -> Result<Value, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let tool_name = &params.name;
        let arguments = params
            .arguments
            .unwrap_or(Value::Object(Default::default()));
        let start_time = Instant::now();

        info!(tool = %tool_name, "Calling tool via MCP");
        debug!(tool = %tool_name, args = %arguments, "Tool call arguments");

        // Verify the tool exists before executing
        if self.tool_registry.get(tool_name).is_none() {
            return Err(McpError::ToolError {
                message: format!("Tool not found: {}", tool_name),
            });
        }

        // === Safety pipeline (skipped when safety is disabled) ===
        if self.mcp_safety.enabled {
            // 1. Rate limiting
            if let Some(ref mut limiter) = self.rate_limiter {
                if !limiter.check_and_record() {
                    warn!(tool = %tool_name, "MCP rate limit exceeded");
                    return Err(McpError::RateLimited {
                        message: format!(
                            "Rate limit exceeded: max {} calls/minute",
                            self.mcp_safety.max_calls_per_minute
                        ),
                    });
                }
            }

            // 2. Denied tools list
            if self.mcp_safety.denied_tools.iter().any(|d| d == tool_name) {
                warn!(tool = %tool_name, "MCP tool denied by policy");
                return Err(McpError::ToolDenied {
                    message: format!("Tool '{}' is denied by MCP safety policy", tool_name),
                });
            }

            // 3. Risk level check (unless tool is in allowed_tools override)
            let is_explicitly_allowed =
                self.mcp_safety.allowed_tools.iter().any(|a| a == tool_name);
            if !is_explicitly_allowed {
                if let Some(tool_risk) = self.tool_registry.get_risk_level(tool_name) {
                    let max_risk = self.mcp_safety.parsed_max_risk_level();
                    if tool_risk > max_risk {
                        warn!(
                            tool = %tool_name,
                            tool_risk = ?tool_risk,
                            max_risk = ?max_risk,
                            "MCP tool exceeds max risk level"
                        );
                        return Err(McpError::ToolDenied {
                            message: format!(
                                "Tool '{}' risk level ({:?}) exceeds max allowed ({:?})",
                                tool_name, tool_risk, max_risk
                            ),
                        });
                    }
                }
            }

            // 4. Input injection scan
            if self.mcp_safety.scan_inputs {
                if let Some(ref detector) = self.injection_detector {
                    let args_str = arguments.to_string();
                    let scan = detector.scan_input(&args_str);
                    if scan.is_suspicious {
                        warn!(
                            tool = %tool_name,
                            risk_score = scan.risk_score,
                            patterns = scan.detected_patterns.len(),
                            "Injection detected in MCP tool arguments"
                        );
                        return Err(McpError::ToolDenied {
                            message: format!(
                                "Injection pattern detected in arguments for '{}' (risk: {:.2})",
                                tool_name, scan.risk_score
                            ),
                        });
                    }
                }
            }

            // 5. JSON schema validation
            if let Some(schema) = self.tool_registry.get_parameters_schema(tool_name) {
                validate_arguments(tool_name, &schema, &arguments)?;
            }
        }

        // 6. Execute the tool
        let execute_result = self.tool_registry.execute(tool_name, arguments).await;

        // 7. Post-processing: output injection scan + truncation
        match execute_result {
            Ok(output) => {
                let is_error = output
                    .metadata
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);

                // Truncate oversized output to prevent OOM in MCP clients.
                let mut text = if output.content.len() > MAX_OUTPUT_BYTES {
                    warn!(
                        tool = %tool_name,
                        size = output.content.len(),
                        limit = MAX_OUTPUT_BYTES,
                        "Tool output truncated"
                    );
                    let mut end = MAX_OUTPUT_BYTES;
                    while end > 0 && !output.content.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!(
                        "{}\n\n[output truncated — {} bytes exceeded {} byte limit]",
                        &output.content[..end],
                        output.content.len(),
                        MAX_OUTPUT_BYTES
                    )
                } else {
                    output.content
                };

                // Output injection scan (warn-prefix, don't block)
                if self.mcp_safety.enabled && self.mcp_safety.scan_outputs {
                    if let Some(ref detector) = self.injection_detector {
                        let scan = detector.scan_tool_output(&text);
                        if scan.is_suspicious {
                            warn!(
                                tool = %tool_name,
                                risk_score = scan.risk_score,
                                "Injection pattern detected in tool output"
                            );
                            text = format!(
                                "[WARNING: Output may contain injection patterns (risk: {:.2})]\n\n{}",
                                scan.risk_score, text
                            );
                        }
                    }
                }

                // 8. Audit log
                if self.mcp_safety.enabled && self.mcp_safety.audit_enabled {
                    let duration = start_time.elapsed();
                    info!(
                        tool = %tool_name,
                        duration_ms = duration.as_millis(),
                        is_error = is_error,
                        output_len = text.len(),
                        "MCP tool call audit"
                    );
                }

                let result = CallToolResult {
                    content: vec![ToolContent::Text { text }],
                    is_error: if is_error { Some(true) } else { None },
                };

                serde_json::to_value(result).map_err(|e| McpError::InternalError {
                    message: format!("Failed to serialize tool result: {}", e),
                })
            }
            Err(e) => {
                // Audit failed calls too
                if self.mcp_safety.enabled && self.mcp_safety.audit_enabled {
                    let duration = start_time.elapsed();
                    warn!(
                        tool = %tool_name,
                        duration_ms = duration.as_millis(),
                        error = %e,
                        "MCP tool call failed (audit)"
                    );
                }

                warn!(tool = %tool_name, error = %e, "Tool execution failed");
                let result = CallToolResult {
                    content: vec![ToolContent::Text {
                        text: format!("Error: {}", e),
                    }],
                    is_error: Some(true),
                };

                serde_json::to_value(result).map_err(|e| McpError::InternalError {
                    message: format!("Failed to serialize error result: {}", e),
                })
            }
        }
    }

    /// Handle the `resources/list` request.
    pub fn handle_resources_list(&self) -> Result<Value, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let resources = self.resource_manager.list_resources()?;
        debug!(count = resources.len(), "Listing resources");

        let result = ListResourcesResult { resources };
        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: format!("Failed to serialize resources list: {}", e),
        })
    }

    /// Handle the `resources/read` request.
    pub fn handle_resources_read(&self, params: ReadResourceParams) -> Result<Value, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        info!(uri = %params.uri, "Reading resource via MCP");

        let contents = self.resource_manager.read_resource(&params.uri)?;
        let result = ReadResourceResult { contents };

        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: format!("Failed to serialize resource contents: {}", e),
        })
    }

    /// Route a JSON-RPC method to the appropriate handler.
    /// Returns the result value or an error.
    pub async fn route(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        match method {
            "initialize" => {
                let init_params: InitializeParams =
                    serde_json::from_value(params).map_err(|e| McpError::InvalidParams {
                        message: format!("Invalid initialize params: {}", e),
                    })?;
                self.handle_initialize(init_params)
            }
            "notifications/initialized" => {
                self.handle_initialized();
                Ok(Value::Null)
            }
            "tools/list" => self.handle_tools_list(),
            "tools/call" => {
                let call_params: CallToolParams =
                    serde_json::from_value(params).map_err(|e| McpError::InvalidParams {
                        message: format!("Invalid tools/call params: {}", e),
                    })?;
                self.handle_tools_call(call_params).await
            }
            "resources/list" => self.handle_resources_list(),
            "resources/read" => {
                let read_params: ReadResourceParams =
                    serde_json::from_value(params).map_err(|e| McpError::InvalidParams {
                        message: format!("Invalid resources/read params: {}", e),
                    })?;
                self.handle_resources_read(read_params)
            }
            _ => Err(McpError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}
