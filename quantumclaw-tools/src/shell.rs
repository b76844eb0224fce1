//! Shell command execution tool with streaming output support.

use crate::registry::Tool;
use async_trait::async_trait;
use quantumclaw_core::error::ToolError;
use quantumclaw_core::types::{ProgressUpdate, RiskLevel, ToolOutput};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Execute shell commands within the workspace.
///
/// Supports optional streaming of stdout/stderr lines via a progress channel.
pub struct ShellExecTool {
    workspace: PathBuf,
    /// Optional channel for streaming progress updates (shell output lines).
    progress_tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ShellExecTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            progress_tx: None,
        }
    }

    /// Create a shell tool with a progress sender for streaming output.
    pub fn with_progress(workspace: PathBuf, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            workspace,
            progress_tx: Some(tx),
        }
    }
}

#[async_trait]
impl Tool for ShellExecTool {
    fn name(&self) -> &str {
        "shell_exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory. Returns stdout, stderr, and exit code."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory (relative to workspace). Defaults to workspace root."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments {
                name: "shell_exec".into(),
                reason: "'command' parameter is required".into(),
            })?;

        let working_dir = if let Some(dir) = args["working_dir"].as_str() {
            self.workspace.join(dir)
        } else {
            self.workspace.clone()
        };

        debug!(command = command, cwd = %working_dir.display(), "Executing shell command");

        // If we have a progress sender, stream output line by line
        if let Some(ref tx) = self.progress_tx {
            self.execute_streaming(command, &working_dir, tx).await
        } else {
            self.execute_buffered(command, &working_dir).await
        }
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Execute
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }
}

impl ShellExecTool {
    /// Execute a command with streaming output via the progress channel.
    async fn execute_streaming(
        &self,
        command: &str,
        working_dir: &PathBuf,
        tx: &mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<ToolOutput, ToolError> {
        use tokio::process::Command;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                name: "shell_exec".into(),
                message: format!("Failed to execute command: {}", e),
            })?;

        // Send initial progress
        let _ = tx.send(ProgressUpdate::ToolProgress {
            tool: "shell_exec".into(),
            stage: format!("running: {}", truncate_cmd(command, 50)),
            percent: None,
        });

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();

        let tx_stdout = tx.clone();
        let tx_stderr = tx.clone();

        // Spawn tasks to read stdout and stderr concurrently
        let stdout_task = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(pipe) = stdout_pipe {
                let reader = BufReader::new(pipe);
                let mut line_stream = reader.lines();
                while let Ok(Some(line)) = line_stream.next_line().await {
                    let _ = tx_stdout.send(ProgressUpdate::ShellOutput {
                        line: line.clone(),
                        is_stderr: false,
                    });
                    lines.push(line);
                }
            }
            lines
        });

        let stderr_task = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(pipe) = stderr_pipe {
                let reader = BufReader::new(pipe);
                let mut line_stream = reader.lines();
                while let Ok(Some(line)) = line_stream.next_line().await {
                    let _ = tx_stderr.send(ProgressUpdate::ShellOutput {
                        line: line.clone(),
                        is_stderr: true,
                    });
                    lines.push(line);
                }
            }
            lines
        });

        // Wait for the process to complete
        let status = child.wait().await.map_err(|e| ToolError::ExecutionFailed {
            name: "shell_exec".into(),
            message: format!("Failed to wait for command: {}", e),
        })?;

        // Collect output from tasks
        if let Ok(lines) = stdout_task.await {
            stdout_lines = lines;
        }
        if let Ok(lines) = stderr_task.await {
            stderr_lines = lines;
        }

        let exit_code = status.code().unwrap_or(-1);
        let stdout = stdout_lines.join("\n");
        let stderr = stderr_lines.join("\n");

        let result = format!(
            "Exit code: {}\n\n--- stdout ---\n{}\n--- stderr ---\n{}",
            exit_code,
            if stdout.is_empty() { "(empty)" } else { &stdout },
            if stderr.is_empty() { "(empty)" } else { &stderr }
        );

        if exit_code != 0 {
            warn!(
                command = command,
                exit_code, "Command exited with non-zero status"
            );
        }

        Ok(ToolOutput::text(result))
    }

    /// Execute a command with buffered output (no streaming).
    async fn execute_buffered(
        &self,
        command: &str,
        working_dir: &PathBuf,
    ) -> Result<ToolOutput, ToolError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "shell_exec".into(),
                message: format!("Failed to execute command: {}", e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let result = format!(
            "Exit code: {}\n\n--- stdout ---\n{}\n--- stderr ---\n{}",
            exit_code,
            if stdout.is_empty() {
                "(empty)"
            } else {
                &stdout
            },
            if stderr.is_empty() {
                "(empty)"
            } else {
                &stderr
            }
        );

        if exit_code != 0 {
            warn!(
                command = command,
                exit_code, "Command exited with non-zero status"
            );
        }

        Ok(ToolOutput::text(result))
    }
}

/// Truncate a command string for display.
fn truncate_cmd(cmd: &str, max: usize) -> String {
    if cmd.len() <= max {
        cmd.to_string()
    } else {
        format!("{}..", &cmd[..max.saturating_sub(2)])
    }
}
