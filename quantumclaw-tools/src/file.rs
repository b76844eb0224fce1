//! File operation tools: read, list, and write — the base built-in set named
//! by the runtime's tool surface (`file_read`/`file_list`/`file_write`).

use crate::registry::Tool;
use async_trait::async_trait;
use base64::Engine;
use quantumclaw_core::error::ToolError;
use quantumclaw_core::types::{Artifact, RiskLevel, ToolOutput};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cap per the tool registry's file-read limit.
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Validate that a path stays inside the workspace.
///
/// For existing paths, canonicalizes both path and workspace to handle symlinks.
/// For non-existent paths (e.g., new files to create), checks that the
/// normalized path doesn't contain `..` components that escape the workspace.
fn validate_workspace_path(
    workspace: &Path,
    path_str: &str,
    tool_name: &str,
) -> Result<PathBuf, ToolError> {
    // Canonicalize workspace to handle symlinks (e.g., /var -> /private/var on macOS)
    let workspace_canonical = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());

    let resolved = if Path::new(path_str).is_absolute() {
        PathBuf::from(path_str)
    } else {
        workspace_canonical.join(path_str)
    };

    // For existing paths, use canonicalize for accurate resolution
    if resolved.exists() {
        let canonical = resolved
            .canonicalize()
            .map_err(|e| ToolError::ExecutionFailed {
                name: tool_name.into(),
                message: format!("Path resolution failed: {}", e),
            })?;

        if !canonical.starts_with(&workspace_canonical) {
            return Err(ToolError::PermissionDenied {
                name: tool_name.into(),
                reason: format!("Path '{}' is outside the workspace", path_str),
            });
        }
        return Ok(canonical);
    }

    // For non-existent paths, normalize away ".." components and check
    let mut normalized = Vec::new();
    for component in resolved.components() {
        match component {
            std::path::Component::ParentDir => {
                if normalized.pop().is_none() {
                    return Err(ToolError::PermissionDenied {
                        name: tool_name.into(),
                        reason: format!("Path '{}' escapes the workspace", path_str),
                    });
                }
            }
            std::path::Component::CurDir => {} // skip "."
            other => normalized.push(other),
        }
    }
    let normalized_path: PathBuf = normalized.iter().collect();

    if !normalized_path.starts_with(&workspace_canonical) {
        return Err(ToolError::PermissionDenied {
            name: tool_name.into(),
            reason: format!("Path '{}' is outside the workspace", path_str),
        });
    }

    Ok(resolved)
}

/// Read a file's contents.
pub struct FileReadTool {
    workspace: PathBuf,
}

impl FileReadTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.workspace.join(path)
        };

        // Ensure the path doesn't escape the workspace
        let canonical = resolved
            .canonicalize()
            .map_err(|e| ToolError::ExecutionFailed {
                name: "file_read".into(),
                message: format!("Path resolution failed: {}", e),
            })?;

        // Canonicalize workspace too, to handle symlinks (e.g., /var -> /private/var on macOS)
        let workspace_canonical = self
            .workspace
            .canonicalize()
            .unwrap_or_else(|_| self.workspace.clone());

        if !canonical.starts_with(&workspace_canonical) {
            return Err(ToolError::PermissionDenied {
                name: "file_read".into(),
                reason: format!("Path '{}' is outside the workspace", path),
            });
        }

        Ok(canonical)
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Supports optional line range with start_line and end_line parameters."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (relative to workspace or absolute)"
                },
                "start_line": {
                    "type": "integer",
                    "description": "Starting line number (1-based, inclusive). Optional."
                },
                "end_line": {
                    "type": "integer",
                    "description": "Ending line number (1-based, inclusive). Optional."
                },
                "base64": {
                    "type": "boolean",
                    "description": "Return the raw file bytes base64-encoded instead of text. Default: false."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path_str = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments {
                name: "file_read".into(),
                reason: "'path' parameter is required and must be a string".into(),
            })?;

        let path = self.resolve_path(path_str)?;

        debug!(path = %path.display(), "Reading file");

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "file_read".into(),
                message: format!("Failed to stat '{}': {}", path_str, e),
            })?;
        if metadata.len() > MAX_READ_BYTES {
            return Err(ToolError::ExecutionFailed {
                name: "file_read".into(),
                message: format!(
                    "'{}' is {} bytes, exceeding the {}-byte read cap",
                    path_str,
                    metadata.len(),
                    MAX_READ_BYTES
                ),
            });
        }

        if args["base64"].as_bool().unwrap_or(false) {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    name: "file_read".into(),
                    message: format!("Failed to read '{}': {}", path_str, e),
                })?;
            return Ok(ToolOutput::text(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ));
        }

        let content =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    name: "file_read".into(),
                    message: format!("Failed to read '{}': {}", path_str, e),
                })?;

        let start_line = args["start_line"].as_u64().map(|n| n as usize);
        let end_line = args["end_line"].as_u64().map(|n| n as usize);

        let output = if start_line.is_some() || end_line.is_some() {
            let lines: Vec<&str> = content.lines().collect();
            let start = start_line.unwrap_or(1).saturating_sub(1);
            let end = end_line.unwrap_or(lines.len()).min(lines.len());

            if start >= lines.len() {
                return Ok(ToolOutput::text(format!(
                    "File has {} lines, start_line {} is out of range",
                    lines.len(),
                    start + 1
                )));
            }

            let selected: Vec<String> = lines[start..end]
                .iter()
                .enumerate()
                .map(|(i, line)| format!("{:>4} | {}", start + i + 1, line))
                .collect();
            selected.join("\n")
        } else {
            // Add line numbers
            content
                .lines()
                .enumerate()
                .map(|(i, line)| format!("{:>4} | {}", i + 1, line))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ToolOutput::text(output))
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::ReadOnly
    }
}

/// List files in a directory, respecting .gitignore patterns.
pub struct FileListTool {
    workspace: PathBuf,
}

impl FileListTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List files and directories at the given path. Respects .gitignore patterns."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path to list (relative to workspace). Defaults to workspace root."
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Whether to list files recursively. Default: false."
                },
                "max_depth": {
                    "type": "integer",
                    "description": "Maximum depth for recursive listing. Default: 3."
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path_str = args["path"].as_str().unwrap_or(".");
        let recursive = args["recursive"].as_bool().unwrap_or(false);
        let max_depth = args["max_depth"].as_u64().unwrap_or(3) as usize;

        let target_dir = if path_str == "." {
            self.workspace.clone()
        } else if Path::new(path_str).is_absolute() {
            PathBuf::from(path_str)
        } else {
            self.workspace.join(path_str)
        };

        if !target_dir.exists() {
            return Err(ToolError::ExecutionFailed {
                name: "file_list".into(),
                message: format!("Directory '{}' does not exist", path_str),
            });
        }

        if !target_dir.is_dir() {
            return Err(ToolError::ExecutionFailed {
                name: "file_list".into(),
                message: format!("'{}' is not a directory", path_str),
            });
        }

        debug!(path = %target_dir.display(), recursive, max_depth, "Listing directory");

        let mut entries = Vec::new();

        if recursive {
            // Use ignore crate for .gitignore-aware walking
            let walker = ignore::WalkBuilder::new(&target_dir)
                .max_depth(Some(max_depth))
                .hidden(false)
                .git_ignore(true)
                .build();

            for entry in walker {
                match entry {
                    Ok(entry) => {
                        let path = entry.path();
                        if path == target_dir {
                            continue;
                        }
                        let relative = path.strip_prefix(&target_dir).unwrap_or(path);
                        let type_indicator = if path.is_dir() { "/" } else { "" };
                        entries.push(format!("{}{}", relative.display(), type_indicator));
                    }
                    Err(e) => {
                        warn!("Error walking directory: {}", e);
                    }
                }
            }
        } else {
            let mut read_dir =
                tokio::fs::read_dir(&target_dir)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        name: "file_list".into(),
                        message: format!("Failed to read directory '{}': {}", path_str, e),
                    })?;

            while let Some(entry) =
                read_dir
                    .next_entry()
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        name: "file_list".into(),
                        message: format!("Error reading entry: {}", e),
                    })?
            {
                let file_type =
                    entry
                        .file_type()
                        .await
                        .map_err(|e| ToolError::ExecutionFailed {
                            name: "file_list".into(),
                            message: format!("Error reading file type: {}", e),
                        })?;

                let name = entry.file_name().to_string_lossy().to_string();
                let type_indicator = if file_type.is_dir() { "/" } else { "" };
                entries.push(format!("{}{}", name, type_indicator));
            }
        }

        entries.sort();
        let output = if entries.is_empty() {
            format!("Directory '{}' is empty", path_str)
        } else {
            format!("Contents of '{}':\n{}", path_str, entries.join("\n"))
        };

        Ok(ToolOutput::text(output))
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::ReadOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        // Create some test files
        std::fs::write(
            dir.path().join("hello.txt"),
            "Hello, World!\nLine 2\nLine 3\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/main.rs"),
            "fn main() {\n    println!(\"Hello\");\n}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/lib.rs"),
            "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
        )
        .unwrap();
        dir
    }

    // --- FileReadTool tests ---

    #[tokio::test]
    async fn test_file_read_basic() {
        let dir = setup_workspace();
        let tool = FileReadTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"path": "hello.txt"}))
            .await
            .unwrap();
        assert!(result.content.contains("Hello, World!"));
        assert!(result.content.contains("1 |")); // line numbers
    }

    #[tokio::test]
    async fn test_file_read_with_line_range() {
        let dir = setup_workspace();
        let tool = FileReadTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"path": "hello.txt", "start_line": 2, "end_line": 3}))
            .await
            .unwrap();
        assert!(result.content.contains("Line 2"));
        assert!(result.content.contains("Line 3"));
        assert!(!result.content.contains("Hello, World!"));
    }

    #[tokio::test]
    async fn test_file_read_missing_file() {
        let dir = setup_workspace();
        let tool = FileReadTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"path": "nonexistent.txt"}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_file_read_missing_path_param() {
        let dir = setup_workspace();
        let tool = FileReadTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({})).await;
        assert!(result.is_err());
        match result.unwrap_err() {
            ToolError::InvalidArguments { name, .. } => assert_eq!(name, "file_read"),
            e => panic!("Expected InvalidArguments, got: {:?}", e),
        }
    }

    #[test]
    fn test_file_read_properties() {
        let tool = FileReadTool::new(PathBuf::from("/tmp"));
        assert_eq!(tool.name(), "file_read");
        assert_eq!(tool.risk_level(), RiskLevel::ReadOnly);
        assert!(tool.description().contains("Read"));
    }

    // --- FileListTool tests ---

    #[tokio::test]
    async fn test_file_list_basic() {
        let dir = setup_workspace();
        let tool = FileListTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(result.content.contains("hello.txt"));
        assert!(result.content.contains("src/"));
    }

    #[tokio::test]
    async fn test_file_list_subdirectory() {
        let dir = setup_workspace();
        let tool = FileListTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"path": "src"}))
            .await
            .unwrap();
        assert!(result.content.contains("main.rs"));
        assert!(result.content.contains("lib.rs"));
    }

    #[tokio::test]
    async fn test_file_list_recursive() {
        let dir = setup_workspace();
        let tool = FileListTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"path": ".", "recursive": true}))
            .await
            .unwrap();
        assert!(result.content.contains("src/main.rs") || result.content.contains("src\\main.rs"));
    }

    #[tokio::test]
    async fn test_file_list_nonexistent_dir() {
        let dir = setup_workspace();
        let tool = FileListTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"path": "nonexistent"}))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_file_list_properties() {
        let tool = FileListTool::new(PathBuf::from("/tmp"));
        assert_eq!(tool.name(), "file_list");
        assert_eq!(tool.risk_level(), RiskLevel::ReadOnly);
    }

    // --- FileWriteTool tests ---

    #[tokio::test]
    async fn test_file_write_create_new() {
        let dir = setup_workspace();
        let tool = FileWriteTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({
                "path": "new_file.txt",
                "content": "New content!"
            }))
            .await
            .unwrap();

        assert!(result.content.contains("Created"));
        assert!(result.artifacts.len() == 1);
        assert!(matches!(&result.artifacts[0], Artifact::FileCreated { .. }));

        let content = std::fs::read_to_string(dir.path().join("new_file.txt")).unwrap();
        assert_eq!(content, "New content!");
    }

    #[tokio::test]
    async fn test_file_write_overwrite_existing() {
        let dir = setup_workspace();
        let tool = FileWriteTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({
                "path": "hello.txt",
                "content": "Overwritten!"
            }))
            .await
            .unwrap();

        assert!(result.content.contains("Updated"));

        let content = std::fs::read_to_string(dir.path().join("hello.txt")).unwrap();
        assert_eq!(content, "Overwritten!");
    }

    #[tokio::test]
    async fn test_file_write_creates_directories() {
        let dir = setup_workspace();
        let tool = FileWriteTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({
                "path": "deep/nested/dir/file.txt",
                "content": "Deep content"
            }))
            .await
            .unwrap();

        assert!(result.content.contains("Created"));
        assert!(dir.path().join("deep/nested/dir/file.txt").exists());
    }

    #[tokio::test]
    async fn test_file_write_missing_params() {
        let dir = setup_workspace();
        let tool = FileWriteTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({"path": "test.txt"})).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_file_write_properties() {
        let tool = FileWriteTool::new(PathBuf::from("/tmp"));
        assert_eq!(tool.name(), "file_write");
        assert_eq!(tool.risk_level(), RiskLevel::Write);
    }


    // --- Workspace boundary validation tests ---

    #[tokio::test]
    async fn test_file_write_rejects_path_traversal() {
        let dir = setup_workspace();
        let tool = FileWriteTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({
                "path": "../../escape.txt",
                "content": "escaped!"
            }))
            .await;
        assert!(result.is_err());
        match result.unwrap_err() {
            ToolError::PermissionDenied { name, .. } => assert_eq!(name, "file_write"),
            e => panic!("Expected PermissionDenied, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_file_write_rejects_absolute_path_outside_workspace() {
        let dir = setup_workspace();
        let tool = FileWriteTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({
                "path": "/tmp/escape.txt",
                "content": "escaped!"
            }))
            .await;
        assert!(result.is_err());
        match result.unwrap_err() {
            ToolError::PermissionDenied { name, .. } => assert_eq!(name, "file_write"),
            e => panic!("Expected PermissionDenied, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_file_read_rejects_path_traversal() {
        let dir = setup_workspace();
        let tool = FileReadTool::new(dir.path().to_path_buf());

        // Attempt to read outside workspace using path traversal
        let result = tool
            .execute(serde_json::json!({"path": "../../etc/passwd"}))
            .await;
        assert!(result.is_err());
    }
}
