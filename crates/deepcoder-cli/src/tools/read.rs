//! File reading tool

use async_trait::async_trait;
use deepcoder_agent::paths::WorkspacePaths;
use deepcoder_agent::tool::{Tool, ToolResult};
use serde_json::json;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::{required_str, resolve};
use crate::utils::truncate_chars;

const MAX_LINES: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

/// Reads a text file, optionally a window of lines.
/// Registered twice: as `read_file` and as `read_text_file`.
pub struct ReadFileTool {
    name: &'static str,
    workspace: WorkspacePaths,
}

impl ReadFileTool {
    pub fn new(workspace: WorkspacePaths) -> Self {
        Self::named("read_file", workspace)
    }

    pub fn named(name: &'static str, workspace: WorkspacePaths) -> Self {
        Self { name, workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. For large files, use offset and limit."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let path = match required_str(&arguments, "path").and_then(|raw| resolve(&self.workspace, raw)) {
            Ok(path) => path,
            Err(e) => return e,
        };

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::error(format!("Failed to read {}: {}", path.display(), e));
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        if total_lines == 0 {
            return ToolResult::text("(empty file)");
        }

        let offset = arguments
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(MAX_LINES);

        if offset >= total_lines {
            return ToolResult::error(format!(
                "Offset {} is beyond end of file ({} lines total)",
                offset + 1,
                total_lines
            ));
        }

        let end = offset.saturating_add(limit).min(total_lines);
        let mut had_truncated = false;
        let formatted: Vec<String> = lines[offset..end]
            .iter()
            .map(|line| {
                if line.chars().count() > MAX_LINE_LENGTH {
                    had_truncated = true;
                }
                truncate_chars(line, MAX_LINE_LENGTH)
            })
            .collect();
        let mut output = formatted.join("\n");

        let mut notices = Vec::new();
        if had_truncated {
            notices.push(format!(
                "Some lines were truncated to {} characters",
                MAX_LINE_LENGTH
            ));
        }
        if end < total_lines {
            notices.push(format!(
                "{} more lines not shown. Use offset={} to continue reading",
                total_lines - end,
                end + 1
            ));
        }
        if !notices.is_empty() {
            output.push_str(&format!("\n\n... ({})", notices.join(". ")));
        }

        ToolResult::text(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(content: &str) -> (tempfile::TempDir, ReadFileTool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), content).unwrap();
        let tool = ReadFileTool::new(WorkspacePaths::new(dir.path()).unwrap());
        (dir, tool)
    }

    #[tokio::test]
    async fn test_read_whole_file() {
        let (_dir, tool) = setup("a\nb\nc");
        let result = tool
            .execute("t", json!({"path": "./f.txt"}), CancellationToken::new())
            .await;
        assert_eq!(result.content, "a\nb\nc");
    }

    #[tokio::test]
    async fn test_read_window() {
        let (_dir, tool) = setup("1\n2\n3\n4\n5");
        let result = tool
            .execute(
                "t",
                json!({"path": "f.txt", "offset": 2, "limit": 2}),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(
            result.content,
            "2\n3\n\n... (2 more lines not shown. Use offset=4 to continue reading)"
        );
    }

    #[tokio::test]
    async fn test_huge_limit_reads_to_end() {
        let (_dir, tool) = setup("1\n2\n3");
        let result = tool
            .execute(
                "t",
                json!({"path": "f.txt", "offset": 2, "limit": u64::MAX}),
                CancellationToken::new(),
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "2\n3");
    }

    #[tokio::test]
    async fn test_offset_past_end() {
        let (_dir, tool) = setup("only");
        let result = tool
            .execute("t", json!({"path": "f.txt", "offset": 5}), CancellationToken::new())
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_alias_name() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::named("read_text_file", WorkspacePaths::new(dir.path()).unwrap());
        assert_eq!(tool.name(), "read_text_file");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let (_dir, tool) = setup("");
        let result = tool
            .execute("t", json!({"path": "nope.txt"}), CancellationToken::new())
            .await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Failed to read"));
    }
}
