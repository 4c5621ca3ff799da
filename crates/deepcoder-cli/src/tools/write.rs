//! File writing tool

use async_trait::async_trait;
use deepcoder_agent::paths::WorkspacePaths;
use deepcoder_agent::tool::{Tool, ToolResult};
use serde_json::json;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::{required_str, resolve};

/// Writes a whole file. The parent directory must already exist.
pub struct WriteFileTool {
    workspace: WorkspacePaths,
}

impl WriteFileTool {
    pub fn new(workspace: WorkspacePaths) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create a new file or overwrite an existing one with the given content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace (e.g. ./src/main.rs)"
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let (raw, content) = match (
            required_str(&arguments, "path"),
            required_str(&arguments, "content"),
        ) {
            (Ok(raw), Ok(content)) => (raw, content),
            (Err(e), _) | (_, Err(e)) => return e,
        };
        let path = match resolve(&self.workspace, raw) {
            Ok(path) => path,
            Err(e) => return e,
        };

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        match fs::write(&path, content).await {
            Ok(()) => ToolResult::text(format!(
                "Successfully wrote {} bytes to {}",
                content.len(),
                path.display()
            )),
            Err(e) => ToolResult::error(format!("Failed to write {}: {}", path.display(), e)),
        }
    }
}
