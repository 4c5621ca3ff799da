//! Directory creation tool

use async_trait::async_trait;
use deepcoder_agent::paths::WorkspacePaths;
use deepcoder_agent::tool::{Tool, ToolResult};
use serde_json::json;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::{required_str, resolve};

/// Creates a directory and any missing parents. Succeeds if it already exists.
pub struct CreateDirectoryTool {
    workspace: WorkspacePaths,
}

impl CreateDirectoryTool {
    pub fn new(workspace: WorkspacePaths) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a directory, including missing parent directories."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to create, relative to the workspace"
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

        match fs::create_dir_all(&path).await {
            Ok(()) => ToolResult::text(format!("Successfully created directory {}", path.display())),
            Err(e) => ToolResult::error(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            )),
        }
    }
}
