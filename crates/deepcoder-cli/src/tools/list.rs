//! Directory listing tool

use async_trait::async_trait;
use deepcoder_agent::paths::WorkspacePaths;
use deepcoder_agent::tool::{Tool, ToolResult};
use serde_json::json;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::resolve;

const DEFAULT_LIMIT: usize = 200;
const SKIPPED_DIRS: [&str; 3] = ["node_modules", "target", ".git"];

/// Lists a workspace directory, `[DIR]`/`[FILE]` per entry
pub struct ListDirectoryTool {
    workspace: WorkspacePaths,
}

impl ListDirectoryTool {
    pub fn new(workspace: WorkspacePaths) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the contents of a workspace directory (defaults to the workspace root)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the workspace (default: .)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "List subdirectories too (default: false)"
                }
            }
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let raw = arguments.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let recursive = arguments
            .get("recursive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let path = match resolve(&self.workspace, raw) {
            Ok(path) => path,
            Err(e) => return e,
        };

        if !path.is_dir() {
            return ToolResult::error(format!("Not a directory: {}", raw));
        }

        let mut entries = Vec::new();
        collect(&path, &path, recursive, &cancel, &mut entries);

        if cancel.is_cancelled() {
            return ToolResult::error("Listing cancelled");
        }
        if entries.is_empty() {
            return ToolResult::text("(empty directory)");
        }

        let mut output = entries.join("\n");
        if entries.len() >= DEFAULT_LIMIT {
            output.push_str(&format!("\n\n(showing first {} entries)", DEFAULT_LIMIT));
        }
        ToolResult::text(output)
    }
}

fn collect(
    base: &Path,
    dir: &Path,
    recursive: bool,
    cancel: &CancellationToken,
    entries: &mut Vec<String>,
) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    let mut items: Vec<_> = read_dir.flatten().collect();
    items.sort_by_key(|e| e.path());

    for entry in items {
        if cancel.is_cancelled() || entries.len() >= DEFAULT_LIMIT {
            return;
        }
        let full = entry.path();
        let relative = full.strip_prefix(base).unwrap_or(&full).to_string_lossy().into_owned();
        let is_dir = full.is_dir();

        if is_dir {
            entries.push(format!("[DIR] {}", relative));
            let name = entry.file_name();
            if recursive && !SKIPPED_DIRS.iter().any(|s| name == *s) {
                collect(base, &full, recursive, cancel, entries);
            }
        } else {
            entries.push(format!("[FILE] {}", relative));
        }
    }
}
