//! Built-in workspace tools
//!
//! Every tool resolves its own path arguments through [`WorkspacePaths`], so
//! they stay confined even when invoked with paths the loop did not rewrite.

mod edit;
mod list;
mod mkdir;
mod read;
mod shell;
mod write;

use deepcoder_agent::paths::WorkspacePaths;
use deepcoder_agent::tool::{BoxedTool, ToolResult};
use std::path::PathBuf;
use std::sync::Arc;

pub use edit::EditFileTool;
pub use list::ListDirectoryTool;
pub use mkdir::CreateDirectoryTool;
pub use read::ReadFileTool;
pub use shell::ShellTool;
pub use write::WriteFileTool;

/// The default tool set, in registration order
pub fn builtin_tools(workspace: &WorkspacePaths) -> Vec<BoxedTool> {
    vec![
        Arc::new(WriteFileTool::new(workspace.clone())),
        Arc::new(ReadFileTool::new(workspace.clone())),
        Arc::new(ReadFileTool::named("read_text_file", workspace.clone())),
        Arc::new(EditFileTool::new(workspace.clone())),
        Arc::new(CreateDirectoryTool::new(workspace.clone())),
        Arc::new(ListDirectoryTool::new(workspace.clone())),
        Arc::new(ShellTool::new(workspace.clone())),
    ]
}

/// Required string argument, or the error result to return
fn required_str<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolResult> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolResult::error(format!("Missing '{}' argument", key)))
}

/// Resolve a path argument inside the workspace
fn resolve(workspace: &WorkspacePaths, raw: &str) -> Result<PathBuf, ToolResult> {
    workspace
        .resolve(raw)
        .map_err(|e| ToolResult::error(e.to_string()))
}
