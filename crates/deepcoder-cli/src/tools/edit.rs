//! File editing tool

use async_trait::async_trait;
use deepcoder_agent::paths::WorkspacePaths;
use deepcoder_agent::tool::{Tool, ToolResult};
use serde_json::json;
use similar::{ChangeTag, TextDiff};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::{required_str, resolve};

/// Maximum diff lines echoed back to the model
const MAX_DIFF_LINES: usize = 50;

/// Replaces one exact, unique occurrence of a text snippet
pub struct EditFileTool {
    workspace: WorkspacePaths,
}

impl EditFileTool {
    pub fn new(workspace: WorkspacePaths) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing exact text. old_text must match exactly (including whitespace) and occur once."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let (raw, old_text, new_text) = match (
            required_str(&arguments, "path"),
            required_str(&arguments, "old_text"),
            required_str(&arguments, "new_text"),
        ) {
            (Ok(p), Ok(o), Ok(n)) => (p, o, n),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
        };
        if old_text.is_empty() {
            return ToolResult::error("'old_text' must not be empty");
        }
        let path = match resolve(&self.workspace, raw) {
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

        match content.matches(old_text).count() {
            0 => {
                return ToolResult::error(format!(
                    "Could not find the exact text in {}. The old text must match exactly including all whitespace and newlines.",
                    raw
                ));
            }
            1 => {}
            n => {
                return ToolResult::error(format!(
                    "Found {} occurrences of the text in {}. The text must be unique. Please provide more context to make it unique.",
                    n, raw
                ));
            }
        }

        let new_content = content.replacen(old_text, new_text, 1);
        if content == new_content {
            return ToolResult::error(format!(
                "No changes made to {}. The replacement produced identical content.",
                raw
            ));
        }
        let diff = unified_diff(&content, &new_content);

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        match fs::write(&path, &new_content).await {
            Ok(()) => ToolResult::text(format!("Edited {}\n\nDiff:\n{}", raw, diff))
                .with_details(json!({ "diff": diff })),
            Err(e) => ToolResult::error(format!("Failed to write {}: {}", path.display(), e)),
        }
    }
}

/// Line diff with `+`/`-`/` ` markers, capped at [`MAX_DIFF_LINES`]
fn unified_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output: Vec<String> = diff
        .iter_all_changes()
        .filter(|change| change.tag() != ChangeTag::Equal)
        .map(|change| {
            let sign = if change.tag() == ChangeTag::Delete { "-" } else { "+" };
            let line = change.to_string();
            if line.ends_with('\n') {
                format!("{}{}", sign, line)
            } else {
                format!("{}{}\n", sign, line)
            }
        })
        .collect();

    if output.len() > MAX_DIFF_LINES {
        output.truncate(MAX_DIFF_LINES);
        output.push("... (diff truncated)\n".to_string());
    }
    output.concat()
}
