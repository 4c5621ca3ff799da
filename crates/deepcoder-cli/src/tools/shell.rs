//! Shell command tool

use async_trait::async_trait;
use deepcoder_agent::paths::WorkspacePaths;
use deepcoder_agent::tool::{Tool, ToolResult};
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::required_str;
use crate::utils::truncate_chars;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Per-stream character cap
const MAX_OUTPUT_CHARS: usize = 100_000;

/// Runs `sh -c <command>` with the workspace root as working directory
pub struct ShellTool {
    workspace: WorkspacePaths,
}

impl ShellTool {
    pub fn new(workspace: WorkspacePaths) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace directory. Returns stdout and stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to run"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let command = match required_str(&arguments, "command") {
            Ok(c) => c,
            Err(e) => return e,
        };
        let timeout_secs = arguments
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return ToolResult::error("Failed to capture command output");
        };

        let run = async {
            let (out, err) = tokio::join!(read_all(stdout), read_all(stderr));
            let status = child.wait().await;
            (out, err, status)
        };

        let (stdout, stderr, status) = tokio::select! {
            _ = cancel.cancelled() => return ToolResult::error("Command cancelled"),
            _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                return ToolResult::error(format!("Command timed out after {} seconds", timeout_secs));
            }
            finished = run => finished,
        };

        let mut output = stdout;
        if !stderr.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&stderr);
        }
        if output.is_empty() {
            output = "(no output)".to_string();
        }

        match status {
            Ok(status) if status.success() => ToolResult::text(output),
            Ok(status) => ToolResult::error(format!(
                "{}\n\nCommand exited with code {}",
                output,
                status.code().unwrap_or(-1)
            )),
            Err(e) => ToolResult::error(format!("Failed to wait for command: {}", e)),
        }
    }
}

async fn read_all(mut stream: impl AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        tracing::debug!("Failed to read command output: {}", e);
    }
    let text = String::from_utf8_lossy(&buf);
    truncate_chars(text.trim_end(), MAX_OUTPUT_CHARS)
}
