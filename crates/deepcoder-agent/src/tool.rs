//! Tool trait, results and registries

use async_trait::async_trait;
use deepcoder_ai::ToolSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text returned to the model
    pub content: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Optional structured details (for display)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            is_error: false,
            details: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            details: None,
        }
    }

    /// Add details to the result
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Text as it should appear in the transcript. Errors always carry an `Error: ` prefix.
    pub fn to_transcript(&self) -> String {
        if self.is_error && !self.content.starts_with("Error: ") {
            format!("Error: {}", self.content)
        } else {
            self.content.clone()
        }
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls and for exact-match lookup)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to the schema advertised to the model
pub fn to_schema(tool: &dyn Tool) -> ToolSchema {
    ToolSchema {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// Source of the tool list for one agent run
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Fetch the tools available for a run. Called once per run.
    async fn tools(&self) -> Result<Vec<BoxedTool>>;
}

/// A registry over a fixed list of tools
#[derive(Clone, Default)]
pub struct StaticRegistry {
    tools: Vec<BoxedTool>,
}

impl StaticRegistry {
    pub fn new(tools: Vec<BoxedTool>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ToolRegistry for StaticRegistry {
    async fn tools(&self) -> Result<Vec<BoxedTool>> {
        Ok(self.tools.clone())
    }
}

/// First tool whose name equals `name` exactly
pub fn find_tool<'a>(tools: &'a [BoxedTool], name: &str) -> Option<&'a BoxedTool> {
    tools.iter().find(|t| t.name() == name)
}
