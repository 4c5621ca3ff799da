//! deepcoder-agent: the coding-agent loop
//!
//! This crate drives a model through multi-turn tool use: it executes native
//! or text-embedded tool calls, confines file paths to a workspace, and runs
//! a middleware chain (logging, memory compaction, git safety, error
//! recovery, audit) over the conversation state every turn.

pub mod agent;
pub mod compaction;
pub mod error;
pub mod events;
pub mod extract;
pub mod middleware;
pub mod paths;
pub mod state;
pub mod tool;

pub use agent::{Agent, Orchestrator, OrchestratorConfig, default_system_prompt};
pub use compaction::{CompactionConfig, MemoryCompactor};
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use extract::{ExtractedToolCall, extract_tool_calls};
pub use middleware::{Middleware, MiddlewareChain};
pub use paths::{OutsideWorkspace, WorkspacePaths};
pub use state::ConversationState;
pub use tool::{BoxedTool, StaticRegistry, Tool, ToolRegistry, ToolResult};
