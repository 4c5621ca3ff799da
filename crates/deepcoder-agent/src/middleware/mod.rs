//! Per-turn state transforms applied before every model call
//!
//! Stages run sequentially in the order they were added. A stage cannot fail:
//! anything that goes wrong inside it is logged and the stage becomes a no-op
//! for that turn. Stages may append to `messages` but never remove or reorder
//! entries (memory compaction is the one stage allowed to replace history).

mod audit;
mod error_recovery;
mod git_safety;
mod logging;
mod memory;

pub use audit::{AuditMiddleware, redact_sensitive};
pub use error_recovery::ErrorRecoveryMiddleware;
pub use git_safety::{GitSafetyMiddleware, find_dangerous_operation};
pub use logging::LoggingMiddleware;
pub use memory::MemoryMiddleware;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::state::ConversationState;

/// One stage of the middleware chain
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stage name for logging
    fn name(&self) -> &str;

    /// Transform the state in place
    async fn apply(&self, state: &mut ConversationState);
}

/// Ordered list of stages
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; stages run in insertion order
    pub fn with(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over `state`
    pub async fn run(&self, state: &mut ConversationState) {
        for stage in &self.stages {
            tracing::trace!(stage = stage.name(), "Applying middleware");
            stage.apply(state).await;
        }
    }
}

/// First `max` characters of `text`
pub(crate) fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Append one line to a file, creating parent directories as needed
pub(crate) async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.flush().await
}
