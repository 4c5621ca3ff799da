use std::path::PathBuf;

use async_trait::async_trait;

use super::{Middleware, append_line, preview};
use crate::state::ConversationState;

/// Observational stage: one activity line per turn, optionally mirrored to a file
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    log_file: Option<PathBuf>,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            log_file: Some(path.into()),
        }
    }

    fn activity_line(state: &ConversationState) -> Option<String> {
        let last = state.last_message()?;
        Some(format!(
            "Agent activity - Messages: {}, Last: {} - {}...",
            state.messages.len(),
            last.role,
            preview(&last.content, 100)
        ))
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn apply(&self, state: &mut ConversationState) {
        let Some(line) = Self::activity_line(state) else {
            return;
        };
        tracing::info!("{}", line);

        if state.git_operation_blocked {
            tracing::warn!("Git operation was blocked by safety middleware");
        }
        if let Some(meta) = &state.compaction_metadata {
            tracing::info!("Memory compaction: {} messages compacted", meta.compacted_count);
        }

        if let Some(path) = &self.log_file {
            let stamped = format!("{} - INFO - {}", chrono::Local::now().to_rfc3339(), line);
            if let Err(e) = append_line(path, &stamped).await {
                tracing::debug!("Could not write log file {}: {}", path.display(), e);
            }
        }
    }
}
