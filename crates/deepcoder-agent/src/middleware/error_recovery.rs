use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use deepcoder_ai::Message;
use regex::Regex;

use super::Middleware;
use crate::state::ConversationState;

static ERROR_PATH: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"/[\w/\-\.]+").ok());

/// Turns a tool failure recorded in `error` into retry guidance for the model
#[derive(Debug, Clone, Copy)]
pub struct ErrorRecoveryMiddleware {
    max_retries: u32,
    add_recovery_message: bool,
}

impl Default for ErrorRecoveryMiddleware {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ErrorRecoveryMiddleware {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            add_recovery_message: true,
        }
    }

    /// Track retries without appending guidance messages
    pub fn silent(mut self) -> Self {
        self.add_recovery_message = false;
        self
    }

    fn guidance(&self, error: &str, retry_count: u32) -> String {
        let mut message = format!("⚠️  An error occurred: {}. ", error);
        let lower = error.to_lowercase();

        if lower.contains("parent directory does not exist")
            || lower.contains("no such file or directory")
        {
            let parent = ERROR_PATH
                .as_ref()
                .and_then(|re| re.find(error))
                .map(|m| {
                    Path::new(m.as_str())
                        .parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                });
            match parent {
                Some(parent) => message.push_str(&format!(
                    "\n\n💡 TIP: The parent directory '{}' doesn't exist. \
                     Use the create_directory tool to create it first, then retry writing the file.",
                    parent
                )),
                None => message.push_str(
                    "\n\n💡 TIP: Create the parent directory first using create_directory, \
                     then retry writing the file.",
                ),
            }
        } else if lower.contains("access denied") || lower.contains("permission denied") {
            message.push_str(
                "\n\n💡 TIP: Check file permissions or verify the path is within the allowed workspace.",
            );
        } else if lower.contains("outside allowed directories") {
            message.push_str(
                "\n\n💡 TIP: The path is outside the workspace. All file operations must be within \
                 the workspace directory. Use relative paths or paths starting with the workspace root.",
            );
        } else {
            message.push_str(&format!(
                "Attempting recovery (attempt {}/{})...",
                retry_count, self.max_retries
            ));
        }
        message
    }
}

#[async_trait]
impl Middleware for ErrorRecoveryMiddleware {
    fn name(&self) -> &str {
        "error_recovery"
    }

    async fn apply(&self, state: &mut ConversationState) {
        let Some(error) = state.error.clone() else {
            return;
        };

        let retry_count = state.retry_count.unwrap_or(0) + 1;
        state.retry_count = Some(retry_count);
        tracing::warn!(
            "Error detected (attempt {}/{}): {}",
            retry_count,
            self.max_retries,
            error
        );

        if retry_count >= self.max_retries {
            state.max_retries_reached = true;
            tracing::error!("Max retries ({}) reached. Error: {}", self.max_retries, error);
            if self.add_recovery_message {
                state.messages.push(Message::system(format!(
                    "⚠️  Maximum retry attempts ({}) reached. Error: {}. \
                     Please try a different approach or check the error details.",
                    self.max_retries, error
                )));
            }
        } else {
            if self.add_recovery_message {
                state.messages.push(Message::system(self.guidance(&error, retry_count)));
            }
            tracing::info!("Attempting recovery (retry {})", retry_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_state(error: &str) -> ConversationState {
        let mut state = ConversationState::new("do it");
        state.error = Some(error.to_string());
        state
    }

    #[tokio::test]
    async fn test_empty_state_adds_nothing() {
        let mut state = ConversationState::default();
        ErrorRecoveryMiddleware::default().apply(&mut state).await;
        assert_eq!(state.keys(), vec!["messages"]);
    }

    #[tokio::test]
    async fn test_retry_ceiling_on_exact_call() {
        let stage = ErrorRecoveryMiddleware::new(3);
        let mut state = failing_state("Error: boom");

        stage.apply(&mut state).await;
        assert_eq!(state.retry_count, Some(1));
        assert!(!state.max_retries_reached);

        stage.apply(&mut state).await;
        assert_eq!(state.retry_count, Some(2));
        assert!(!state.max_retries_reached);

        stage.apply(&mut state).await;
        assert_eq!(state.retry_count, Some(3));
        assert!(state.max_retries_reached);
        assert_eq!(
            state.messages.last().unwrap().content,
            "⚠️  Maximum retry attempts (3) reached. Error: Error: boom. \
             Please try a different approach or check the error details."
        );
    }

    #[tokio::test]
    async fn test_generic_guidance() {
        let mut state = failing_state("timeout");
        ErrorRecoveryMiddleware::new(3).apply(&mut state).await;
        assert_eq!(
            state.messages.last().unwrap().content,
            "⚠️  An error occurred: timeout. Attempting recovery (attempt 1/3)..."
        );
    }

    #[tokio::test]
    async fn test_missing_parent_tip_names_directory() {
        let mut state =
            failing_state("No such file or directory (os error 2): /work/src/app/main.rs");
        ErrorRecoveryMiddleware::new(3).apply(&mut state).await;
        let content = &state.messages.last().unwrap().content;
        assert!(content.contains("The parent directory '/work/src/app' doesn't exist"));
    }

    #[tokio::test]
    async fn test_permission_tip_precedes_workspace_tip() {
        let mut state =
            failing_state("Access denied - path outside allowed directories: ../x");
        ErrorRecoveryMiddleware::new(3).apply(&mut state).await;
        let content = &state.messages.last().unwrap().content;
        assert!(content.contains("Check file permissions"));
    }

    #[tokio::test]
    async fn test_workspace_tip() {
        let mut state = failing_state("path is outside allowed directories");
        ErrorRecoveryMiddleware::new(3).apply(&mut state).await;
        assert!(
            state.messages.last().unwrap().content.contains("The path is outside the workspace")
        );
    }

    #[tokio::test]
    async fn test_silent_mode_counts_without_messages() {
        let mut state = failing_state("boom");
        ErrorRecoveryMiddleware::new(1).silent().apply(&mut state).await;
        assert_eq!(state.messages.len(), 1);
        assert!(state.max_retries_reached);
    }
}
