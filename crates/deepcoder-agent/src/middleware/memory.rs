use std::sync::Arc;

use async_trait::async_trait;
use deepcoder_ai::ModelClient;

use super::Middleware;
use crate::compaction::{CompactionConfig, MemoryCompactor};
use crate::state::{CompactionMetadata, ConversationState};

/// Compacts the transcript when it grows past the token threshold
pub struct MemoryMiddleware {
    compactor: MemoryCompactor,
    keep_recent: usize,
}

impl MemoryMiddleware {
    pub fn new(compactor: MemoryCompactor, keep_recent: usize) -> Self {
        Self {
            compactor,
            keep_recent,
        }
    }

    pub fn from_config(summarizer: Arc<dyn ModelClient>, config: &CompactionConfig) -> Self {
        Self::new(
            MemoryCompactor::new(summarizer, config.threshold),
            config.keep_recent,
        )
    }
}

#[async_trait]
impl Middleware for MemoryMiddleware {
    fn name(&self) -> &str {
        "memory"
    }

    async fn apply(&self, state: &mut ConversationState) {
        if state.messages.is_empty() || !self.compactor.should_compact(&state.messages) {
            return;
        }

        let Some(record) = self
            .compactor
            .compact_messages(&state.messages, self.keep_recent)
            .await
        else {
            tracing::debug!(
                "Over threshold but only {} messages, nothing older than the kept tail",
                state.messages.len()
            );
            return;
        };

        let metadata = CompactionMetadata {
            compacted_count: record.original_count.saturating_sub(self.keep_recent),
            kept_count: self.keep_recent,
            original_count: record.original_count,
            new_count: record.new_count,
        };
        state.messages = record.into_messages();
        state.compaction_metadata = Some(metadata);

        tracing::info!(
            "Compacted {} messages, kept {} recent (total: {} -> {})",
            metadata.compacted_count,
            metadata.kept_count,
            metadata.original_count,
            metadata.new_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deepcoder_ai::{Message, ModelClient, ModelResponse, Role, ToolSchema};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSummarizer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelClient for CountingSummarizer {
        async fn invoke(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> deepcoder_ai::Result<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ModelResponse::text("Earlier: the user asked for files."))
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn stage(threshold: usize, keep_recent: usize) -> (Arc<CountingSummarizer>, MemoryMiddleware) {
        let summarizer = Arc::new(CountingSummarizer {
            calls: AtomicU32::new(0),
        });
        let stage = MemoryMiddleware::from_config(
            summarizer.clone(),
            &CompactionConfig {
                threshold,
                keep_recent,
            },
        );
        (summarizer, stage)
    }

    fn long_conversation(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("{i}:{}", "x".repeat(40)))).collect()
    }

    #[tokio::test]
    async fn test_empty_state_adds_nothing() {
        let (summarizer, stage) = stage(0, 10);
        let mut state = ConversationState::default();
        stage.apply(&mut state).await;
        assert_eq!(state.keys(), vec!["messages"]);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_skips_summarizer() {
        let (summarizer, stage) = stage(6000, 10);
        let mut state = ConversationState::with_messages(long_conversation(20));
        stage.apply(&mut state).await;
        assert_eq!(state.messages.len(), 20);
        assert!(state.compaction_metadata.is_none());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compacts_and_records_metadata() {
        let (summarizer, stage) = stage(100, 4);
        let messages = long_conversation(12);
        let mut state = ConversationState::with_messages(messages.clone());

        stage.apply(&mut state).await;

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.messages.len(), 5);
        assert_eq!(state.messages[0].role, Role::System);
        assert_eq!(
            state.messages[0].content,
            "[Conversation Summary]\n\nEarlier: the user asked for files."
        );
        assert_eq!(&state.messages[1..], &messages[8..]);
        assert_eq!(
            state.compaction_metadata,
            Some(CompactionMetadata {
                compacted_count: 8,
                kept_count: 4,
                original_count: 12,
                new_count: 5,
            })
        );
    }

    #[tokio::test]
    async fn test_over_threshold_but_short_is_noop() {
        let (summarizer, stage) = stage(1, 10);
        let mut state = ConversationState::with_messages(long_conversation(3));
        stage.apply(&mut state).await;
        assert_eq!(state.messages.len(), 3);
        assert!(state.compaction_metadata.is_none());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }
}
