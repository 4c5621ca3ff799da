//! Conversation state threaded through the loop and every middleware stage

use deepcoder_ai::{Message, Role};
use serde::{Deserialize, Serialize};

/// Bookkeeping left behind by the memory stage after a compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionMetadata {
    /// Messages folded into the summary
    pub compacted_count: usize,
    /// Messages kept verbatim
    pub kept_count: usize,
    pub original_count: usize,
    /// Length after splicing (summary + kept tail)
    pub new_count: usize,
}

/// State for one user request.
///
/// `messages` is the transcript. Every other field is optional and owned by a
/// single writer: the loop writes `error` and `truncated`, the error-recovery
/// stage owns `retry_count` and `max_retries_reached`, git safety owns
/// `git_operation_blocked`, memory owns `compaction_metadata`. `session_id`,
/// `user_id`, `action` and `extra` come from the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Last tool failure of the most recent turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub max_retries_reached: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub git_operation_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction_metadata: Option<CompactionMetadata>,
    /// The loop stopped at its iteration cap rather than on a tool-free answer
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,

    /// Arbitrary caller-supplied keys
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ConversationState {
    /// Fresh state for one request, seeded with the user turn
    pub fn new(request: impl Into<String>) -> Self {
        Self::with_messages(vec![Message::user(request)])
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Content of the last assistant message, the user-visible answer
    pub fn final_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Names of the keys currently present, in declaration order.
    /// Flags count only when set.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = vec!["messages".to_string()];
        let present = [
            ("session_id", self.session_id.is_some()),
            ("user_id", self.user_id.is_some()),
            ("action", self.action.is_some()),
            ("error", self.error.is_some()),
            ("retry_count", self.retry_count.is_some()),
            ("max_retries_reached", self.max_retries_reached),
            ("git_operation_blocked", self.git_operation_blocked),
            ("compaction_metadata", self.compaction_metadata.is_some()),
            ("truncated", self.truncated),
        ];
        keys.extend(
            present
                .iter()
                .filter(|(_, is_set)| *is_set)
                .map(|(name, _)| name.to_string()),
        );
        keys.extend(self.extra.keys().cloned());
        keys
    }
}
