//! Memory compaction for long conversations
//!
//! When the transcript grows past a token budget, everything but the most
//! recent messages is summarized by a (usually smaller) model and replaced by
//! a single system message. Compaction is lossy: the folded messages are gone.

use std::sync::Arc;

use deepcoder_ai::{Message, ModelClient, Role};

/// Prefix of the synthetic message that replaces compacted history
pub const SUMMARY_MARKER: &str = "[Conversation Summary]";

/// Configuration for memory compaction
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Estimated token count above which compaction runs
    pub threshold: usize,
    /// Messages at the end of the transcript that are never summarized
    pub keep_recent: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 6000,
            keep_recent: 10,
        }
    }
}

/// Outcome of one compaction, before it is spliced back into the transcript
#[derive(Debug, Clone)]
pub struct CompactionRecord {
    pub summary: String,
    pub kept_recent: Vec<Message>,
    pub original_count: usize,
    pub new_count: usize,
}

impl CompactionRecord {
    /// The replacement transcript: summary message followed by the kept tail
    pub fn into_messages(self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.kept_recent.len() + 1);
        messages.push(summary_message(&self.summary));
        messages.extend(self.kept_recent);
        messages
    }
}

// --- Token Estimation ---

/// Estimate tokens for a piece of text (chars/4, rounded up).
///
/// A heuristic, not a tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for the content of a whole transcript
pub fn estimate_total_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| m.content.chars().count())
        .sum::<usize>()
        .div_ceil(4)
}

// --- Summarization Prompt ---

const SUMMARIZATION_PROMPT: &str = "\
You are a conversation summarizer. Your task is to create a concise but comprehensive \
summary of the following conversation.

Focus on:
- Key decisions made
- Important context established
- Main topics discussed
- Any unresolved issues or pending tasks

Keep the summary focused and relevant. Aim for 3-5 sentences that capture the essential information.

CONVERSATION:
{conversation}

SUMMARY:";

/// Render messages as `Role: content` blocks separated by blank lines
fn format_messages_for_summary(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn fallback_summary(messages: &[Message]) -> String {
    let user = messages.iter().filter(|m| m.role == Role::User).count();
    let assistant = messages.iter().filter(|m| m.role == Role::Assistant).count();
    format!(
        "Previous conversation context: {} messages exchanged ({} user, {} assistant). \
         Full context available in conversation history.",
        messages.len(),
        user,
        assistant
    )
}

fn summary_message(summary: &str) -> Message {
    Message::system(format!("{}\n\n{}", SUMMARY_MARKER, summary))
}

/// Replace all but the last `keep_recent` messages with one summary message.
/// Returns the input unchanged when there is nothing older than the tail.
pub fn splice(messages: Vec<Message>, summary: &str, keep_recent: usize) -> Vec<Message> {
    if messages.len() <= keep_recent {
        return messages;
    }
    let split = messages.len() - keep_recent;
    CompactionRecord {
        summary: summary.to_string(),
        original_count: messages.len(),
        new_count: keep_recent + 1,
        kept_recent: messages[split..].to_vec(),
    }
    .into_messages()
}

/// Threshold-triggered summarizer
pub struct MemoryCompactor {
    summarizer: Arc<dyn ModelClient>,
    threshold: usize,
}

impl MemoryCompactor {
    pub fn new(summarizer: Arc<dyn ModelClient>, threshold: usize) -> Self {
        Self {
            summarizer,
            threshold,
        }
    }

    /// True when the estimated token count is strictly above the threshold
    pub fn should_compact(&self, messages: &[Message]) -> bool {
        let estimated = estimate_total_tokens(messages);
        tracing::debug!(
            estimated,
            threshold = self.threshold,
            "Checking compaction threshold"
        );
        estimated > self.threshold
    }

    /// Summarize everything older than the last `keep_recent` messages.
    ///
    /// Returns an empty string when there is nothing to summarize. A failed or
    /// empty summarizer reply degrades to a templated summary.
    pub async fn compact(&self, messages: &[Message], keep_recent: usize) -> String {
        if messages.len() <= keep_recent {
            return String::new();
        }
        let older = &messages[..messages.len() - keep_recent];

        let prompt =
            SUMMARIZATION_PROMPT.replace("{conversation}", &format_messages_for_summary(older));

        tracing::info!(
            "Compacting {} messages with {}",
            older.len(),
            self.summarizer.model_name()
        );

        match self.summarizer.invoke(&[Message::user(prompt)], &[]).await {
            Ok(response) if !response.content.trim().is_empty() => response.content,
            Ok(_) => {
                tracing::warn!("Summarizer returned an empty reply, using fallback summary");
                fallback_summary(older)
            }
            Err(e) => {
                tracing::warn!("Summarization failed, using fallback summary: {}", e);
                fallback_summary(older)
            }
        }
    }

    /// Summarize and build the replacement transcript in one step
    pub async fn compact_messages(
        &self,
        messages: &[Message],
        keep_recent: usize,
    ) -> Option<CompactionRecord> {
        if messages.len() <= keep_recent {
            return None;
        }
        let summary = self.compact(messages, keep_recent).await;
        let split = messages.len() - keep_recent;
        Some(CompactionRecord {
            summary,
            kept_recent: messages[split..].to_vec(),
            original_count: messages.len(),
            new_count: keep_recent + 1,
        })
    }
}
