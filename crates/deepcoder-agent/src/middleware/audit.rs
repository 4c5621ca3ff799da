use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use super::{Middleware, append_line, preview};
use crate::state::ConversationState;

static SENSITIVE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b", "[EMAIL]"),
        (r"\b\d{3}-\d{2}-\d{4}\b", "[SSN]"),
        (r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b", "[CARD]"),
        (r"(?i)password\s*[:=]\s*\S+", "password=[REDACTED]"),
        (r"(?i)api[_-]?key\s*[:=]\s*\S+", "api_key=[REDACTED]"),
        (r"(?i)token\s*[:=]\s*\S+", "token=[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(p, replacement)| Regex::new(p).ok().map(|re| (re, replacement)))
    .collect()
});

/// Mask emails, SSN-like and card-like numbers, and inline credentials
pub fn redact_sensitive(text: &str) -> String {
    SENSITIVE_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// One JSON line of the audit log
#[derive(Debug, Clone, Serialize)]
struct AuditEntry {
    timestamp: String,
    message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_message_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_message_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_operation_blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_retries_reached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_compacted: Option<bool>,
    state_keys: Vec<String>,
}

/// Observational stage writing one redacted JSON line per turn
#[derive(Debug, Clone)]
pub struct AuditMiddleware {
    audit_file: Option<PathBuf>,
    include_message_content: bool,
}

impl Default for AuditMiddleware {
    fn default() -> Self {
        Self {
            audit_file: None,
            include_message_content: false,
        }
    }
}

impl AuditMiddleware {
    pub fn new(audit_file: impl Into<PathBuf>) -> Self {
        Self {
            audit_file: Some(audit_file.into()),
            ..Default::default()
        }
    }

    /// Record the first 200 characters of the last message
    pub fn include_message_content(mut self, include: bool) -> Self {
        self.include_message_content = include;
        self
    }

    fn entry(&self, state: &ConversationState) -> AuditEntry {
        let last = state.last_message();
        let last_message_content = last
            .filter(|_| self.include_message_content)
            .map(|m| preview(&redact_sensitive(&m.content), 200).to_string());

        AuditEntry {
            timestamp: chrono::Local::now().to_rfc3339(),
            message_count: state.messages.len(),
            user_id: state.user_id.clone(),
            session_id: state.session_id.clone(),
            action: state.action.clone(),
            last_message_role: last.map(|m| m.role.to_string()),
            last_message_content,
            git_operation_blocked: state.git_operation_blocked.then_some(true),
            max_retries_reached: state.max_retries_reached.then_some(true),
            memory_compacted: state.compaction_metadata.is_some().then_some(true),
            state_keys: state.keys(),
        }
    }
}

#[async_trait]
impl Middleware for AuditMiddleware {
    fn name(&self) -> &str {
        "audit"
    }

    async fn apply(&self, state: &mut ConversationState) {
        let entry = self.entry(state);

        if let Some(path) = &self.audit_file {
            match serde_json::to_string(&entry) {
                Ok(line) => {
                    if let Err(e) = append_line(path, &line).await {
                        tracing::error!("Failed to write audit entry to {}: {}", path.display(), e);
                    }
                }
                Err(e) => tracing::error!("Failed to serialize audit entry: {}", e),
            }
        }

        tracing::info!(
            "Audit: {} - User: {}",
            entry.action.as_deref().unwrap_or("activity"),
            entry.user_id.as_deref().unwrap_or("unknown")
        );
    }
}
