use std::sync::LazyLock;

use async_trait::async_trait;
use deepcoder_ai::Message;
use regex::Regex;

use super::Middleware;
use crate::state::ConversationState;

/// Destructive git operations and how they are reported. First match wins.
static DANGEROUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)git\s+push\s+.*--force", "Force push detected"),
        (r"(?i)force\s+push", "Force push detected"),
        (r"(?i)git\s+reset\s+--hard", "Hard reset detected"),
        (r"(?i)git\s+clean\s+-[fFdDxX]", "Git clean detected"),
        (r"(?i)git\s+push\s+.*\b(main|master)\b", "Push to main/master branch"),
        (r"(?i)push.*\b(main|master)\b", "Push to main/master branch"),
    ]
    .into_iter()
    .filter_map(|(p, desc)| Regex::new(p).ok().map(|re| (re, desc)))
    .collect()
});

/// Description of the first dangerous git operation mentioned in `text`
pub fn find_dangerous_operation(text: &str) -> Option<&'static str> {
    DANGEROUS_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, desc)| *desc)
}

/// Warns about (or blocks) destructive git operations in the latest message
#[derive(Debug, Clone, Copy, Default)]
pub struct GitSafetyMiddleware {
    enforce: bool,
}

impl GitSafetyMiddleware {
    /// Warn-only mode
    pub fn warn() -> Self {
        Self { enforce: false }
    }

    /// Blocking mode: also sets `git_operation_blocked`
    pub fn enforce() -> Self {
        Self { enforce: true }
    }

    pub fn new(enforce: bool) -> Self {
        Self { enforce }
    }
}

#[async_trait]
impl Middleware for GitSafetyMiddleware {
    fn name(&self) -> &str {
        "git_safety"
    }

    async fn apply(&self, state: &mut ConversationState) {
        let Some(last) = state.last_message() else {
            return;
        };
        let Some(description) = find_dangerous_operation(&last.content) else {
            return;
        };

        let warning = if self.enforce {
            tracing::warn!("Blocked dangerous operation: {}", description);
            state.git_operation_blocked = true;
            format!("⚠️  WARNING: {}. This operation is blocked for safety.", description)
        } else {
            tracing::info!("Warning about operation: {}", description);
            format!("⚠️  WARNING: {}. Please confirm this is intentional.", description)
        };
        state.messages.push(Message::system(warning));
    }
}
