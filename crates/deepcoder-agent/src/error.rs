//! Error types for deepcoder-agent

use thiserror::Error;

/// Result type alias using deepcoder-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can escape an agent run
///
/// Tool failures never show up here; they are turned into conversation content.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model client
    #[error(transparent)]
    Ai(#[from] deepcoder_ai::Error),

    /// The tool list could not be obtained
    #[error("Tool discovery failed: {0}")]
    ToolDiscovery(String),

    /// The run was cancelled by the caller
    #[error("Agent run cancelled")]
    Cancelled,

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if this error came from the model transport
    pub fn is_model_error(&self) -> bool {
        matches!(self, Error::Ai(_))
    }
}
