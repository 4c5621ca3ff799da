//! Error types for deepcoder-ai

use thiserror::Error;

/// Result type alias using deepcoder-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a chat model
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with an error payload or a non-success status
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Build an API error from an HTTP status and the response body
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| body.trim().to_string());
        Self::api(format!("http_{}", status), message)
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::Api {
                error_type,
                message,
            } => {
                let status = error_type
                    .strip_prefix("http_")
                    .and_then(|s| s.parse::<u16>().ok());
                if let Some(code) = status {
                    if code == 429 || (500..600).contains(&code) {
                        return true;
                    }
                }
                let msg = message.to_lowercase();
                msg.contains("overloaded")
                    || msg.contains("too many requests")
                    || msg.contains("server busy")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_extracts_error_field() {
        let e = Error::from_status(404, r#"{"error":"model \"nope\" not found"}"#);
        match e {
            Error::Api {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "http_404");
                assert_eq!(message, "model \"nope\" not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_status_plain_body() {
        let e = Error::from_status(502, "  Bad Gateway\n");
        assert_eq!(e.to_string(), "API error: Bad Gateway (type: http_502)");
    }

    #[test]
    fn test_retryable_server_errors() {
        assert!(Error::from_status(500, "").is_retryable());
        assert!(Error::from_status(503, "").is_retryable());
        assert!(Error::from_status(429, "").is_retryable());
    }

    #[test]
    fn test_retryable_overloaded_message() {
        let e = Error::api("error", "server is overloaded, try later");
        assert!(e.is_retryable());
    }

    #[test]
    fn test_not_retryable_client_errors() {
        assert!(!Error::from_status(400, r#"{"error":"bad request"}"#).is_retryable());
        assert!(!Error::from_status(404, "").is_retryable());
        assert!(!Error::UnexpectedResponse("no message".into()).is_retryable());
        assert!(!Error::InvalidConfig("empty model".into()).is_retryable());
    }
}
