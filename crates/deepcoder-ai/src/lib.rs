//! deepcoder-ai: chat model abstraction layer
//!
//! Message and tool types shared by the agent, the [`ModelClient`] trait and
//! an Ollama `/api/chat` provider.

pub mod error;
pub mod providers;
pub mod retry;
pub mod types;

pub use error::{Error, Result};
pub use providers::ModelClient;
pub use providers::ollama::{ModelOptions, OllamaProvider};
pub use retry::RetryConfig;
pub use types::*;
