//! Chat model providers

pub mod ollama;

use crate::{Message, ModelResponse, Result, ToolSchema};
use async_trait::async_trait;

/// A chat model that takes an ordered transcript and answers with text or tool calls
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send the transcript (and the tool set, if any) and return the model's reply
    async fn invoke(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ModelResponse>;

    /// Model identifier, for logging
    fn model_name(&self) -> &str;
}
