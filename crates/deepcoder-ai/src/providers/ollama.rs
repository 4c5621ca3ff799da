//! Ollama `/api/chat` provider (non-streaming)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ModelClient;
use crate::{
    error::{Error, Result},
    retry::RetryConfig,
    types::{Message, ModelResponse, Role, ToolCall, ToolSchema, Usage},
};

/// Default Ollama endpoint
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Per-model sampling and transport options
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub model: String,
    pub temperature: f32,
    /// Context window requested from the server
    pub num_ctx: u32,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl ModelOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.3,
            num_ctx: 32768,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Ollama API client bound to one model
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    options: ModelOptions,
    retry: RetryConfig,
}

impl OllamaProvider {
    /// Create a provider for `options.model` served at `base_url`
    pub fn new(base_url: impl Into<String>, options: ModelOptions) -> Result<Self> {
        if options.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model name is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            options,
            retry: RetryConfig::default(),
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolSchema]) -> ChatRequest {
        ChatRequest {
            model: self.options.model.clone(),
            messages: messages.iter().map(convert_message).collect(),
            tools: tools
                .iter()
                .map(|t| OllamaTool {
                    tool_type: "function".to_string(),
                    function: OllamaFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
            stream: false,
            options: RequestOptions {
                temperature: self.options.temperature,
                num_ctx: self.options.num_ctx,
            },
        }
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ModelResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16(), &body));
        }

        parse_chat_response(&body)
    }
}

#[async_trait]
impl ModelClient for OllamaProvider {
    async fn invoke(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ModelResponse> {
        let request = self.build_request(messages, tools);
        tracing::debug!(
            model = %self.options.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending chat request"
        );

        self.retry.run(|| self.send_once(&request)).await
    }

    fn model_name(&self) -> &str {
        &self.options.model
    }
}

fn convert_message(msg: &Message) -> OllamaMessage {
    let tool_calls = if msg.tool_calls.is_empty() {
        None
    } else {
        Some(
            msg.tool_calls
                .iter()
                .map(|tc| OllamaToolCall {
                    function: OllamaFunctionCall {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                })
                .collect(),
        )
    };

    OllamaMessage {
        role: msg.role.as_str().to_string(),
        content: msg.content.clone(),
        tool_calls,
        tool_name: match msg.role {
            Role::Tool => msg.tool_name.clone(),
            _ => None,
        },
    }
}

/// Parse a non-streaming `/api/chat` body. Ollama calls carry no id, so one is synthesized.
fn parse_chat_response(body: &str) -> Result<ModelResponse> {
    let parsed: ChatResponse = serde_json::from_str(body)?;

    if let Some(error) = parsed.error {
        return Err(Error::api("ollama_error", error));
    }

    let message = parsed
        .message
        .ok_or_else(|| Error::UnexpectedResponse("response has no message".into()))?;

    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|tc| {
            let arguments = match tc.function.arguments {
                serde_json::Value::String(raw) => serde_json::from_str(&raw)
                    .unwrap_or(serde_json::Value::String(raw)),
                serde_json::Value::Null => serde_json::json!({}),
                other => other,
            };
            ToolCall::new(
                format!("call_{}", uuid::Uuid::new_v4().simple()),
                tc.function.name,
                arguments,
            )
        })
        .collect();

    let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
        (None, None) => None,
        (input, output) => Some(Usage {
            input: input.unwrap_or(0),
            output: output.unwrap_or(0),
        }),
    };

    Ok(ModelResponse {
        content: message.content,
        tool_calls,
        usage,
    })
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    stream: bool,
    options: RequestOptions,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OllamaFunction,
}

#[derive(Debug, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> OllamaProvider {
        OllamaProvider::new("http://localhost:11434/", ModelOptions::new("qwen2.5:14b")).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_model() {
        let result = OllamaProvider::new(DEFAULT_BASE_URL, ModelOptions::new("  "));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(provider().base_url, "http://localhost:11434");
    }

    #[test]
    fn test_build_request_shape() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("create hello.txt"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "write_file", json!({"path": "hello.txt"}))],
            ),
            Message::tool_result("c1", "write_file", "ok"),
        ];
        let tools = vec![ToolSchema::new(
            "write_file",
            "Write a file",
            json!({"type": "object"}),
        )];

        let request = serde_json::to_value(provider().build_request(&messages, &tools)).unwrap();

        assert_eq!(request["model"], "qwen2.5:14b");
        assert_eq!(request["stream"], false);
        assert_eq!(request["options"]["num_ctx"], 32768);
        assert_eq!(request["tools"][0]["type"], "function");
        assert_eq!(request["tools"][0]["function"]["name"], "write_file");
        assert_eq!(request["messages"][0]["role"], "system");
        assert_eq!(
            request["messages"][2]["tool_calls"][0]["function"]["arguments"]["path"],
            "hello.txt"
        );
        assert_eq!(request["messages"][3]["role"], "tool");
        assert_eq!(request["messages"][3]["tool_name"], "write_file");
        assert!(request["messages"][1].get("tool_calls").is_none());
    }

    #[test]
    fn test_build_request_omits_empty_tools() {
        let request =
            serde_json::to_value(provider().build_request(&[Message::user("hi")], &[])).unwrap();
        assert!(request.get("tools").is_none());
    }

    #[test]
    fn test_parse_text_response() {
        let body = r#"{"model":"m","message":{"role":"assistant","content":"Done."},"done":true,"prompt_eval_count":12,"eval_count":3}"#;
        let response = parse_chat_response(body).unwrap();
        assert_eq!(response.content, "Done.");
        assert!(!response.has_tool_calls());
        assert_eq!(response.usage, Some(Usage { input: 12, output: 3 }));
    }

    #[test]
    fn test_parse_tool_calls_synthesizes_ids() {
        let body = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "write_file", "arguments": {"path": "./a.txt", "content": "x"}}},
                    {"function": {"name": "read_file", "arguments": "{\"path\": \"b.txt\"}"}}
                ]
            },
            "done": true
        })
        .to_string();

        let response = parse_chat_response(&body).unwrap();
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].name, "write_file");
        assert_eq!(response.tool_calls[0].arguments["path"], "./a.txt");
        assert_eq!(response.tool_calls[1].arguments["path"], "b.txt");
        let id0 = response.tool_calls[0].id.clone().unwrap();
        let id1 = response.tool_calls[1].id.clone().unwrap();
        assert!(id0.starts_with("call_"));
        assert_ne!(id0, id1);
        assert_eq!(response.usage, None);
    }

    #[test]
    fn test_parse_error_payload() {
        let err = parse_chat_response(r#"{"error":"model not loaded"}"#).unwrap_err();
        assert!(err.to_string().contains("model not loaded"));
    }

    #[test]
    fn test_parse_missing_message() {
        let err = parse_chat_response(r#"{"done":true}"#).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    /// Serve one canned `(status, body)` per connection, counting requests
    async fn stub_server(
        replies: Vec<(u16, String)>,
    ) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for (status, body) in replies {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&request);
                    if let Some(header_end) = text.find("\r\n\r\n") {
                        let length = text[..header_end]
                            .lines()
                            .find_map(|l| {
                                let (k, v) = l.split_once(':')?;
                                k.eq_ignore_ascii_case("content-length")
                                    .then(|| v.trim().parse::<usize>().ok())?
                            })
                            .unwrap_or(0);
                        if request.len() >= header_end + 4 + length {
                            break;
                        }
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_invoke_retries_server_errors() {
        let ok = json!({"message": {"role": "assistant", "content": "hi"}, "done": true});
        let (url, hits) = stub_server(vec![
            (503, r#"{"error":"server busy"}"#.to_string()),
            (200, ok.to_string()),
        ])
        .await;
        let provider = OllamaProvider::new(url, ModelOptions::new("qwen2.5:14b"))
            .unwrap()
            .with_retry(fast_retry(3));

        let response = provider.invoke(&[Message::user("hello")], &[]).await.unwrap();
        assert_eq!(response.content, "hi");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invoke_client_error_not_retried() {
        let (url, hits) = stub_server(vec![
            (404, r#"{"error":"model \"nope\" not found"}"#.to_string()),
            (200, "{}".to_string()),
        ])
        .await;
        let provider = OllamaProvider::new(url, ModelOptions::new("nope"))
            .unwrap()
            .with_retry(fast_retry(3));

        let err = provider.invoke(&[Message::user("hello")], &[]).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
