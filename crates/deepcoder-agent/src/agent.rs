//! The turn-by-turn driver for one user request

use async_trait::async_trait;
use deepcoder_ai::{Message, ModelClient, ToolSchema, Usage};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    events::AgentEvent,
    extract::extract_tool_calls,
    middleware::{MiddlewareChain, find_dangerous_operation},
    paths::{FsTool, OutsideWorkspace, PATH_KEYS, WorkspacePaths},
    state::ConversationState,
    tool::{BoxedTool, ToolRegistry, ToolResult, find_tool, to_schema},
};

/// Name of the tool used to create missing parent directories
pub const CREATE_DIRECTORY_TOOL: &str = "create_directory";

/// Anything that can drive a request to completion
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, state: ConversationState) -> Result<ConversationState>;
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on model calls per request
    pub max_iterations: u32,
    /// Replaces the generated system prompt when set
    pub system_prompt: Option<String>,
    /// Refuse every call whose arguments name a dangerous git operation
    pub enforce_git_safety: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: None,
            enforce_git_safety: false,
        }
    }
}

/// Tools fetched for one run, with their schemas and compiled validators
struct Toolbox {
    tools: Vec<BoxedTool>,
    schemas: Vec<ToolSchema>,
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl Toolbox {
    fn new(tools: Vec<BoxedTool>) -> Self {
        let schemas: Vec<ToolSchema> = tools.iter().map(|t| to_schema(t.as_ref())).collect();
        let mut validators = HashMap::new();
        for schema in &schemas {
            if validators.contains_key(&schema.name) {
                continue;
            }
            match jsonschema::validator_for(&schema.parameters) {
                Ok(validator) => {
                    validators.insert(schema.name.clone(), Arc::new(validator));
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid parameter schema for tool '{}', skipping validation: {}",
                        schema.name,
                        e
                    );
                }
            }
        }
        Self {
            tools,
            schemas,
            validators,
        }
    }
}

/// Drives the model, executes requested tools and loops until the model stops asking
pub struct Orchestrator {
    config: OrchestratorConfig,
    model: Arc<dyn ModelClient>,
    registry: Arc<dyn ToolRegistry>,
    middleware: MiddlewareChain,
    workspace: WorkspacePaths,
    event_tx: broadcast::Sender<AgentEvent>,
    cancel: Mutex<CancellationToken>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        model: Arc<dyn ModelClient>,
        registry: Arc<dyn ToolRegistry>,
        workspace: WorkspacePaths,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            model,
            registry,
            middleware: MiddlewareChain::new(),
            workspace,
            event_tx,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn workspace(&self) -> &WorkspacePaths {
        &self.workspace
    }

    /// Cancel the running request. Takes effect at the next turn boundary,
    /// and is forwarded to the tool currently executing.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Install a fresh cancellation token for the next run and return it.
    /// From here on `abort` cancels that run, even before it starts.
    pub fn begin_run(&self) -> CancellationToken {
        let mut guard = self.cancel.lock();
        *guard = CancellationToken::new();
        guard.clone()
    }

    fn system_prompt(&self, tools: &[BoxedTool]) -> String {
        match &self.config.system_prompt {
            Some(prompt) => prompt.clone(),
            None => default_system_prompt(&self.workspace, tools),
        }
    }

    /// Auto-mkdir, path resolution, git-block check, lookup, validation, invocation.
    async fn dispatch(
        &self,
        toolbox: &Toolbox,
        git_blocked: bool,
        call_id: &str,
        name: &str,
        mut arguments: Value,
        cancel: &CancellationToken,
    ) -> ToolResult {
        self.auto_mkdir(toolbox, call_id, name, &arguments, cancel).await;

        if let Err(e) = self.resolve_paths(name, &mut arguments) {
            return ToolResult::error(e.to_string());
        }

        if git_blocked || self.config.enforce_git_safety {
            if let Some(description) = find_dangerous_operation(&arguments.to_string()) {
                tracing::warn!("Refusing {} call: {}", name, description);
                return ToolResult::error(format!(
                    "Operation refused: {}. Dangerous git operations are blocked for safety.",
                    description
                ));
            }
        }

        let Some(tool) = find_tool(&toolbox.tools, name) else {
            return ToolResult::error(format!("Tool {} not found", name));
        };

        if let Some(err) = toolbox
            .validators
            .get(name)
            .and_then(|validator| validate_with_validator(&arguments, validator))
        {
            return ToolResult::error(err);
        }

        tool.execute(call_id, arguments, cancel.clone()).await
    }

    /// Create the parent directory of a `write_file` target before the write runs.
    /// Uses the path as the model wrote it, before resolution.
    async fn auto_mkdir(
        &self,
        toolbox: &Toolbox,
        call_id: &str,
        name: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) {
        if !FsTool::from_name(name).is_some_and(|t| t.creates_files()) {
            return;
        }
        let Some(raw) = path_argument(arguments) else {
            return;
        };
        let Some(parent) = WorkspacePaths::mkdir_parent(raw) else {
            return;
        };
        let Some(mkdir) = find_tool(&toolbox.tools, CREATE_DIRECTORY_TOOL) else {
            tracing::debug!("No {} tool, skipping auto-mkdir for {}", CREATE_DIRECTORY_TOOL, raw);
            return;
        };
        let target = match self.workspace.resolve(&parent) {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!("Skipping auto-mkdir: {}", e);
                return;
            }
        };

        tracing::debug!("Auto-creating directory {}", target.display());
        let result = mkdir
            .execute(
                &format!("{}_mkdir", call_id),
                json!({ "path": target.to_string_lossy() }),
                cancel.clone(),
            )
            .await;
        if result.is_error {
            tracing::debug!("Auto-mkdir of {} failed: {}", target.display(), result.content);
        }
    }

    /// Rewrite workspace-relative path arguments of filesystem tools to absolute paths
    fn resolve_paths(
        &self,
        name: &str,
        arguments: &mut Value,
    ) -> std::result::Result<(), OutsideWorkspace> {
        if FsTool::from_name(name).is_none() {
            return Ok(());
        }
        let Some(map) = arguments.as_object_mut() else {
            return Ok(());
        };
        for key in PATH_KEYS {
            if let Some(Value::String(raw)) = map.get(key) {
                let resolved = self.workspace.resolve(raw)?;
                map.insert(
                    key.to_string(),
                    Value::String(resolved.to_string_lossy().into_owned()),
                );
            }
        }
        Ok(())
    }

    /// Run one call with events around it
    async fn execute_call(
        &self,
        toolbox: &Toolbox,
        state: &ConversationState,
        call_id: &str,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let _ = self.event_tx.send(AgentEvent::ToolExecutionStart {
            tool_call_id: call_id.to_string(),
            tool_name: name.to_string(),
            arguments: arguments.clone(),
        });

        let result = self
            .dispatch(toolbox, state.git_operation_blocked, call_id, name, arguments, cancel)
            .await;
        if result.is_error {
            tracing::warn!("Tool {} failed: {}", name, result.content);
        } else {
            tracing::debug!("Tool {} succeeded", name);
        }

        let _ = self.event_tx.send(AgentEvent::ToolExecutionEnd {
            tool_call_id: call_id.to_string(),
            tool_name: name.to_string(),
            result: result.to_transcript(),
            is_error: result.is_error,
        });
        result
    }

    fn push_assistant(&self, state: &mut ConversationState, message: Message) {
        let _ = self.event_tx.send(AgentEvent::MessageEnd {
            message: message.clone(),
        });
        state.messages.push(message);
    }
}

#[async_trait]
impl Agent for Orchestrator {
    async fn run(&self, state: ConversationState) -> Result<ConversationState> {
        let cancel = self.begin_run();
        self.run_with_cancel(state, cancel).await
    }
}

impl Orchestrator {
    /// Run with a token obtained from [`Orchestrator::begin_run`]
    pub async fn run_with_cancel(
        &self,
        mut state: ConversationState,
        cancel: CancellationToken,
    ) -> Result<ConversationState> {
        let tools = self.registry.tools().await.map_err(|e| match e {
            Error::ToolDiscovery(_) => e,
            other => Error::ToolDiscovery(other.to_string()),
        })?;
        tracing::info!("Retrieved {} tools", tools.len());
        let toolbox = Toolbox::new(tools);
        let system = Message::system(self.system_prompt(&toolbox.tools));

        let _ = self.event_tx.send(AgentEvent::AgentStart);
        state.truncated = false;
        let mut turn = 0u32;
        let mut total_usage = Usage::default();

        let outcome = loop {
            if turn >= self.config.max_iterations {
                tracing::warn!(
                    "Stopped after {} iterations without a final answer",
                    self.config.max_iterations
                );
                state.truncated = true;
                break Ok(());
            }
            if cancel.is_cancelled() {
                break Err(Error::Cancelled);
            }
            turn += 1;
            tracing::info!("Agent iteration {}/{}", turn, self.config.max_iterations);
            let _ = self.event_tx.send(AgentEvent::TurnStart { turn_number: turn });

            self.middleware.run(&mut state).await;

            let mut request = Vec::with_capacity(state.messages.len() + 1);
            request.push(system.clone());
            request.extend(state.messages.iter().cloned());

            let response = match self.model.invoke(&request, &toolbox.schemas).await {
                Ok(response) => response,
                Err(e) => {
                    let _ = self.event_tx.send(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    break Err(e.into());
                }
            };
            if let Some(usage) = response.usage {
                total_usage.input += usage.input;
                total_usage.output += usage.output;
            }
            let usage = response.usage;

            if response.has_tool_calls() {
                let calls = response.tool_calls.clone();
                self.push_assistant(&mut state, response.into_message());
                state.error = None;

                for (idx, call) in calls.into_iter().enumerate() {
                    let call_id = call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}_{}", turn, idx));
                    let result = self
                        .execute_call(&toolbox, &state, &call_id, &call.name, call.arguments, &cancel)
                        .await;
                    let text = result.to_transcript();
                    if result.is_error {
                        state.error = Some(text.clone());
                    }
                    state
                        .messages
                        .push(Message::tool_result(call_id, call.name, text));
                }
            } else {
                let extracted = extract_tool_calls(&response.content);
                self.push_assistant(&mut state, response.into_message());

                if extracted.is_empty() {
                    let _ = self.event_tx.send(AgentEvent::TurnEnd {
                        turn_number: turn,
                        usage,
                    });
                    break Ok(());
                }

                tracing::info!("Extracted {} tool calls from text", extracted.len());
                state.error = None;
                let mut lines = Vec::with_capacity(extracted.len());
                for (idx, call) in extracted.into_iter().enumerate() {
                    let call_id = format!("text_call_{}_{}", turn, idx);
                    let result = self
                        .execute_call(&toolbox, &state, &call_id, &call.name, call.arguments, &cancel)
                        .await;
                    let text = result.to_transcript();
                    if result.is_error {
                        state.error = Some(text.clone());
                    }
                    lines.push(format!("{}: {}", call.name, text));
                }
                state.messages.push(Message::user(format!(
                    "Tool execution results:\n{}",
                    lines.join("\n")
                )));
            }

            let _ = self.event_tx.send(AgentEvent::TurnEnd {
                turn_number: turn,
                usage,
            });
        };

        outcome?;
        let _ = self.event_tx.send(AgentEvent::AgentEnd {
            total_turns: turn,
            total_usage,
            truncated: state.truncated,
        });
        Ok(state)
    }
}

/// First string-valued path argument
fn path_argument(arguments: &Value) -> Option<&str> {
    PATH_KEYS
        .iter()
        .find_map(|key| arguments.get(*key).and_then(|v| v.as_str()))
}

/// System prompt describing the workspace, path conventions and tools
pub fn default_system_prompt(workspace: &WorkspacePaths, tools: &[BoxedTool]) -> String {
    let mut prompt = format!(
        "You are a coding assistant with access to filesystem and command-line tools.\n\n\
         Your workspace directory is: {}\n\n\
         File paths must be relative to the workspace root (e.g. \"./file.txt\", \"./src/app.rs\"). \
         Parent directories are created automatically when writing files.\n\n\
         If you cannot call tools natively, answer with one JSON object per tool call, \
         or a JSON array of them:\n\
         {{\"name\": \"write_file\", \"arguments\": {{\"path\": \"./hello.txt\", \"content\": \"hi\"}}}}\n\
         Use \\n for newlines inside JSON strings. When the task is complete, answer in plain text \
         without any tool calls.",
        workspace.root().display()
    );
    if !tools.is_empty() {
        prompt.push_str("\n\nAvailable tools:\n");
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
        }
    }
    prompt
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(args: &Value, validator: &jsonschema::Validator) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
