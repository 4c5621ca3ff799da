//! deepcoder - local-model coding agent CLI

mod config;
mod mcp;
mod tools;
mod utils;

use anyhow::Context;
use clap::Parser;
use deepcoder_agent::middleware::{
    AuditMiddleware, ErrorRecoveryMiddleware, GitSafetyMiddleware, LoggingMiddleware,
    MemoryMiddleware,
};
use deepcoder_agent::{
    AgentEvent, ConversationState, MiddlewareChain, Orchestrator, OrchestratorConfig,
    StaticRegistry, ToolRegistry, WorkspacePaths,
};
use deepcoder_ai::{ModelClient, OllamaProvider};
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::mcp::{CompositeRegistry, McpRegistry};

/// deepcoder - coding agent for local Ollama models
#[derive(Parser, Debug)]
#[command(name = "deepcoder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Main agent model (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Workspace directory; all file operations stay inside it
    #[arg(short, long)]
    workspace: Option<String>,

    /// Maximum model calls per request
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Run a single request and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "deepcoder=debug,deepcoder_agent=debug,deepcoder_ai=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut config = Config::load();
    if let Some(model) = args.model {
        config.models.main_agent.model = model;
    }
    if let Some(workspace) = args.workspace {
        config.workspace.path = workspace;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.agent.max_iterations = max_iterations;
    }

    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let session_id = uuid::Uuid::new_v4().to_string();

    let running = Arc::new(AtomicBool::new(false));
    {
        let orchestrator = orchestrator.clone();
        let running = running.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if running.load(Ordering::SeqCst) {
                    eprintln!("\n[Cancelling...]");
                    orchestrator.abort();
                } else {
                    std::process::exit(130);
                }
            }
        });
    }

    if let Some(command) = args.command {
        let cancel = orchestrator.begin_run();
        running.store(true, Ordering::SeqCst);
        if let Err(e) = run_request(&orchestrator, &command, &session_id, cancel).await {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    run_interactive(&orchestrator, &session_id, &running, &config).await
}

/// Wire models, tools and middleware from config
fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let root = config.workspace_path();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create workspace {}", root.display()))?;
    let workspace = WorkspacePaths::new(&root)
        .with_context(|| format!("failed to open workspace {}", root.display()))?;

    let model: Arc<dyn ModelClient> = Arc::new(
        OllamaProvider::new(&config.models.base_url, config.models.main_agent.options())
            .context("invalid main agent model config")?
            .with_retry(config.models.main_agent.retry()),
    );
    let summarizer: Arc<dyn ModelClient> = Arc::new(
        OllamaProvider::new(&config.models.base_url, config.models.summarizer.options())
            .context("invalid summarizer model config")?
            .with_retry(config.models.summarizer.retry()),
    );

    Ok(Orchestrator::new(
        OrchestratorConfig {
            max_iterations: config.agent.max_iterations,
            system_prompt: config.agent.system_prompt.clone(),
            enforce_git_safety: config.middleware.git_safety.enabled
                && config.middleware.git_safety.enforce,
        },
        model,
        build_registry(config, &workspace),
        workspace,
    )
    .with_middleware(build_middleware(config, summarizer)))
}

/// Built-in tools first, then MCP servers in config order
fn build_registry(config: &Config, workspace: &WorkspacePaths) -> Arc<dyn ToolRegistry> {
    let builtin: Arc<dyn ToolRegistry> =
        Arc::new(StaticRegistry::new(tools::builtin_tools(workspace)));
    if config.mcp.servers.is_empty() {
        return builtin;
    }
    let mcp: Arc<dyn ToolRegistry> = Arc::new(McpRegistry::new(config.mcp.servers.clone()));
    Arc::new(CompositeRegistry::new(vec![builtin, mcp]))
}

/// Logging, memory, git safety, error recovery, audit; disabled stages are skipped
fn build_middleware(config: &Config, summarizer: Arc<dyn ModelClient>) -> MiddlewareChain {
    let settings = &config.middleware;
    let mut chain = MiddlewareChain::new();

    if settings.logging.enabled {
        chain = chain.with(match Config::data_file(&settings.logging.file) {
            Some(path) => LoggingMiddleware::with_file(path),
            None => LoggingMiddleware::new(),
        });
    }
    if settings.memory.enabled {
        chain = chain.with(MemoryMiddleware::from_config(
            summarizer,
            &settings.memory.compaction(),
        ));
    }
    if settings.git_safety.enabled {
        chain = chain.with(GitSafetyMiddleware::new(settings.git_safety.enforce));
    }
    if settings.error_recovery.enabled {
        chain = chain.with(ErrorRecoveryMiddleware::new(settings.error_recovery.max_retries));
    }
    if settings.audit.enabled {
        if let Some(path) = Config::data_file(&settings.audit.file) {
            chain = chain.with(
                AuditMiddleware::new(path)
                    .include_message_content(settings.audit.include_message_content),
            );
        }
    }
    chain
}

/// Run one request, printing progress, then the final answer
async fn run_request(
    orchestrator: &Orchestrator,
    request: &str,
    session_id: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut receiver = orchestrator.subscribe();
    let handle = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            let terminal = event.is_terminal();
            print_event(event);
            if terminal {
                break;
            }
        }
    });

    let state = ConversationState::new(request).with_session(session_id);
    let result = orchestrator.run_with_cancel(state, cancel).await;
    if result.is_ok() {
        let _ = handle.await;
    } else {
        handle.abort();
    }
    let state = result?;

    println!();
    println!("{}", state.final_answer().unwrap_or_default());
    if state.truncated {
        println!(
            "\n[Stopped after {} iterations without a final answer]",
            orchestrator.config().max_iterations
        );
    }
    Ok(())
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::TurnStart { turn_number } => {
            tracing::debug!("Turn {}", turn_number);
        }
        AgentEvent::ToolExecutionStart { tool_name, .. } => {
            println!("[Running {}...]", tool_name);
        }
        AgentEvent::ToolExecutionEnd {
            tool_name,
            result,
            is_error,
            ..
        } => {
            let preview = utils::truncate_chars(&result, 200);
            if is_error {
                println!("[{} failed: {}]", tool_name, preview);
            } else {
                println!("[{}: {}]", tool_name, preview);
            }
        }
        AgentEvent::Error { message } => {
            eprintln!("Error: {}", message);
        }
        AgentEvent::AgentEnd {
            total_turns,
            total_usage,
            ..
        } => {
            println!(
                "\n[Turns: {} | Tokens: {} in, {} out]",
                total_turns, total_usage.input, total_usage.output
            );
        }
        _ => {}
    }
}

/// Read requests from stdin until EOF, `exit` or `quit`. Each line is an
/// independent request.
async fn run_interactive(
    orchestrator: &Orchestrator,
    session_id: &str,
    running: &AtomicBool,
    config: &Config,
) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!(
            "deepcoder ({}) workspace: {}",
            config.models.main_agent.model,
            orchestrator.workspace().root().display()
        );
        eprintln!("Type 'exit' or 'quit' to leave.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let cancel = orchestrator.begin_run();
        running.store(true, Ordering::SeqCst);
        let outcome = run_request(orchestrator, input, session_id, cancel).await;
        running.store(false, Ordering::SeqCst);
        if let Err(e) = outcome {
            eprintln!("Error: {:#}", e);
        }
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_names(config: &Config) -> Vec<String> {
        let summarizer: Arc<dyn ModelClient> = Arc::new(
            OllamaProvider::new(&config.models.base_url, config.models.summarizer.options())
                .unwrap(),
        );
        build_middleware(config, summarizer)
            .names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_middleware_order() {
        assert_eq!(
            chain_names(&Config::default()),
            vec!["logging", "memory", "git_safety", "error_recovery", "audit"]
        );
    }

    #[test]
    fn test_disabled_stages_skipped() {
        let mut config = Config::default();
        config.middleware.memory.enabled = false;
        config.middleware.audit.file = String::new();
        assert_eq!(
            chain_names(&config),
            vec!["logging", "git_safety", "error_recovery"]
        );
    }

    #[tokio::test]
    async fn test_builtin_registry_without_mcp() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = WorkspacePaths::new(dir.path()).unwrap();
        let tools = build_registry(&Config::default(), &workspace)
            .tools()
            .await
            .unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "write_file",
                "read_file",
                "read_text_file",
                "edit_file",
                "create_directory",
                "list_directory",
                "run_shell_command"
            ]
        );
    }

    #[test]
    fn test_build_orchestrator_creates_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace.path = dir.path().join("ws").to_string_lossy().into_owned();

        let orchestrator = build_orchestrator(&config).unwrap();
        assert!(dir.path().join("ws").is_dir());
        assert_eq!(orchestrator.config().max_iterations, 10);
        assert!(!orchestrator.config().enforce_git_safety);
    }

    #[test]
    fn test_enforce_setting_reaches_orchestrator() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace.path = dir.path().to_string_lossy().into_owned();
        config.middleware.git_safety.enforce = true;
        assert!(build_orchestrator(&config).unwrap().config().enforce_git_safety);

        config.middleware.git_safety.enabled = false;
        assert!(!build_orchestrator(&config).unwrap().config().enforce_git_safety);
    }
}
