//! Configuration file support

use deepcoder_agent::compaction::CompactionConfig;
use deepcoder_ai::{ModelOptions, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::expand_tilde;

/// Configuration for deepcoder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentSection,
    pub workspace: WorkspaceSection,
    pub models: ModelsSection,
    pub middleware: MiddlewareSection,
    pub mcp: McpSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: u32,
    /// Replaces the generated system prompt
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    pub path: String,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            path: "~/.deepcoder/workspace".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub base_url: String,
    pub main_agent: ModelSettings,
    pub summarizer: ModelSettings,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            base_url: deepcoder_ai::providers::ollama::DEFAULT_BASE_URL.to_string(),
            main_agent: ModelSettings::default(),
            summarizer: ModelSettings {
                model: "llama3.1:8b".to_string(),
                temperature: 0.4,
                num_ctx: 8192,
                timeout: 180,
                max_retries: 3,
            },
        }
    }
}

/// One model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub num_ctx: u32,
    /// Request timeout in seconds
    pub timeout: u64,
    /// Retries for busy or failing servers
    pub max_retries: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "qwen2.5:14b".to_string(),
            temperature: 0.3,
            num_ctx: 32768,
            timeout: 300,
            max_retries: 3,
        }
    }
}

impl ModelSettings {
    pub fn options(&self) -> ModelOptions {
        ModelOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            num_ctx: self.num_ctx,
            timeout: Duration::from_secs(self.timeout),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_max_retries(self.max_retries)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareSection {
    pub logging: LoggingSettings,
    pub memory: MemorySettings,
    pub git_safety: GitSafetySettings,
    pub error_recovery: ErrorRecoverySettings,
    pub audit: AuditSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub enabled: bool,
    /// Relative to the data directory unless absolute; empty disables the file
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            file: "agent.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub enabled: bool,
    pub threshold: usize,
    pub keep_recent_messages: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        let defaults = CompactionConfig::default();
        Self {
            enabled: true,
            threshold: defaults.threshold,
            keep_recent_messages: defaults.keep_recent,
        }
    }
}

impl MemorySettings {
    pub fn compaction(&self) -> CompactionConfig {
        CompactionConfig {
            threshold: self.threshold,
            keep_recent: self.keep_recent_messages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSafetySettings {
    pub enabled: bool,
    /// Block matching operations instead of only warning
    pub enforce: bool,
}

impl Default for GitSafetySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            enforce: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRecoverySettings {
    pub enabled: bool,
    pub max_retries: u32,
}

impl Default for ErrorRecoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    pub file: String,
    pub include_message_content: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            file: "audit.jsonl".to_string(),
            include_message_content: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSection {
    pub servers: Vec<McpServerConfig>,
}

/// An MCP server started over stdio
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deepcoder")
    }

    /// Directory for the activity log and audit trail
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deepcoder")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DEEPCODER_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write the example config if no config file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Workspace root with `~` expanded
    pub fn workspace_path(&self) -> PathBuf {
        expand_tilde(&self.workspace.path)
    }

    /// Resolve a log/audit file setting against the data directory.
    /// Empty means disabled.
    pub fn data_file(file: &str) -> Option<PathBuf> {
        if file.is_empty() {
            return None;
        }
        let path = expand_tilde(file);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(Self::data_dir().join(path))
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# deepcoder configuration file
# Place at ~/.config/deepcoder/config.toml (Linux) or set DEEPCODER_CONFIG_PATH

[agent]
# Maximum model calls per request
max_iterations = 10

[workspace]
# All file operations are confined to this directory (created on start)
path = "~/.deepcoder/workspace"

[models]
base_url = "http://localhost:11434"

[models.main_agent]
model = "qwen2.5:14b"
temperature = 0.3
num_ctx = 32768
timeout = 300
max_retries = 3

[models.summarizer]
model = "llama3.1:8b"
temperature = 0.4
num_ctx = 8192
timeout = 180
max_retries = 3

# Log and audit files are relative to the data directory
# (~/.local/share/deepcoder on Linux) unless absolute.
[middleware.logging]
enabled = true
file = "agent.log"

[middleware.memory]
enabled = true
threshold = 6000
keep_recent_messages = 10

[middleware.git_safety]
enabled = true
# Refuse dangerous git operations instead of only warning
enforce = false

[middleware.error_recovery]
enabled = true
max_retries = 3

[middleware.audit]
enabled = true
file = "audit.jsonl"
include_message_content = false

# MCP servers whose tools are added after the built-in ones
# [[mcp.servers]]
# name = "filesystem"
# command = "npx"
# args = ["-y", "@modelcontextprotocol/server-filesystem", "/path/to/workspace"]
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses_to_defaults() {
        let config = Config::parse(example_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.agent.max_iterations, defaults.agent.max_iterations);
        assert_eq!(config.workspace.path, defaults.workspace.path);
        assert_eq!(config.models.base_url, defaults.models.base_url);
        assert_eq!(config.models.main_agent.model, "qwen2.5:14b");
        assert_eq!(config.models.summarizer.num_ctx, 8192);
        assert_eq!(config.middleware.memory.threshold, 6000);
        assert!(!config.middleware.git_safety.enforce);
        assert!(config.mcp.servers.is_empty());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::parse(
            r#"
            [middleware.git_safety]
            enforce = true

            [[mcp.servers]]
            name = "fs"
            command = "mcp-fs"
            args = ["--root", "/tmp"]
            "#,
        )
        .unwrap();
        assert!(config.middleware.git_safety.enforce);
        assert!(config.middleware.git_safety.enabled);
        assert_eq!(config.middleware.error_recovery.max_retries, 3);
        assert_eq!(config.mcp.servers[0].args, vec!["--root", "/tmp"]);
        assert!(config.mcp.servers[0].env.is_empty());
    }

    #[test]
    fn test_invalid_config_is_error() {
        assert!(Config::parse("[agent]\nmax_iterations = \"ten\"").is_err());
    }

    #[test]
    fn test_data_file_resolution() {
        assert_eq!(Config::data_file(""), None);
        assert_eq!(
            Config::data_file("/var/log/a.log"),
            Some(PathBuf::from("/var/log/a.log"))
        );
        assert_eq!(
            Config::data_file("audit.jsonl"),
            Some(Config::data_dir().join("audit.jsonl"))
        );
    }

    #[test]
    fn test_model_options() {
        let options = ModelsSection::default().summarizer.options();
        assert_eq!(options.model, "llama3.1:8b");
        assert_eq!(options.timeout, Duration::from_secs(180));
        assert_eq!(ModelsSection::default().summarizer.retry().max_retries, 3);
    }
}
