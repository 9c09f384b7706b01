//! Configuration for a chat session.
//!
//! [`ChatConfig`] names the model endpoint, the system prompt and the tool
//! servers to connect. It can be built in code or loaded from JSON:
//!
//! ```json
//! {
//!   "model": "xiaomi/mimo-v2-flash:free",
//!   "base_url": "https://openrouter.ai/api/v1",
//!   "api_key_env": "OR_API_KEY",
//!   "max_tokens": 4000,
//!   "servers": [
//!     {"name": "math", "transport": "stdio", "command": "uv",
//!      "args": ["run", "fastmcp", "run", "calculator.py"]},
//!     {"name": "Time-tracking", "transport": "streamable_http",
//!      "url": "https://example.fastmcp.app/mcp"}
//!   ]
//! }
//! ```
//!
//! Every field has a default, so `{}` is a valid configuration (an in-process
//! calculator and the OpenRouter endpoint).
//!
//! # Example
//!
//! ```rust
//! use mcpchat::config::{ChatConfig, ServerConfig};
//!
//! let config = ChatConfig::default()
//!     .with_model("openai/gpt-4o-mini")
//!     .with_server("tracker", ServerConfig::StreamableHttp {
//!         url: "http://127.0.0.1:8000/mcp".into(),
//!         headers: Default::default(),
//!     });
//! assert_eq!(config.servers.len(), 2);
//! ```

use crate::mcpchat::client_wrapper::ClientWrapper;
use crate::mcpchat::clients::openai::{OpenAIClient, DEFAULT_BASE_URL};
use crate::mcpchat::mcp_client::{McpHttpProtocol, McpStdioProtocol};
use crate::mcpchat::model_gateway::ModelGateway;
use crate::mcpchat::orchestration::{ChatSession, ExecutionMode};
use crate::mcpchat::tool_protocol::{DuplicatePolicy, RegistryError, ToolProtocol, ToolRegistry};
use crate::mcpchat::tools::Calculator;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Instructs the model to call tools silently and answer concisely.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You have access to tools. When you choose to call a tool, do not narrate status updates. After tools run, return only a concise final answer.";

pub const DEFAULT_MODEL: &str = "xiaomi/mimo-v2-flash:free";

pub const DEFAULT_API_KEY_ENV: &str = "OR_API_KEY";

/// How to reach one tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServerConfig {
    /// Spawn `command` and speak MCP over its stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// MCP streamable HTTP endpoint.
    #[serde(alias = "http")]
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// The in-process [`Calculator`].
    Calculator,
}

impl ServerConfig {
    /// Instantiate the tool provider this entry describes.
    pub fn build_protocol(&self) -> Arc<dyn ToolProtocol> {
        match self {
            ServerConfig::Stdio { command, args, env } => {
                let mut protocol = McpStdioProtocol::new(command.clone()).with_args(args.clone());
                for (key, value) in env {
                    protocol = protocol.with_env(key.clone(), value.clone());
                }
                Arc::new(protocol)
            }
            ServerConfig::StreamableHttp { url, headers } => {
                let mut protocol = McpHttpProtocol::new(url.clone());
                for (name, value) in headers {
                    protocol = protocol.with_header(name.clone(), value.clone());
                }
                Arc::new(protocol)
            }
            ServerConfig::Calculator => Arc::new(Calculator::new()),
        }
    }
}

/// A tool server registered under `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedServer {
    pub name: String,
    #[serde(flatten)]
    pub server: ServerConfig,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    /// The environment variable holding the API key is unset or empty.
    MissingApiKey(String),
    Invalid(String),
    /// A tool server could not be added to the registry.
    Registry(RegistryError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Failed to read configuration: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Invalid configuration file: {}", msg),
            ConfigError::MissingApiKey(var) => {
                write!(f, "API key not found: set the {} environment variable", var)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::Registry(e) => write!(f, "Failed to set up tools: {}", e),
        }
    }
}

impl Error for ConfigError {}

impl From<RegistryError> for ConfigError {
    fn from(err: RegistryError) -> Self {
        ConfigError::Registry(err)
    }
}

/// Everything needed to start a [`ChatSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
    /// Tool servers, registered in this order.
    pub servers: Vec<NamedServer>,
    pub duplicate_policy: DuplicatePolicy,
    pub execution_mode: ExecutionMode,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            max_tokens: Some(4000),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            servers: vec![NamedServer {
                name: "math".to_string(),
                server: ServerConfig::Calculator,
            }],
            duplicate_policy: DuplicatePolicy::default(),
            execution_mode: ExecutionMode::default(),
        }
    }
}

impl ChatConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = var.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Append a tool server.
    pub fn with_server(mut self, name: impl Into<String>, server: ServerConfig) -> Self {
        self.servers.push(NamedServer {
            name: name.into(),
            server,
        });
        self
    }

    /// Drop all configured tool servers.
    pub fn without_servers(mut self) -> Self {
        self.servers.clear();
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Check server names are present and unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.servers {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::Invalid("server with an empty name".to_string()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "server '{}' is listed twice",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey(self.api_key_env.clone())),
        }
    }

    /// Model client for the configured endpoint.
    pub fn build_client(&self) -> Result<Arc<dyn ClientWrapper>, ConfigError> {
        let mut client = OpenAIClient::new_with_base_url(&self.api_key()?, &self.model, &self.base_url);
        if let Some(max_tokens) = self.max_tokens {
            client = client.with_max_tokens(max_tokens);
        }
        Ok(Arc::new(client))
    }

    /// Connect every configured server and collect their tools.
    pub async fn build_registry(&self) -> Result<ToolRegistry, ConfigError> {
        self.validate()?;
        let mut registry = ToolRegistry::with_policy(self.duplicate_policy);
        for entry in &self.servers {
            let count = registry
                .add_protocol(&entry.name, entry.server.build_protocol())
                .await?;
            log::info!("Server '{}' provides {} tool(s)", entry.name, count);
        }
        Ok(registry)
    }

    /// Start a session using `client` and the configured servers.
    pub async fn build_session_with_client(
        &self,
        client: Arc<dyn ClientWrapper>,
    ) -> Result<ChatSession, ConfigError> {
        let registry = self.build_registry().await?;
        Ok(
            ChatSession::new(Arc::new(registry), ModelGateway::new(client), &self.system_prompt)
                .with_execution_mode(self.execution_mode),
        )
    }

    /// Start a session against the configured model endpoint.
    pub async fn build_session(&self) -> Result<ChatSession, ConfigError> {
        let client = self.build_client()?;
        self.build_session_with_client(client).await
    }
}
