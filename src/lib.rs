//! # mcpchat
//!
//! mcpchat is a chat agent that discovers tools from any number of tool servers,
//! lets a language model call them, and keeps a transcript that can be replayed
//! and rendered.
//!
//! The crate provides layered abstractions for:
//!
//! * **Tool Providers**: the [`tool_protocol::ToolProtocol`] trait, implemented for
//!   MCP servers over stdio and streamable HTTP ([`mcp_client`]), Rust closures
//!   ([`tool_protocols::CustomToolProtocol`]) and a built-in [`tools::Calculator`]
//! * **Tool Registry**: [`tool_protocol::ToolRegistry`] merges every provider into
//!   one flat namespace with an explicit duplicate policy
//! * **Model Gateway**: [`model_gateway::ModelGateway`] replays the transcript to a
//!   [`ClientWrapper`] and normalises the tool calls it asks for
//! * **Orchestration**: [`ChatSession`] runs the propose / execute / finalize loop
//!   one user message at a time
//! * **Transcript**: [`transcript::Transcript`] is append-only, keeps tool requests
//!   and results paired, renders the user-facing view and persists to JSON Lines
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcpchat::config::ChatConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     mcpchat::init_logger();
//!
//!     // Reads the API key from OR_API_KEY, registers the built-in calculator.
//!     let mut session = ChatConfig::default().build_session().await?;
//!
//!     for message in session.submit("What is 15% of 80?").await? {
//!         println!("{}: {}", message.role.as_str(), message.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Adding tools by hand
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcpchat::mcp_client::{McpHttpProtocol, McpStdioProtocol};
//! use mcpchat::tool_protocol::ToolRegistry;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = ToolRegistry::empty();
//! let math = McpStdioProtocol::new("uv").with_args(["run", "fastmcp", "run", "calculator.py"]);
//! registry.add_protocol("math", Arc::new(math)).await?;
//! registry
//!     .add_protocol("time-tracking", Arc::new(McpHttpProtocol::new("http://127.0.0.1:8000/mcp")))
//!     .await?;
//!
//! for tool in registry.all() {
//!     println!("{} ({})", tool.name, registry.get_tool_protocol(&tool.name).unwrap_or("?"));
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Diagnostics are driven by `RUST_LOG`, e.g. `RUST_LOG=mcpchat=debug`.
///
/// ```rust
/// mcpchat::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `mcpchat` module.
pub mod mcpchat;

// Re-exporting key items for easier external access.
pub use mcpchat::client_wrapper;
pub use mcpchat::client_wrapper::{ClientWrapper, Message, Role, TokenUsage, ToolCallRequest};
pub use mcpchat::clients;
pub use mcpchat::config;
pub use mcpchat::config::{ChatConfig, ServerConfig};
pub use mcpchat::event;
pub use mcpchat::event::{EventHandler, TurnEvent};
pub use mcpchat::mcp_client;
pub use mcpchat::model_gateway;
pub use mcpchat::orchestration;
pub use mcpchat::orchestration::{ChatSession, ExecutionMode, TurnError, TurnOutcome, TurnState};
pub use mcpchat::tool_protocol;
pub use mcpchat::tool_protocols;
pub use mcpchat::tools;
pub use mcpchat::transcript;
pub use mcpchat::transcript::{RenderedMessage, Transcript, TranscriptEntry};
