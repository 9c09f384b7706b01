//! In-process tool providers.
//!
//! [`CustomToolProtocol`] exposes plain Rust closures as tools. It is the quickest
//! way to add a local tool next to the MCP servers of a session, and the mock of
//! choice in tests.
//!
//! Remote providers live in [`mcp_client`](crate::mcp_client).

use crate::mcpchat::tool_protocol::{ToolError, ToolMetadata, ToolProtocol, ToolResult};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Type alias for synchronous tool functions.
pub type ToolFunction =
    Arc<dyn Fn(JsonValue) -> Result<ToolResult, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Type alias for asynchronous tool functions.
pub type AsyncToolFunction = Arc<
    dyn Fn(
            JsonValue,
        )
            -> Pin<Box<dyn Future<Output = Result<ToolResult, Box<dyn Error + Send + Sync>>> + Send>>
        + Send
        + Sync,
>;

#[derive(Clone)]
enum Handler {
    Sync(ToolFunction),
    Async(AsyncToolFunction),
}

#[derive(Clone)]
struct CustomTool {
    metadata: ToolMetadata,
    handler: Handler,
}

/// Closure-backed tool provider.
///
/// Tools are listed in registration order. Registering a name twice replaces the
/// earlier tool in place.
///
/// # Example
///
/// ```rust,no_run
/// use mcpchat::tool_protocols::CustomToolProtocol;
/// use mcpchat::tool_protocol::{ToolMetadata, ToolParameter, ToolParameterType, ToolResult};
/// use std::sync::Arc;
///
/// # async {
/// let local = CustomToolProtocol::new();
/// local
///     .register_tool(
///         ToolMetadata::new("echo", "Repeat the input text")
///             .with_parameter(ToolParameter::new("text", ToolParameterType::String).required()),
///         Arc::new(|params| Ok(ToolResult::success(params["text"].clone()))),
///     )
///     .await;
/// # };
/// ```
pub struct CustomToolProtocol {
    name: String,
    tools: RwLock<Vec<CustomTool>>,
}

impl CustomToolProtocol {
    pub fn new() -> Self {
        Self::named("custom")
    }

    /// A provider reporting `name` from [`ToolProtocol::protocol_name`].
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: RwLock::new(Vec::new()),
        }
    }

    /// Register a synchronous tool function.
    pub async fn register_tool(&self, metadata: ToolMetadata, function: ToolFunction) {
        self.insert(metadata, Handler::Sync(function)).await;
    }

    /// Register an asynchronous tool function.
    pub async fn register_async_tool(&self, metadata: ToolMetadata, function: AsyncToolFunction) {
        self.insert(metadata, Handler::Async(function)).await;
    }

    pub async fn unregister_tool(&self, name: &str) {
        self.tools.write().await.retain(|t| t.metadata.name != name);
    }

    async fn insert(&self, metadata: ToolMetadata, handler: Handler) {
        let mut tools = self.tools.write().await;
        let tool = CustomTool { metadata, handler };
        match tools
            .iter_mut()
            .find(|t| t.metadata.name == tool.metadata.name)
        {
            Some(existing) => *existing = tool,
            None => tools.push(tool),
        }
    }
}

impl Default for CustomToolProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProtocol for CustomToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        // Clone the handler out so the lock is not held across the call.
        let handler = {
            let tools = self.tools.read().await;
            tools
                .iter()
                .find(|t| t.metadata.name == tool_name)
                .map(|t| t.handler.clone())
        };

        match handler {
            Some(Handler::Async(func)) => func(parameters).await,
            Some(Handler::Sync(func)) => func(parameters),
            None => Err(Box::new(ToolError::NotFound(tool_name.to_string()))),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        let tools = self.tools.read().await;
        Ok(tools.iter().map(|t| t.metadata.clone()).collect())
    }

    fn protocol_name(&self) -> &str {
        &self.name
    }
}
