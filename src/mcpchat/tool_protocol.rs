//! Tool Protocol Abstraction Layer
//!
//! Every tool server the chat talks to (an in-process calculator, an MCP server
//! spawned over stdio, a remote MCP server over streamable HTTP) is a
//! [`ToolProtocol`]. The [`ToolRegistry`] merges the descriptors of all protocols
//! into one flat namespace keyed by tool name and routes invocations back to the
//! protocol that owns each tool.
//!
//! # Architecture
//!
//! ```text
//! ChatSession → ToolRegistry → ToolProtocol (trait) → [Custom | MCP stdio | MCP HTTP]
//! ```
//!
//! # Example
//!
//! ```rust
//! use mcpchat::tool_protocol::{ToolMetadata, ToolParameter, ToolParameterType};
//!
//! let add = ToolMetadata::new("add", "Add two numbers")
//!     .with_parameter(ToolParameter::new("a", ToolParameterType::Number).required())
//!     .with_parameter(ToolParameter::new("b", ToolParameterType::Number).required());
//!
//! let schema = add.to_json_schema();
//! assert_eq!(schema["required"], serde_json::json!(["a", "b"]));
//! ```

use crate::mcpchat::client_wrapper::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Outcome of a single tool execution as reported by the owning protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful
    pub success: bool,
    /// The output data from the tool
    pub output: Value,
    /// Optional error message if execution failed
    pub error: Option<String>,
    /// Metadata about the execution (timing, transport, etc.)
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolResult {
    /// Convenience constructor for successful tool execution.
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Convenience constructor for failed tool execution.
    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    /// Attach protocol or application specific metadata to the result.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// JSON-schema type of a tool parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    /// The JSON-schema spelling of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }

    /// Parse a JSON-schema type name. Unknown names yield `None`.
    pub fn from_schema_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ToolParameterType::String),
            "number" => Some(ToolParameterType::Number),
            "integer" => Some(ToolParameterType::Integer),
            "boolean" => Some(ToolParameterType::Boolean),
            "array" => Some(ToolParameterType::Array),
            "object" => Some(ToolParameterType::Object),
            _ => None,
        }
    }
}

/// Defines a parameter for a tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
    /// For array types, specifies the type of items
    pub items: Option<ToolParameterType>,
}

impl ToolParameter {
    /// Define a new tool parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            items: None,
        }
    }

    /// Add a human readable description that will surface in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Provide a default value that applies when the model omits the parameter.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// For array parameters, declare the type of the contained items.
    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(item_type);
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type.as_str()));
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        if let Some(items) = &self.items {
            schema.insert("items".into(), json!({ "type": items.as_str() }));
        }
        Value::Object(schema)
    }
}

/// Descriptor of a tool: its name, what it does and its ordered parameter list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    /// Additional metadata specific to the protocol (e.g. the raw MCP `inputSchema`)
    #[serde(default)]
    pub protocol_metadata: HashMap<String, Value>,
}

impl ToolMetadata {
    /// Create metadata with the supplied identifier and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            protocol_metadata: HashMap::new(),
        }
    }

    /// Append a parameter definition to the tool metadata.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Add protocol specific metadata.
    pub fn with_protocol_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.protocol_metadata.insert(key.into(), value);
        self
    }

    /// Build a descriptor from a JSON-schema object such as an MCP `inputSchema`.
    ///
    /// Properties are read in document order. Optional parameters expressed as
    /// `anyOf: [{type: T}, {type: "null"}]` resolve to `T`. The raw schema is kept
    /// under the `input_schema` protocol metadata key so it can be forwarded to
    /// the model untouched.
    pub fn from_json_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: &Value,
    ) -> Self {
        let mut metadata = ToolMetadata::new(name, description)
            .with_protocol_metadata("input_schema", schema.clone());

        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
            for (param_name, property) in properties {
                let param_type = schema_type(property).unwrap_or(ToolParameterType::Object);
                let mut param = ToolParameter::new(param_name.clone(), param_type);
                if let Some(description) = property.get("description").and_then(|d| d.as_str()) {
                    param = param.with_description(description);
                }
                if let Some(default) = property.get("default") {
                    param = param.with_default(default.clone());
                }
                if let Some(items) = property.get("items").and_then(schema_type) {
                    param = param.with_items(items);
                }
                if required.contains(&param_name.as_str()) {
                    param = param.required();
                }
                metadata.parameters.push(param);
            }
        }

        metadata
    }

    /// Render the parameter list as a JSON-schema object.
    ///
    /// A raw `input_schema` captured from the provider takes precedence.
    pub fn to_json_schema(&self) -> Value {
        if let Some(raw) = self.protocol_metadata.get("input_schema") {
            if raw.is_object() {
                return raw.clone();
            }
        }

        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(param.name.clone(), param.to_json_schema());
            if param.required {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Convert into the definition handed to the model endpoint.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.to_json_schema(),
        }
    }
}

fn schema_type(property: &Value) -> Option<ToolParameterType> {
    match property.get("type") {
        Some(Value::String(name)) => return ToolParameterType::from_schema_name(name),
        Some(Value::Array(names)) => {
            return names
                .iter()
                .filter_map(|n| n.as_str())
                .filter(|n| *n != "null")
                .find_map(ToolParameterType::from_schema_name)
        }
        _ => {}
    }

    ["anyOf", "oneOf"]
        .iter()
        .filter_map(|key| property.get(*key).and_then(|v| v.as_array()))
        .flatten()
        .filter(|variant| variant.get("type").and_then(|t| t.as_str()) != Some("null"))
        .find_map(schema_type)
}

/// Trait for implementing tool execution protocols
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    /// Execute a tool with the given parameters
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    /// Get metadata about available tools
    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    /// Get metadata about a specific tool
    async fn get_tool_metadata(
        &self,
        tool_name: &str,
    ) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>> {
        self.list_tools()
            .await?
            .into_iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| {
                Box::new(ToolError::NotFound(tool_name.to_string())) as Box<dyn Error + Send + Sync>
            })
    }

    /// Protocol identifier (e.g., "custom", "mcp-http", "mcp-stdio")
    fn protocol_name(&self) -> &str;

    /// Initialize/connect to the tool protocol
    async fn initialize(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// Cleanup/disconnect from the tool protocol
    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// Error types for tool operations
#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Requested tool is not registered in the current registry/protocol.
    NotFound(String),
    /// Tool execution completed with an application level failure.
    ExecutionFailed(String),
    /// The provided JSON parameters failed validation or deserialization.
    InvalidParameters(String),
    /// A lower level protocol/transport error occurred.
    ProtocolError(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "invalid parameters: {}", msg),
            ToolError::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Result of one requested tool call, correlated to the request by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub payload: Value,
    pub is_error: bool,
}

impl ToolCallResult {
    /// Map a protocol level [`ToolResult`] onto the call it answers.
    pub fn from_tool_result(call_id: impl Into<String>, result: ToolResult) -> Self {
        if result.success {
            Self {
                call_id: call_id.into(),
                payload: result.output,
                is_error: false,
            }
        } else {
            let message = result
                .error
                .unwrap_or_else(|| "tool reported an unspecified error".to_string());
            Self::error(call_id, message)
        }
    }

    /// An error result carrying a descriptive message as payload.
    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: Value::String(message.into()),
            is_error: true,
        }
    }
}

/// What to do when a provider announces a tool name that is already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail the whole batch with [`RegistryError::DuplicateTool`].
    #[default]
    Reject,
    /// Replace the earlier descriptor in place; the newer protocol owns the name.
    LastWins,
}

/// Errors raised while building the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    DuplicateTool {
        name: String,
        existing_protocol: String,
        new_protocol: String,
    },
    /// `register` was called for a protocol that was never added.
    UnknownProtocol(String),
    /// The provider could not be initialized or could not list its tools.
    Discovery { protocol: String, message: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateTool {
                name,
                existing_protocol,
                new_protocol,
            } => write!(
                f,
                "duplicate tool '{}': already provided by '{}', offered again by '{}'",
                name, existing_protocol, new_protocol
            ),
            RegistryError::UnknownProtocol(name) => write!(f, "unknown protocol: {}", name),
            RegistryError::Discovery { protocol, message } => {
                write!(f, "tool discovery failed for '{}': {}", protocol, message)
            }
        }
    }
}

impl Error for RegistryError {}

struct RegisteredTool {
    metadata: ToolMetadata,
    protocol: String,
}

/// Flat namespace of tools aggregated from any number of protocols.
///
/// Tools keep the order in which they were registered. Duplicate names are
/// handled according to the registry's [`DuplicatePolicy`].
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    protocols: HashMap<String, Arc<dyn ToolProtocol>>,
    policy: DuplicatePolicy,
}

impl ToolRegistry {
    /// An empty registry using [`DuplicatePolicy::Reject`].
    pub fn empty() -> Self {
        Self::with_policy(DuplicatePolicy::default())
    }

    /// An empty registry with an explicit duplicate policy.
    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            protocols: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Add a protocol and register every tool it lists.
    ///
    /// Returns the number of tools registered. If registration fails the
    /// protocol is not kept.
    pub async fn add_protocol(
        &mut self,
        name: &str,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<usize, RegistryError> {
        let discovery_error = |e: Box<dyn Error + Send + Sync>| RegistryError::Discovery {
            protocol: name.to_string(),
            message: e.to_string(),
        };

        protocol.initialize().await.map_err(discovery_error)?;
        let tools = protocol.list_tools().await.map_err(discovery_error)?;
        log::info!(
            "Discovered {} tools from protocol '{}' ({})",
            tools.len(),
            name,
            protocol.protocol_name()
        );

        let previous = self.protocols.insert(name.to_string(), protocol);
        match self.register(name, tools) {
            Ok(count) => Ok(count),
            Err(e) => {
                match previous {
                    Some(p) => self.protocols.insert(name.to_string(), p),
                    None => self.protocols.remove(name),
                };
                Err(e)
            }
        }
    }

    /// Merge descriptors owned by an already added protocol into the namespace.
    ///
    /// The batch is validated before anything is inserted, so a rejected
    /// duplicate leaves the registry unchanged.
    pub fn register(
        &mut self,
        protocol_name: &str,
        tools: Vec<ToolMetadata>,
    ) -> Result<usize, RegistryError> {
        if !self.protocols.contains_key(protocol_name) {
            return Err(RegistryError::UnknownProtocol(protocol_name.to_string()));
        }

        if self.policy == DuplicatePolicy::Reject {
            let mut seen: HashMap<&str, ()> = HashMap::new();
            for tool in &tools {
                if let Some(&i) = self.index.get(&tool.name) {
                    return Err(RegistryError::DuplicateTool {
                        name: tool.name.clone(),
                        existing_protocol: self.tools[i].protocol.clone(),
                        new_protocol: protocol_name.to_string(),
                    });
                }
                if seen.insert(tool.name.as_str(), ()).is_some() {
                    return Err(RegistryError::DuplicateTool {
                        name: tool.name.clone(),
                        existing_protocol: protocol_name.to_string(),
                        new_protocol: protocol_name.to_string(),
                    });
                }
            }
        }

        let count = tools.len();
        for metadata in tools {
            let entry = RegisteredTool {
                metadata,
                protocol: protocol_name.to_string(),
            };
            match self.index.get(&entry.metadata.name) {
                Some(&i) => {
                    log::warn!(
                        "Tool '{}' from '{}' replaces the one from '{}'",
                        entry.metadata.name,
                        protocol_name,
                        self.tools[i].protocol
                    );
                    self.tools[i] = entry;
                }
                None => {
                    self.index
                        .insert(entry.metadata.name.clone(), self.tools.len());
                    self.tools.push(entry);
                }
            }
        }

        Ok(count)
    }

    /// Remove a protocol and every tool it owns. Unknown names are a no-op.
    pub fn remove_protocol(&mut self, name: &str) {
        if self.protocols.remove(name).is_none() {
            return;
        }
        self.tools.retain(|t| t.protocol != name);
        self.index = self
            .tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.metadata.name.clone(), i))
            .collect();
    }

    /// Look a tool up by name.
    pub fn resolve(&self, name: &str) -> Result<&ToolMetadata, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i].metadata)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// All descriptors in registration order.
    pub fn all(&self) -> Vec<&ToolMetadata> {
        self.tools.iter().map(|t| &t.metadata).collect()
    }

    /// Name of the protocol that owns `tool_name`.
    pub fn get_tool_protocol(&self, tool_name: &str) -> Option<&str> {
        self.index
            .get(tool_name)
            .map(|&i| self.tools[i].protocol.as_str())
    }

    /// Names of every added protocol, sorted.
    pub fn protocol_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.protocols.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Model-facing definitions for every registered tool.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| t.metadata.to_tool_definition())
            .collect()
    }

    /// Execute a named tool through the protocol that owns it.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let protocol = self
            .index
            .get(tool_name)
            .and_then(|&i| self.protocols.get(&self.tools[i].protocol))
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        protocol.execute(tool_name, arguments).await
    }

    /// Shut every protocol down (child processes, HTTP sessions).
    pub async fn shutdown(&self) {
        for (name, protocol) in &self.protocols {
            if let Err(e) = protocol.shutdown().await {
                log::warn!("Protocol '{}' failed to shut down cleanly: {}", name, e);
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::empty()
    }
}
