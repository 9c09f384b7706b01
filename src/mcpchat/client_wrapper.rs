//! Model endpoint abstraction.
//!
//! A [`ClientWrapper`] wraps a specific LLM completion service behind one
//! interface. It does not keep track of the conversation; the
//! [`Transcript`](crate::transcript::Transcript) does that, and the
//! [`ModelGateway`](crate::model_gateway::ModelGateway) turns the transcript into
//! the [`Message`] list a client expects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// set by the developer to steer the model's responses
    System,
    /// a message sent by a human user (or app user)
    User,
    /// content generated by the model
    Assistant,
    /// output of a tool call, correlated through `tool_call_id`
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Add another usage report onto this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A tool call requested by the model.
///
/// `arguments` is normally a JSON object. It may be a raw JSON string when the
/// model produced an argument string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Opaque correlation token issued by the model.
    pub id: String,
    /// Tool name, expected to match a registered tool.
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A tool as presented to the model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the arguments.
    pub parameters_schema: Value,
}

/// Represents a generic message exchanged with an LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: Arc<str>,
    /// Tool calls requested by an assistant message (empty otherwise).
    pub tool_calls: Vec<ToolCallRequest>,
    /// For [`Role::Tool`] messages, the id of the call being answered.
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant message that requests tool calls.
    pub fn assistant_with_calls(content: &str, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// A tool result answering `call_id`.
    pub fn tool(call_id: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(call_id.to_string()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: &str) -> Self {
        Self {
            role,
            content: Arc::from(content),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Errors a model client can report.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Transport, authentication or HTTP status failure.
    Unavailable(String),
    /// The endpoint answered but the payload could not be understood.
    InvalidResponse(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Unavailable(msg) => write!(f, "model unavailable: {}", msg),
            ClientError::InvalidResponse(msg) => write!(f, "invalid model response: {}", msg),
        }
    }
}

impl Error for ClientError {}

/// Trait defining the interface to interact with an LLM service.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send the conversation and get the assistant's reply.
    ///
    /// When `tools` is `Some`, the model may answer with tool calls in
    /// [`Message::tool_calls`]. When it is `None` no tools are offered.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, ClientError>;

    /// Model identifier used for requests.
    fn model_name(&self) -> &str;

    /// Usage from the *last* `send_message()` call, if the endpoint reported one.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        None
    }
}
