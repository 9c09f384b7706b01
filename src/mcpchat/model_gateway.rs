//! Translating between the transcript and a model endpoint.
//!
//! The [`ModelGateway`] replays the full [`Transcript`] to a [`ClientWrapper`]
//! on each call and turns the reply into an [`AssistantReply`]. Two calls exist:
//!
//! - [`propose`](ModelGateway::propose) offers the tool definitions, so the model
//!   may answer with tool calls;
//! - [`finalize`](ModelGateway::finalize) offers no tools and always yields a
//!   direct answer.
//!
//! Model-produced tool arguments are normalised here (see [`normalize_arguments`]),
//! so the rest of the crate only sees objects or, when the model sent garbage, the
//! raw string it sent.

use crate::mcpchat::client_wrapper::{
    ClientError, ClientWrapper, Message, TokenUsage, ToolCallRequest, ToolDefinition,
};
use crate::mcpchat::transcript::{Transcript, TranscriptEntry};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// What the model said back.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub text: String,
    /// Non-empty only when the model requested tool calls.
    pub pending_calls: Vec<ToolCallRequest>,
    /// Usage reported for this round trip, if any.
    pub usage: Option<TokenUsage>,
}

impl AssistantReply {
    pub fn wants_tools(&self) -> bool {
        !self.pending_calls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The endpoint could not be reached, rejected the credentials, or returned
    /// an error status.
    ModelUnavailable(String),
    /// The endpoint answered with something that cannot be turned into a reply.
    InvalidResponse(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::ModelUnavailable(msg) => write!(f, "Model unavailable: {}", msg),
            GatewayError::InvalidResponse(msg) => write!(f, "Invalid model response: {}", msg),
        }
    }
}

impl Error for GatewayError {}

impl From<ClientError> for GatewayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unavailable(msg) => GatewayError::ModelUnavailable(msg),
            ClientError::InvalidResponse(msg) => GatewayError::InvalidResponse(msg),
        }
    }
}

/// Sends transcripts to a model and interprets the replies.
#[derive(Clone)]
pub struct ModelGateway {
    client: Arc<dyn ClientWrapper>,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self { client }
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Ask the model for its next step, offering `tools`.
    pub async fn propose(
        &self,
        transcript: &Transcript,
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply, GatewayError> {
        let offered = if tools.is_empty() {
            None
        } else {
            Some(tools.to_vec())
        };
        log::debug!(
            "propose: {} transcript entries, {} tools offered to {}",
            transcript.len(),
            tools.len(),
            self.client.model_name()
        );

        let message = self.round_trip(transcript, offered).await?;
        let pending_calls = prepare_calls(message.tool_calls)?;
        Ok(AssistantReply {
            text: message.content.to_string(),
            pending_calls,
            usage: self.client.get_last_usage().await,
        })
    }

    /// Ask the model for a final answer without offering any tools.
    ///
    /// Tool calls the model emits anyway are dropped.
    pub async fn finalize(&self, transcript: &Transcript) -> Result<AssistantReply, GatewayError> {
        log::debug!("finalize: {} transcript entries", transcript.len());

        let message = self.round_trip(transcript, None).await?;
        if !message.tool_calls.is_empty() {
            log::warn!(
                "Model requested {} tool call(s) while finalizing; ignoring them",
                message.tool_calls.len()
            );
        }
        Ok(AssistantReply {
            text: message.content.to_string(),
            pending_calls: Vec::new(),
            usage: self.client.get_last_usage().await,
        })
    }

    async fn round_trip(
        &self,
        transcript: &Transcript,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, GatewayError> {
        let messages = to_messages(transcript);
        self.client.send_message(&messages, tools).await.map_err(|e| {
            log::error!("Model call to {} failed: {}", self.client.model_name(), e);
            GatewayError::from(e)
        })
    }
}

/// The message list a client sees for `transcript`.
///
/// Tool payloads are sent as their JSON text.
pub fn to_messages(transcript: &Transcript) -> Vec<Message> {
    transcript
        .entries()
        .iter()
        .map(|entry| match entry {
            TranscriptEntry::SystemDirective { text } => Message::system(text),
            TranscriptEntry::UserMessage { text } => Message::user(text),
            TranscriptEntry::AssistantMessage {
                text,
                pending_calls,
            } => {
                if pending_calls.is_empty() {
                    Message::assistant(text)
                } else {
                    Message::assistant_with_calls(text, pending_calls.clone())
                }
            }
            TranscriptEntry::ToolResult {
                call_id, payload, ..
            } => Message::tool(call_id, &payload.to_string()),
        })
        .collect()
}

/// Normalise model-produced tool arguments.
///
/// - an object is used as is;
/// - `null` (or an empty string) becomes `{}`;
/// - a string holding valid JSON becomes the parsed value (a JSON `null`
///   becomes `{}`), so the tool sees an array or a number as such;
/// - a string that does not parse is forwarded unchanged.
pub fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::Null => Value::Object(Map::new()),
        Value::String(raw) => {
            if raw.trim().is_empty() {
                return Value::Object(Map::new());
            }
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Null) => Value::Object(Map::new()),
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("Tool arguments are not valid JSON ({}), forwarding raw: {}", e, raw);
                    Value::String(raw)
                }
            }
        }
        other => other,
    }
}

fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Normalise arguments and make every call id present and unique.
fn prepare_calls(calls: Vec<ToolCallRequest>) -> Result<Vec<ToolCallRequest>, GatewayError> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .map(|mut call| {
            if call.name.trim().is_empty() {
                return Err(GatewayError::InvalidResponse(
                    "tool call without a function name".to_string(),
                ));
            }
            if call.id.is_empty() || seen.contains(&call.id) {
                let fresh = generate_call_id();
                log::warn!(
                    "Tool call '{}' had a missing or repeated id '{}', using '{}'",
                    call.name,
                    call.id,
                    fresh
                );
                call.id = fresh;
            }
            seen.insert(call.id.clone());
            call.arguments = normalize_arguments(call.arguments);
            Ok(call)
        })
        .collect()
}
