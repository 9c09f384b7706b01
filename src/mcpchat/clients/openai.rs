//! The `OpenAIClient` struct implements `ClientWrapper` for any OpenAI-compatible
//! Chat Completions endpoint (OpenRouter by default), with native tool calling and
//! token usage capture.
//!
//! # Key Features
//!
//! - **send_message(...)**: posts the conversation to `{base_url}/chat/completions`;
//!   tool definitions go out as `function` tools and requested calls come back in
//!   [`Message::tool_calls`].
//! - **Automatic Usage Capture**: stores the latest `TokenUsage` internally.
//! - **Inspect Usage**: call `get_last_usage()` after `send_message()`.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpchat::clients::openai::OpenAIClient;
//! use mcpchat::client_wrapper::{ClientWrapper, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OR_API_KEY")?;
//!     let client = OpenAIClient::new(&key, "xiaomi/mimo-v2-flash:free").with_max_tokens(4000);
//!
//!     let reply = client
//!         .send_message(&[Message::system("You are an assistant."), Message::user("Hello!")], None)
//!         .await?;
//!     println!("Assistant: {}", reply.content);
//!
//!     if let Some(usage) = client.get_last_usage().await {
//!         println!("Tokens: {} in, {} out", usage.input_tokens, usage.output_tokens);
//!     }
//!     Ok(())
//! }
//! ```

use crate::mcpchat::client_wrapper::{
    ClientError, ClientWrapper, Message, Role, TokenUsage, ToolCallRequest, ToolDefinition,
};
use crate::mcpchat::clients::http_pool::get_http_client;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// OpenRouter's OpenAI-compatible API root.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI's own API root.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    extra_headers: HashMap<String, String>,
    /// Storage for the token usage returned by the most recent request.
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAIClient {
    /// A client for `model` at [`DEFAULT_BASE_URL`].
    pub fn new(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAIClient {
            api_key: secret_key.to_string(),
            model: model_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens: None,
            temperature: None,
            extra_headers: HashMap::new(),
            token_usage: Mutex::new(None),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Send an extra header with every request (OpenRouter reads `HTTP-Referer`
    /// and `X-Title`, for instance).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, messages: &[Message], tools: Option<&[ToolDefinition]>) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert(
            "messages".into(),
            Value::Array(messages.iter().map(message_to_json).collect()),
        );
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body.insert(
                "tools".into(),
                Value::Array(tools.iter().map(tool_to_json).collect()),
            );
        }
        if let Some(max_tokens) = self.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = self.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        Value::Object(body)
    }
}

/// Encode one message in the Chat Completions wire format.
pub fn message_to_json(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": &*message.content,
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    let arguments = match &call.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": arguments},
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                json!(&*message.content)
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        role => json!({"role": role.as_str(), "content": &*message.content}),
    }
}

pub fn tool_to_json(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters_schema,
        }
    })
}

/// Decode a Chat Completions response body.
///
/// Tool call arguments are passed through as sent (usually a JSON string).
pub fn parse_response(body: &Value) -> Result<(Message, Option<TokenUsage>), ClientError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ClientError::Unavailable(message));
    }

    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| ClientError::InvalidResponse("response has no choices".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let tool_calls = match message.get("tool_calls") {
        Some(Value::Array(calls)) => calls
            .iter()
            .map(parse_tool_call)
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(ClientError::InvalidResponse(format!(
                "tool_calls is not a list: {}",
                other
            )))
        }
    };

    let usage = body.get("usage").map(|u| {
        let field = |name: &str| u.get(name).and_then(Value::as_u64).unwrap_or(0) as usize;
        let input_tokens = field("prompt_tokens");
        let output_tokens = field("completion_tokens");
        let total = field("total_tokens");
        TokenUsage {
            input_tokens,
            output_tokens,
            total_tokens: if total == 0 {
                input_tokens + output_tokens
            } else {
                total
            },
        }
    });

    Ok((Message::assistant_with_calls(content, tool_calls), usage))
}

fn parse_tool_call(call: &Value) -> Result<ToolCallRequest, ClientError> {
    let function = call
        .get("function")
        .ok_or_else(|| ClientError::InvalidResponse(format!("tool call without function: {}", call)))?;
    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let arguments = function.get("arguments").cloned().unwrap_or(Value::Null);
    Ok(ToolCallRequest::new(id, name, arguments))
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, tools.as_deref());
        log::debug!("POST {} ({} messages)", url, messages.len());

        let mut request = get_http_client(&self.base_url)
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);
        for (name, value) in &self.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Unavailable(format!("request to {} failed: {}", url, e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::Unavailable(format!("failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(ClientError::Unavailable(format!("HTTP {}: {}", status, text)));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| ClientError::InvalidResponse(format!("response is not JSON: {}", e)))?;
        let (message, usage) = parse_response(&json)?;
        *self.token_usage.lock().await = usage;
        Ok(message)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn get_last_usage(&self) -> Option<TokenUsage> {
        self.token_usage.lock().await.clone()
    }
}
