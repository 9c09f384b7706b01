//! The tool-call orchestration loop.
//!
//! A [`ChatSession`] handles one user message at a time:
//!
//! ```text
//! AwaitingUser ─► Proposing ─┬─────────────────────────► Idle   (direct answer)
//!                            └─► Executing ─► Finalizing ─► Idle
//!      ▲                                                      │
//!      └──────────────────── next message ────────────────────┘
//! ```
//!
//! While proposing, the model sees every registered tool. If it asks for tools,
//! each call is dispatched through the [`ToolRegistry`], every result is written
//! to the transcript in request order, and the model is asked once more, this
//! time without tools, for the answer the user sees. Tool failures never abort a
//! turn; they become error results the model can read. Model failures abort the
//! turn, leaving the transcript with exactly what was appended before.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcpchat::clients::openai::OpenAIClient;
//! use mcpchat::model_gateway::ModelGateway;
//! use mcpchat::orchestration::ChatSession;
//! use mcpchat::tool_protocol::ToolRegistry;
//! use mcpchat::tools::Calculator;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = ToolRegistry::empty();
//! registry.add_protocol("math", Arc::new(Calculator::new())).await?;
//!
//! let client = Arc::new(OpenAIClient::new(&std::env::var("OR_API_KEY")?, "xiaomi/mimo-v2-flash:free"));
//! let mut session = ChatSession::new(Arc::new(registry), ModelGateway::new(client), "Be concise.");
//!
//! for message in session.submit("What is 12% of 250?").await? {
//!     println!("{}: {}", message.role.as_str(), message.text);
//! }
//! # Ok(())
//! # }
//! ```

use crate::mcpchat::client_wrapper::{TokenUsage, ToolCallRequest};
use crate::mcpchat::event::{EventHandler, ModelPhase, TurnEvent};
use crate::mcpchat::model_gateway::{GatewayError, ModelGateway};
use crate::mcpchat::tool_protocol::{ToolCallResult, ToolRegistry};
use crate::mcpchat::transcript::{RenderedMessage, Transcript, TranscriptEntry, TranscriptError};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Where a session is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No message handled yet.
    AwaitingUser,
    Proposing,
    Executing,
    Finalizing,
    /// A turn ended (successfully or not); the next message may be handled.
    Idle,
}

/// How the calls of one proposal are dispatched.
///
/// Results are appended in request order in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

/// What one turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The assistant answer shown to the user.
    pub reply: String,
    /// Results of the tool calls made during the turn, in request order.
    pub tool_results: Vec<ToolCallResult>,
    /// Tokens reported by the endpoint across the turn's model calls.
    pub tokens_used: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnError {
    Model(GatewayError),
    Transcript(TranscriptError),
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::Model(e) => write!(f, "Turn aborted: {}", e),
            TurnError::Transcript(e) => write!(f, "Turn aborted, transcript rejected entry: {}", e),
        }
    }
}

impl Error for TurnError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TurnError::Model(e) => Some(e),
            TurnError::Transcript(e) => Some(e),
        }
    }
}

impl From<GatewayError> for TurnError {
    fn from(err: GatewayError) -> Self {
        TurnError::Model(err)
    }
}

impl From<TranscriptError> for TurnError {
    fn from(err: TranscriptError) -> Self {
        TurnError::Transcript(err)
    }
}

/// A conversation with one model and a fixed set of tools.
pub struct ChatSession {
    registry: Arc<ToolRegistry>,
    gateway: ModelGateway,
    transcript: Transcript,
    state: TurnState,
    execution_mode: ExecutionMode,
    event_handler: Option<Arc<dyn EventHandler>>,
    total_usage: TokenUsage,
}

impl ChatSession {
    /// Start a session whose transcript opens with `system_prompt`.
    pub fn new(registry: Arc<ToolRegistry>, gateway: ModelGateway, system_prompt: &str) -> Self {
        Self {
            registry,
            gateway,
            transcript: Transcript::with_system_directive(system_prompt),
            state: TurnState::AwaitingUser,
            execution_mode: ExecutionMode::default(),
            event_handler: None,
            total_usage: TokenUsage::default(),
        }
    }

    /// Continue from an existing transcript, e.g. one loaded with
    /// [`Transcript::read_jsonl`].
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    /// Tokens reported across every turn of this session.
    pub fn token_usage(&self) -> &TokenUsage {
        &self.total_usage
    }

    /// Run one full turn for `text`.
    ///
    /// Resolves once the session is back at [`TurnState::Idle`].
    pub async fn handle_user_message(&mut self, text: &str) -> Result<TurnOutcome, TurnError> {
        log::info!("Handling user message ({} chars)", text.len());
        self.emit(TurnEvent::TurnStarted {
            message_preview: text.chars().take(120).collect(),
        })
        .await;

        let result = self.run_turn(text).await;
        self.set_state(TurnState::Idle).await;

        match &result {
            Ok(outcome) => {
                if let Some(usage) = &outcome.tokens_used {
                    self.total_usage.accumulate(usage);
                }
                self.emit(TurnEvent::TurnCompleted {
                    tool_calls_made: outcome.tool_results.len(),
                    tokens_used: outcome.tokens_used.clone(),
                    response_length: outcome.reply.len(),
                })
                .await;
            }
            Err(e) => {
                log::error!("{}", e);
                self.emit(TurnEvent::TurnFailed {
                    error: e.to_string(),
                })
                .await;
            }
        }
        result
    }

    /// Run a turn and return what it added to the user-facing view.
    pub async fn submit(&mut self, text: &str) -> Result<Vec<RenderedMessage>, TurnError> {
        let start = self.transcript.len();
        self.handle_user_message(text).await?;
        Ok(self.transcript.render_since(start))
    }

    async fn run_turn(&mut self, text: &str) -> Result<TurnOutcome, TurnError> {
        // Idle accepts the next message by going back to AwaitingUser.
        self.set_state(TurnState::AwaitingUser).await;
        self.transcript.append(TranscriptEntry::user(text))?;
        let mut tokens_used: Option<TokenUsage> = None;

        self.set_state(TurnState::Proposing).await;
        self.emit(TurnEvent::ModelCallStarted {
            phase: ModelPhase::Propose,
        })
        .await;
        let tools = self.registry.tool_definitions();
        let proposal = self.gateway.propose(&self.transcript, &tools).await?;
        add_usage(&mut tokens_used, proposal.usage.as_ref());
        self.emit(TurnEvent::ModelCallCompleted {
            phase: ModelPhase::Propose,
            tool_calls: proposal.pending_calls.len(),
            response_length: proposal.text.len(),
        })
        .await;

        if !proposal.wants_tools() {
            self.transcript
                .append(TranscriptEntry::assistant(proposal.text.clone()))?;
            return Ok(TurnOutcome {
                reply: proposal.text,
                tool_results: Vec::new(),
                tokens_used,
            });
        }

        self.set_state(TurnState::Executing).await;
        self.transcript.append(TranscriptEntry::assistant_with_calls(
            proposal.text.clone(),
            proposal.pending_calls.clone(),
        ))?;
        let tool_results = self.execute_calls(&proposal.pending_calls).await;
        for result in &tool_results {
            self.transcript.append(TranscriptEntry::tool_result(result))?;
        }

        self.set_state(TurnState::Finalizing).await;
        self.emit(TurnEvent::ModelCallStarted {
            phase: ModelPhase::Finalize,
        })
        .await;
        let answer = self.gateway.finalize(&self.transcript).await?;
        add_usage(&mut tokens_used, answer.usage.as_ref());
        self.emit(TurnEvent::ModelCallCompleted {
            phase: ModelPhase::Finalize,
            tool_calls: 0,
            response_length: answer.text.len(),
        })
        .await;
        self.transcript
            .append(TranscriptEntry::assistant(answer.text.clone()))?;

        Ok(TurnOutcome {
            reply: answer.text,
            tool_results,
            tokens_used,
        })
    }

    async fn execute_calls(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        for call in calls {
            log::info!("Tool call {} -> '{}'", call.id, call.name);
            log::debug!("Tool call {} arguments: {}", call.id, call.arguments);
            self.emit(TurnEvent::ToolCallDetected {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await;
        }

        let results = match self.execution_mode {
            ExecutionMode::Parallel => {
                let tasks: Vec<_> = calls
                    .iter()
                    .map(|call| {
                        let registry = Arc::clone(&self.registry);
                        let call = call.clone();
                        tokio::spawn(async move { dispatch(&registry, &call).await })
                    })
                    .collect();

                // Collect in request order, whatever order the tasks finish in
                let mut results = Vec::with_capacity(calls.len());
                for (call, task) in calls.iter().zip(tasks) {
                    results.push(task.await.unwrap_or_else(|e| {
                        log::error!("Tool task for '{}' failed: {}", call.name, e);
                        ToolCallResult::error(&call.id, format!("tool task failed: {}", e))
                    }));
                }
                results
            }
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    results.push(dispatch(&self.registry, call).await);
                }
                results
            }
        };

        for (call, result) in calls.iter().zip(&results) {
            let error = if result.is_error {
                Some(match &result.payload {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            } else {
                None
            };
            self.emit(TurnEvent::ToolExecutionCompleted {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                success: !result.is_error,
                error,
            })
            .await;
        }
        results
    }

    async fn set_state(&mut self, to: TurnState) {
        let from = self.state;
        if from == to {
            return;
        }
        log::debug!("Turn state {:?} -> {:?}", from, to);
        self.state = to;
        self.emit(TurnEvent::StateChanged { from, to }).await;
    }

    async fn emit(&self, event: TurnEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_turn_event(&event).await;
        }
    }
}

/// Execute one call; every failure becomes an error result.
async fn dispatch(registry: &ToolRegistry, call: &ToolCallRequest) -> ToolCallResult {
    match registry.invoke(&call.name, call.arguments.clone()).await {
        Ok(result) => {
            if !result.success {
                log::warn!(
                    "Tool '{}' reported failure: {}",
                    call.name,
                    result.error.as_deref().unwrap_or("unspecified")
                );
            }
            ToolCallResult::from_tool_result(&call.id, result)
        }
        Err(e) => {
            log::warn!("Tool '{}' could not be executed: {}", call.name, e);
            ToolCallResult::error(&call.id, e.to_string())
        }
    }
}

fn add_usage(total: &mut Option<TokenUsage>, usage: Option<&TokenUsage>) {
    if let Some(usage) = usage {
        total.get_or_insert_with(TokenUsage::default).accumulate(usage);
    }
}
