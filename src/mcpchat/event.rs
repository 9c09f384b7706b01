//! Turn event system.
//!
//! Provides a callback-based observability layer for [`ChatSession`](crate::orchestration::ChatSession).
//! Implement [`EventHandler`] to receive notifications about model round trips,
//! tool dispatch, and state changes while a turn runs.
//!
//! # Event Flow (during a turn that uses tools)
//!
//! ```text
//! TurnStarted
//!   └─ StateChanged { AwaitingUser -> Proposing }
//!   └─ ModelCallStarted { phase: Propose }
//!   └─ ModelCallCompleted { phase: Propose, tool_calls: 2 }
//!   └─ StateChanged { Proposing -> Executing }
//!       ├─ ToolCallDetected { call_id: "a" }
//!       ├─ ToolCallDetected { call_id: "b" }
//!       ├─ ToolExecutionCompleted { call_id: "a" }
//!       └─ ToolExecutionCompleted { call_id: "b" }
//!   └─ StateChanged { Executing -> Finalizing }
//!   └─ ModelCallStarted { phase: Finalize }
//!   └─ ModelCallCompleted { phase: Finalize }
//!   └─ StateChanged { Finalizing -> Idle }
//! TurnCompleted
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpchat::event::{EventHandler, TurnEvent};
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_turn_event(&self, event: &TurnEvent) {
//!         if let TurnEvent::ToolCallDetected { tool_name, .. } = event {
//!             println!("calling {}", tool_name);
//!         }
//!     }
//! }
//! ```

use crate::mcpchat::client_wrapper::TokenUsage;
use crate::mcpchat::orchestration::TurnState;
use async_trait::async_trait;
use serde_json::Value;

/// Which model call a [`TurnEvent::ModelCallStarted`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPhase {
    Propose,
    Finalize,
}

/// Events emitted by a [`ChatSession`](crate::orchestration::ChatSession) while
/// it handles one user message.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A user message was accepted and the turn began.
    TurnStarted {
        /// First ~120 characters of the user message.
        message_preview: String,
    },

    StateChanged {
        from: TurnState,
        to: TurnState,
    },

    /// Fired before each model round trip.
    ModelCallStarted { phase: ModelPhase },

    /// Fired after a model round trip succeeded.
    ModelCallCompleted {
        phase: ModelPhase,
        /// Number of tool calls requested (always zero when finalizing).
        tool_calls: usize,
        response_length: usize,
    },

    /// A requested call is about to be dispatched.
    ToolCallDetected {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// A dispatched call came back, successfully or not.
    ToolExecutionCompleted {
        call_id: String,
        tool_name: String,
        success: bool,
        /// Error text when `success` is false.
        error: Option<String>,
    },

    /// The turn reached `Idle` with an answer.
    TurnCompleted {
        tool_calls_made: usize,
        /// Tokens reported by the endpoint during this turn, if any.
        tokens_used: Option<TokenUsage>,
        response_length: usize,
    },

    /// The turn was aborted by a model or transcript failure.
    TurnFailed { error: String },
}

/// Trait for receiving turn events.
///
/// The default implementation is a no-op. The `Send + Sync` bound lets one
/// handler be shared across sessions through `Arc<dyn EventHandler>`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_turn_event(&self, _event: &TurnEvent) {}
}
