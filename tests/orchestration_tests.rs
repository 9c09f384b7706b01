//! Integration tests for the propose / execute / finalize loop.
//!
//! Each test wires a real ToolRegistry (the built-in Calculator plus closure
//! tools where timing matters) to a ScriptedClient that plays back canned model
//! replies and records what it was sent.

use async_trait::async_trait;
use mcpchat::client_wrapper::{
    ClientError, ClientWrapper, Message, Role, TokenUsage, ToolCallRequest, ToolDefinition,
};
use mcpchat::event::{EventHandler, TurnEvent};
use mcpchat::model_gateway::{GatewayError, ModelGateway};
use mcpchat::orchestration::{ChatSession, ExecutionMode, TurnError, TurnState};
use mcpchat::tool_protocol::{ToolMetadata, ToolRegistry, ToolResult};
use mcpchat::tool_protocols::CustomToolProtocol;
use mcpchat::tools::Calculator;
use mcpchat::transcript::{RenderedMessage, TranscriptEntry};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A model that answers from a script and remembers every request.
struct ScriptedClient {
    replies: Mutex<VecDeque<Result<Message, ClientError>>>,
    requests: Mutex<Vec<(Vec<Message>, Option<Vec<ToolDefinition>>)>>,
    usage: Option<TokenUsage>,
}

impl ScriptedClient {
    fn new(replies: Vec<Result<Message, ClientError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            usage: None,
        })
    }

    fn with_usage(replies: Vec<Result<Message, ClientError>>, usage: TokenUsage) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            usage: Some(usage),
        })
    }

    fn request(&self, i: usize) -> (Vec<Message>, Option<Vec<ToolDefinition>>) {
        self.requests.lock().unwrap()[i].clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, ClientError> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Unavailable("script exhausted".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage.clone()
    }
}

fn calls(calls: Vec<(&str, &str, Value)>) -> Message {
    Message::assistant_with_calls(
        "",
        calls
            .into_iter()
            .map(|(id, name, args)| ToolCallRequest::new(id, name, args))
            .collect(),
    )
}

async fn calculator_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::empty();
    registry
        .add_protocol("math", Arc::new(Calculator::new()))
        .await
        .unwrap();
    Arc::new(registry)
}

fn session(registry: Arc<ToolRegistry>, client: Arc<ScriptedClient>) -> ChatSession {
    ChatSession::new(registry, ModelGateway::new(client), "Answer concisely.")
}

fn results(entries: &[TranscriptEntry]) -> Vec<(String, Value, bool)> {
    entries
        .iter()
        .filter_map(|e| match e {
            TranscriptEntry::ToolResult {
                call_id,
                payload,
                is_error,
            } => Some((call_id.clone(), payload.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_single_tool_call_renders_only_question_and_answer() {
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("c1", "add", json!({"a": 12, "b": 30}))])),
        Ok(Message::assistant("42")),
    ]);
    let mut chat = session(calculator_registry().await, client.clone());

    let outcome = chat.handle_user_message("what is 12 plus 30?").await.unwrap();
    assert_eq!(outcome.reply, "42");
    assert_eq!(outcome.tool_results.len(), 1);
    assert_eq!(outcome.tool_results[0].payload, json!(42.0));
    assert_eq!(chat.state(), TurnState::Idle);

    assert_eq!(
        chat.transcript().render(),
        vec![
            RenderedMessage {
                role: Role::User,
                text: "what is 12 plus 30?".into()
            },
            RenderedMessage {
                role: Role::Assistant,
                text: "42".into()
            },
        ]
    );

    // propose offers the calculator, finalize offers nothing
    let (_, offered) = client.request(0);
    assert_eq!(offered.map(|t| t.len()), Some(8));
    let (messages, offered) = client.request(1);
    assert!(offered.is_none());
    let last = messages.last().unwrap();
    assert_eq!(last.role, Role::Tool);
    assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(&*last.content, "42.0");
    assert_eq!(messages[0].role, Role::System);
}

#[tokio::test]
async fn test_direct_answer_skips_execution_and_finalize() {
    let client = ScriptedClient::new(vec![Ok(Message::assistant("Hello!"))]);
    let mut chat = session(calculator_registry().await, client.clone());

    let rendered = chat.submit("hi there").await.unwrap();
    assert_eq!(
        rendered,
        vec![
            RenderedMessage {
                role: Role::User,
                text: "hi there".into()
            },
            RenderedMessage {
                role: Role::Assistant,
                text: "Hello!".into()
            },
        ]
    );
    assert_eq!(client.request_count(), 1);
    assert!(results(chat.transcript().entries()).is_empty());
}

#[tokio::test]
async fn test_unknown_tool_becomes_error_result() {
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("m1", "fly_to_moon", json!({}))])),
        Ok(Message::assistant("I can't fly you to the moon.")),
    ]);
    let mut chat = session(calculator_registry().await, client);

    let outcome = chat.handle_user_message("take me to the moon").await.unwrap();
    assert_eq!(outcome.reply, "I can't fly you to the moon.");

    let recorded = results(chat.transcript().entries());
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].2);
    assert!(recorded[0]
        .1
        .as_str()
        .unwrap()
        .contains("tool not found: fly_to_moon"));
}

#[tokio::test]
async fn test_two_calls_results_in_request_order() {
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![
            ("a", "add", json!({"a": 1, "b": 2})),
            ("b", "divide", json!({"a": 1, "b": 0})),
        ])),
        Ok(Message::assistant("1 + 2 is 3, and dividing by zero is not allowed.")),
    ]);
    let mut chat = session(calculator_registry().await, client);

    chat.handle_user_message("add 1 and 2, then divide 1 by 0")
        .await
        .unwrap();

    let recorded = results(chat.transcript().entries());
    assert_eq!(
        recorded,
        vec![
            ("a".to_string(), json!(3.0), false),
            (
                "b".to_string(),
                json!("Division by zero is not allowed"),
                true
            ),
        ]
    );
}

async fn timed_registry(finished: Arc<Mutex<Vec<&'static str>>>) -> Arc<ToolRegistry> {
    let local = Arc::new(CustomToolProtocol::new());
    for (name, delay_ms) in [("slow", 80u64), ("fast", 0u64)] {
        let finished = finished.clone();
        local
            .register_async_tool(
                ToolMetadata::new(name, "Waits, then reports its name"),
                Arc::new(move |_| {
                    let finished = finished.clone();
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        finished.lock().unwrap().push(name);
                        Ok(ToolResult::success(json!(name)))
                    })
                }),
            )
            .await;
    }
    let mut registry = ToolRegistry::empty();
    registry.add_protocol("local", local).await.unwrap();
    Arc::new(registry)
}

#[tokio::test]
async fn test_parallel_dispatch_keeps_request_order() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("a", "slow", json!({})), ("b", "fast", json!({}))])),
        Ok(Message::assistant("done")),
    ]);
    let mut chat = session(timed_registry(finished.clone()).await, client);
    assert_eq!(chat.execution_mode(), ExecutionMode::Parallel);

    chat.handle_user_message("go").await.unwrap();

    assert_eq!(*finished.lock().unwrap(), vec!["fast", "slow"]);
    let ids: Vec<String> = results(chat.transcript().entries())
        .into_iter()
        .map(|(id, _, _)| id)
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_sequential_dispatch_runs_one_at_a_time() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("a", "slow", json!({})), ("b", "fast", json!({}))])),
        Ok(Message::assistant("done")),
    ]);
    let mut chat = session(timed_registry(finished.clone()).await, client)
        .with_execution_mode(ExecutionMode::Sequential);

    chat.handle_user_message("go").await.unwrap();

    assert_eq!(*finished.lock().unwrap(), vec!["slow", "fast"]);
}

#[tokio::test]
async fn test_string_arguments_are_parsed_before_dispatch() {
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("s1", "add", json!("{\"a\": 12, \"b\": 30}"))])),
        Ok(Message::assistant("42")),
    ]);
    let mut chat = session(calculator_registry().await, client);

    let outcome = chat.handle_user_message("12 + 30?").await.unwrap();
    assert_eq!(outcome.tool_results[0].payload, json!(42.0));
    assert!(!outcome.tool_results[0].is_error);
}

#[tokio::test]
async fn test_unparseable_arguments_fail_in_the_tool() {
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("s1", "add", json!("a=12, b=30"))])),
        Ok(Message::assistant("Sorry, that did not work.")),
    ]);
    let mut chat = session(calculator_registry().await, client);

    let outcome = chat.handle_user_message("12 + 30?").await.unwrap();
    assert!(outcome.tool_results[0].is_error);
    assert!(outcome.tool_results[0]
        .payload
        .as_str()
        .unwrap()
        .contains("invalid parameters"));

    // the raw string is what was recorded and forwarded
    let requested = chat
        .transcript()
        .entries()
        .iter()
        .find_map(|e| match e {
            TranscriptEntry::AssistantMessage { pending_calls, .. } if !pending_calls.is_empty() => {
                Some(pending_calls[0].arguments.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(requested, json!("a=12, b=30"));
}

#[tokio::test]
async fn test_model_failure_keeps_transcript_and_recovers() {
    let client = ScriptedClient::new(vec![
        Err(ClientError::Unavailable("HTTP 503".into())),
        Ok(Message::assistant("Back online.")),
    ]);
    let mut chat = session(calculator_registry().await, client);

    let err = chat.handle_user_message("hello?").await.unwrap_err();
    assert_eq!(
        err,
        TurnError::Model(GatewayError::ModelUnavailable("HTTP 503".into()))
    );
    assert_eq!(chat.state(), TurnState::Idle);
    assert_eq!(chat.transcript().len(), 2);
    assert!(chat.transcript().outstanding_calls().is_empty());

    let outcome = chat.handle_user_message("hello again").await.unwrap();
    assert_eq!(outcome.reply, "Back online.");
}

#[tokio::test]
async fn test_finalize_failure_leaves_results_in_place() {
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("c1", "sqrt", json!({"a": 16}))])),
        Err(ClientError::InvalidResponse("garbled".into())),
    ]);
    let mut chat = session(calculator_registry().await, client);

    let err = chat.handle_user_message("sqrt of 16").await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Model(GatewayError::InvalidResponse(_))
    ));
    let entries = chat.transcript().entries();
    assert_eq!(entries.len(), 4);
    assert!(matches!(entries[3], TranscriptEntry::ToolResult { .. }));
    // only the user message is visible
    assert_eq!(chat.transcript().render().len(), 1);
}

#[tokio::test]
async fn test_finalize_never_yields_new_calls() {
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("c1", "add", json!({"a": 1, "b": 1}))])),
        Ok(calls(vec![("c2", "add", json!({"a": 2, "b": 2}))])),
    ]);
    let mut chat = session(calculator_registry().await, client);

    let outcome = chat.handle_user_message("1+1").await.unwrap();
    assert_eq!(outcome.tool_results.len(), 1);
    assert!(chat.transcript().outstanding_calls().is_empty());
    match chat.transcript().entries().last().unwrap() {
        TranscriptEntry::AssistantMessage { pending_calls, .. } => {
            assert!(pending_calls.is_empty())
        }
        other => panic!("expected a final assistant message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_render_is_stable_across_turns() {
    let client = ScriptedClient::new(vec![
        Ok(Message::assistant("Hi!")),
        Ok(calls(vec![("c1", "multiply", json!({"a": 6, "b": 7}))])),
        Ok(Message::assistant("42")),
    ]);
    let mut chat = session(calculator_registry().await, client);

    chat.submit("hello").await.unwrap();
    let delta = chat.submit("6 times 7").await.unwrap();
    assert_eq!(delta.len(), 2);
    assert_eq!(delta[1].text, "42");

    let first = chat.transcript().render();
    let second = chat.transcript().render();
    assert_eq!(first, second);
    let texts: Vec<&str> = first.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "Hi!", "6 times 7", "42"]);
}

#[tokio::test]
async fn test_token_usage_accumulates_over_model_calls() {
    let usage = TokenUsage {
        input_tokens: 10,
        output_tokens: 5,
        total_tokens: 15,
    };
    let client = ScriptedClient::with_usage(
        vec![
            Ok(calls(vec![("c1", "add", json!({"a": 1, "b": 1}))])),
            Ok(Message::assistant("2")),
        ],
        usage,
    );
    let mut chat = session(calculator_registry().await, client);

    let outcome = chat.handle_user_message("1+1").await.unwrap();
    assert_eq!(outcome.tokens_used.unwrap().total_tokens, 30);
    assert_eq!(chat.token_usage().total_tokens, 30);
}

struct Recorder {
    events: Mutex<Vec<TurnEvent>>,
}

#[async_trait]
impl EventHandler for Recorder {
    async fn on_turn_event(&self, event: &TurnEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn test_events_follow_the_state_machine() {
    let recorder = Arc::new(Recorder {
        events: Mutex::new(Vec::new()),
    });
    let client = ScriptedClient::new(vec![
        Ok(calls(vec![("c1", "power", json!({"a": 2, "b": 10}))])),
        Ok(Message::assistant("1024")),
    ]);
    let mut chat =
        session(calculator_registry().await, client).with_event_handler(recorder.clone());

    chat.handle_user_message("2^10").await.unwrap();

    let events = recorder.events.lock().unwrap();
    let states: Vec<TurnState> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            TurnState::Proposing,
            TurnState::Executing,
            TurnState::Finalizing,
            TurnState::Idle
        ]
    );
    assert!(matches!(events.first(), Some(TurnEvent::TurnStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(TurnEvent::TurnCompleted {
            tool_calls_made: 1,
            ..
        })
    ));
}

#[tokio::test]
async fn test_next_message_returns_through_awaiting_user() {
    let recorder = Arc::new(Recorder {
        events: Mutex::new(Vec::new()),
    });
    let client = ScriptedClient::new(vec![
        Ok(Message::assistant("hello")),
        Ok(Message::assistant("still here")),
    ]);
    let mut chat =
        session(calculator_registry().await, client).with_event_handler(recorder.clone());

    chat.handle_user_message("hi").await.unwrap();
    chat.handle_user_message("are you there?").await.unwrap();
    assert_eq!(chat.state(), TurnState::Idle);

    let events = recorder.events.lock().unwrap();
    let transitions: Vec<(TurnState, TurnState)> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (TurnState::AwaitingUser, TurnState::Proposing),
            (TurnState::Proposing, TurnState::Idle),
            (TurnState::Idle, TurnState::AwaitingUser),
            (TurnState::AwaitingUser, TurnState::Proposing),
            (TurnState::Proposing, TurnState::Idle),
        ]
    );
}
