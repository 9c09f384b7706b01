//! Transcript persistence and the request/result pairing rule.

use mcpchat::client_wrapper::{Role, ToolCallRequest};
use mcpchat::tool_protocol::ToolCallResult;
use mcpchat::transcript::{RenderedMessage, Transcript, TranscriptEntry, TranscriptError};
use serde_json::json;
use std::io::Write;

fn finished_turn() -> Transcript {
    let mut t = Transcript::with_system_directive("Be concise.");
    t.append(TranscriptEntry::user("what is 12 plus 30, and 1 divided by 0?"))
        .unwrap();
    t.append(TranscriptEntry::assistant_with_calls(
        "",
        vec![
            ToolCallRequest::new("a", "add", json!({"a": 12, "b": 30})),
            ToolCallRequest::new("b", "divide", json!("{\"a\": 1, \"b\": 0}")),
        ],
    ))
    .unwrap();
    t.append(TranscriptEntry::tool_result(&ToolCallResult {
        call_id: "a".into(),
        payload: json!(42.0),
        is_error: false,
    }))
    .unwrap();
    t.append(TranscriptEntry::tool_result(&ToolCallResult::error(
        "b",
        "Division by zero is not allowed",
    )))
    .unwrap();
    t.append(TranscriptEntry::assistant("42, and 1/0 is undefined."))
        .unwrap();
    t
}

#[test]
fn test_jsonl_round_trip() {
    let original = finished_turn();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.jsonl");

    original.write_jsonl(&path).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), original.len());
    assert!(contents.lines().next().unwrap().contains("\"type\":\"system_directive\""));

    let loaded = Transcript::read_jsonl(&path).unwrap();
    assert_eq!(loaded.entries(), original.entries());
    assert_eq!(loaded.render(), original.render());
    assert!(loaded.outstanding_calls().is_empty());
}

#[test]
fn test_read_rejects_out_of_order_results() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let lines = [
        json!({"type": "user_message", "text": "go"}),
        json!({"type": "assistant_message", "text": "", "pending_calls": [
            {"id": "a", "name": "add", "arguments": {}},
            {"id": "b", "name": "add", "arguments": {}}
        ]}),
        json!({"type": "tool_result", "call_id": "b", "payload": 1}),
    ];
    for line in &lines {
        writeln!(file, "{}", line).unwrap();
    }

    let err = Transcript::read_jsonl(file.path()).unwrap_err();
    assert_eq!(
        err,
        TranscriptError::OutOfOrderToolResult {
            expected: "a".into(),
            found: "b".into()
        }
    );
}

#[test]
fn test_read_reports_bad_lines() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", json!({"type": "user_message", "text": "hi"})).unwrap();
    writeln!(file).unwrap();
    writeln!(file, "{{\"type\": \"telepathy\"}}").unwrap();

    match Transcript::read_jsonl(file.path()).unwrap_err() {
        TranscriptError::Parse { line, .. } => assert_eq!(line, 3),
        other => panic!("expected a parse error, got {:?}", other),
    }

    let missing = Transcript::read_jsonl("/nonexistent/chat.jsonl").unwrap_err();
    assert!(matches!(missing, TranscriptError::Io(_)));
}

#[test]
fn test_result_without_request_is_rejected() {
    let mut t = Transcript::new();
    let err = t
        .append(TranscriptEntry::tool_result(&ToolCallResult::error("x", "nope")))
        .unwrap_err();
    assert_eq!(err, TranscriptError::UnmatchedToolResult("x".into()));
    assert!(t.is_empty());
}

#[test]
fn test_render_view_of_a_tool_turn() {
    let t = finished_turn();
    assert_eq!(
        t.render(),
        vec![
            RenderedMessage {
                role: Role::User,
                text: "what is 12 plus 30, and 1 divided by 0?".into()
            },
            RenderedMessage {
                role: Role::Assistant,
                text: "42, and 1/0 is undefined.".into()
            },
        ]
    );
    assert_eq!(t.render_since(t.len()), Vec::new());
}

#[test]
fn test_read_rejects_file_ending_with_unanswered_calls() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let lines = [
        json!({"type": "system_directive", "text": "Be concise."}),
        json!({"type": "user_message", "text": "what is 2 plus 2?"}),
        json!({"type": "assistant_message", "text": "", "pending_calls": [
            {"id": "c1", "name": "add", "arguments": {"a": 2, "b": 2}}
        ]}),
    ];
    for line in &lines {
        writeln!(file, "{}", line).unwrap();
    }

    let err = Transcript::read_jsonl(file.path()).unwrap_err();
    assert_eq!(err, TranscriptError::PendingCalls(vec!["c1".into()]));
}
