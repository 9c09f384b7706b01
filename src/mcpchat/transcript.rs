//! The conversation transcript.
//!
//! A [`Transcript`] is an append-only log of [`TranscriptEntry`] values. The
//! order of entries is the record of what was said and done; the model gateway
//! replays the whole sequence on every call, so entries are never reordered,
//! mutated or removed.
//!
//! `append` enforces the pairing rule between tool requests and tool results:
//!
//! - a tool result must answer the oldest outstanding request (results arrive in
//!   request order);
//! - while any request is outstanding, neither a user message nor an assistant
//!   message may be appended;
//! - call ids are unique inside one assistant message.
//!
//! [`Transcript::render`] derives what the end user sees: user messages and
//! assistant answers, never the plumbing in between.

use crate::mcpchat::client_wrapper::{Role, ToolCallRequest};
use crate::mcpchat::tool_protocol::ToolCallResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// One record in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    UserMessage {
        text: String,
    },
    /// An assistant turn. With non-empty `pending_calls` it is an intermediate
    /// record that is never rendered.
    AssistantMessage {
        text: String,
        #[serde(default)]
        pending_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        call_id: String,
        payload: Value,
        #[serde(default)]
        is_error: bool,
    },
    SystemDirective {
        text: String,
    },
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        TranscriptEntry::UserMessage { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        TranscriptEntry::AssistantMessage {
            text: text.into(),
            pending_calls: Vec::new(),
        }
    }

    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        TranscriptEntry::AssistantMessage {
            text: text.into(),
            pending_calls: calls,
        }
    }

    pub fn tool_result(result: &ToolCallResult) -> Self {
        TranscriptEntry::ToolResult {
            call_id: result.call_id.clone(),
            payload: result.payload.clone(),
            is_error: result.is_error,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        TranscriptEntry::SystemDirective { text: text.into() }
    }
}

/// A message as shown to the end user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub role: Role,
    pub text: String,
}

/// Reasons an entry can be refused, or a stored transcript cannot be loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptError {
    /// A tool result whose id matches no outstanding request.
    UnmatchedToolResult(String),
    /// A tool result that skips ahead of an earlier outstanding request.
    OutOfOrderToolResult { expected: String, found: String },
    /// A user or assistant message while these calls still await results.
    PendingCalls(Vec<String>),
    /// The same call id appears twice in one assistant message.
    DuplicateCallId(String),
    Io(String),
    Parse { line: usize, message: String },
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptError::UnmatchedToolResult(id) => {
                write!(f, "tool result '{}' answers no outstanding call", id)
            }
            TranscriptError::OutOfOrderToolResult { expected, found } => write!(
                f,
                "tool result '{}' arrived before the result for '{}'",
                found, expected
            ),
            TranscriptError::PendingCalls(ids) => {
                write!(f, "calls still awaiting results: {}", ids.join(", "))
            }
            TranscriptError::DuplicateCallId(id) => {
                write!(f, "call id '{}' repeated in one assistant message", id)
            }
            TranscriptError::Io(msg) => write!(f, "transcript I/O error: {}", msg),
            TranscriptError::Parse { line, message } => {
                write!(f, "transcript line {}: {}", line, message)
            }
        }
    }
}

impl Error for TranscriptError {}

/// Ordered, append-only conversation log.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    outstanding: VecDeque<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript opening with one system directive.
    pub fn with_system_directive(text: impl Into<String>) -> Self {
        Self {
            entries: vec![TranscriptEntry::system(text)],
            outstanding: VecDeque::new(),
        }
    }

    /// Append an entry if it keeps requests and results paired.
    pub fn append(&mut self, entry: TranscriptEntry) -> Result<(), TranscriptError> {
        match &entry {
            TranscriptEntry::ToolResult { call_id, .. } => match self.outstanding.front() {
                Some(expected) if expected == call_id => {
                    self.outstanding.pop_front();
                }
                Some(expected) if self.outstanding.contains(call_id) => {
                    return Err(TranscriptError::OutOfOrderToolResult {
                        expected: expected.clone(),
                        found: call_id.clone(),
                    });
                }
                _ => return Err(TranscriptError::UnmatchedToolResult(call_id.clone())),
            },
            TranscriptEntry::UserMessage { .. } => self.ensure_no_pending_calls()?,
            TranscriptEntry::AssistantMessage { pending_calls, .. } => {
                self.ensure_no_pending_calls()?;
                let mut seen = HashSet::new();
                for call in pending_calls {
                    if !seen.insert(call.id.as_str()) {
                        return Err(TranscriptError::DuplicateCallId(call.id.clone()));
                    }
                }
                self.outstanding
                    .extend(pending_calls.iter().map(|c| c.id.clone()));
            }
            TranscriptEntry::SystemDirective { .. } => {}
        }

        self.entries.push(entry);
        Ok(())
    }

    fn ensure_no_pending_calls(&self) -> Result<(), TranscriptError> {
        if self.outstanding.is_empty() {
            Ok(())
        } else {
            Err(TranscriptError::PendingCalls(
                self.outstanding.iter().cloned().collect(),
            ))
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of requests still waiting for a result, oldest first.
    pub fn outstanding_calls(&self) -> Vec<&str> {
        self.outstanding.iter().map(|s| s.as_str()).collect()
    }

    /// The user-facing view of the whole transcript.
    pub fn render(&self) -> Vec<RenderedMessage> {
        self.render_since(0)
    }

    /// The user-facing view of the entries from index `start` onwards.
    pub fn render_since(&self, start: usize) -> Vec<RenderedMessage> {
        self.entries
            .iter()
            .skip(start)
            .filter_map(|entry| match entry {
                TranscriptEntry::UserMessage { text } => Some(RenderedMessage {
                    role: Role::User,
                    text: text.clone(),
                }),
                TranscriptEntry::AssistantMessage {
                    text,
                    pending_calls,
                } if pending_calls.is_empty() => Some(RenderedMessage {
                    role: Role::Assistant,
                    text: text.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Write one JSON object per entry.
    pub fn write_jsonl(&self, path: impl AsRef<Path>) -> Result<(), TranscriptError> {
        let io_error = |e: std::io::Error| TranscriptError::Io(e.to_string());
        let mut writer = BufWriter::new(File::create(path.as_ref()).map_err(io_error)?);
        for entry in &self.entries {
            let line = serde_json::to_string(entry).map_err(|e| TranscriptError::Parse {
                line: 0,
                message: e.to_string(),
            })?;
            writeln!(writer, "{}", line).map_err(io_error)?;
        }
        writer.flush().map_err(io_error)
    }

    /// Load a transcript written by [`write_jsonl`](Self::write_jsonl).
    ///
    /// Every line is replayed through [`append`](Self::append), so a file that
    /// breaks the pairing rule is rejected. So is a file that stops while tool
    /// calls are still waiting for their results.
    pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Self, TranscriptError> {
        let file = File::open(path.as_ref()).map_err(|e| TranscriptError::Io(e.to_string()))?;
        let mut transcript = Transcript::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| TranscriptError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TranscriptEntry =
                serde_json::from_str(&line).map_err(|e| TranscriptError::Parse {
                    line: i + 1,
                    message: e.to_string(),
                })?;
            transcript.append(entry)?;
        }
        transcript.ensure_no_pending_calls()?;
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "add", json!({"a": 1, "b": 2}))
    }

    fn result(id: &str) -> TranscriptEntry {
        TranscriptEntry::tool_result(&ToolCallResult {
            call_id: id.to_string(),
            payload: json!(3),
            is_error: false,
        })
    }

    #[test]
    fn test_results_must_follow_request_order() {
        let mut t = Transcript::new();
        t.append(TranscriptEntry::user("hi")).unwrap();
        t.append(TranscriptEntry::assistant_with_calls("", vec![call("a"), call("b")]))
            .unwrap();

        assert_eq!(
            t.append(result("b")),
            Err(TranscriptError::OutOfOrderToolResult {
                expected: "a".to_string(),
                found: "b".to_string()
            })
        );
        assert_eq!(
            t.append(result("zzz")),
            Err(TranscriptError::UnmatchedToolResult("zzz".to_string()))
        );
        t.append(result("a")).unwrap();
        t.append(result("b")).unwrap();
        assert!(t.outstanding_calls().is_empty());
    }

    #[test]
    fn test_answer_blocked_while_calls_pending() {
        let mut t = Transcript::new();
        t.append(TranscriptEntry::assistant_with_calls("", vec![call("a")]))
            .unwrap();

        let err = t.append(TranscriptEntry::assistant("done")).unwrap_err();
        assert_eq!(err, TranscriptError::PendingCalls(vec!["a".to_string()]));
        assert!(t.append(TranscriptEntry::user("again")).is_err());
        // refused entries are not stored
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_duplicate_ids_in_one_message() {
        let mut t = Transcript::new();
        let err = t
            .append(TranscriptEntry::assistant_with_calls("", vec![call("x"), call("x")]))
            .unwrap_err();
        assert_eq!(err, TranscriptError::DuplicateCallId("x".to_string()));
        assert!(t.is_empty());
    }

    #[test]
    fn test_render_hides_plumbing() {
        let mut t = Transcript::new();
        t.append(TranscriptEntry::system("be brief")).unwrap();
        t.append(TranscriptEntry::user("what is 1 plus 2?")).unwrap();
        t.append(TranscriptEntry::assistant_with_calls("let me check", vec![call("a")]))
            .unwrap();
        t.append(result("a")).unwrap();
        t.append(TranscriptEntry::assistant("3")).unwrap();

        let rendered = t.render();
        assert_eq!(
            rendered,
            vec![
                RenderedMessage {
                    role: Role::User,
                    text: "what is 1 plus 2?".to_string()
                },
                RenderedMessage {
                    role: Role::Assistant,
                    text: "3".to_string()
                },
            ]
        );
        assert_eq!(t.render(), rendered);
        assert_eq!(t.render_since(2).len(), 1);
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = TranscriptEntry::assistant_with_calls("", vec![call("a")]);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "assistant_message");
        assert_eq!(value["pending_calls"][0]["name"], "add");
    }
}
