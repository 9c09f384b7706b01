//! McpStdioProtocol against a scripted child process.
#![cfg(unix)]

use mcpchat::mcp_client::McpStdioProtocol;
use mcpchat::tool_protocol::{RegistryError, ToolProtocol, ToolRegistry};
use serde_json::json;
use std::sync::Arc;

/// A line-oriented MCP server in POSIX sh. It answers by request id, prints a
/// log line and a notification before some responses, and ignores
/// notifications from the client. Each start is logged to `$SPAWN_LOG` when
/// set, and the `crash` tool makes the process exit without answering.
const SERVER: &str = r##"
[ -n "$SPAWN_LOG" ] && echo started >> "$SPAWN_LOG"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      echo 'starting calculator server'
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}},"serverInfo":{"name":"sh-calc","version":"1"}}}'
      ;;
    *'"method":"notifications/'*)
      ;;
    *'"method":"tools/list"'*)
      echo '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}'
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"tools":[{"name":"add","description":"Add two numbers","inputSchema":{"type":"object","properties":{"a":{"type":"number"},"b":{"type":"number"}},"required":["a","b"]}},{"name":"divide","description":"Divide a by b","inputSchema":{"type":"object","properties":{"a":{"type":"number"},"b":{"type":"number"}},"required":["a","b"]}}]}}'
      ;;
    *'"name":"add"'*)
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"content":[{"type":"text","text":"42.0"}],"isError":false}}'
      ;;
    *'"name":"crash"'*)
      exit 1
      ;;
    *'"name":"divide"'*)
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"content":[{"type":"text","text":"Division by zero is not allowed"}],"isError":true}}'
      ;;
    *)
      echo '{"jsonrpc":"2.0","id":'"$id"',"error":{"code":-32602,"message":"Unknown tool"}}'
      ;;
  esac
done
"##;

fn scripted_server() -> McpStdioProtocol {
    McpStdioProtocol::new("sh").with_args(["-c", SERVER])
}

fn spawn_count(log: &std::path::Path) -> usize {
    std::fs::read_to_string(log)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_discovery_and_calls() {
    let mut registry = ToolRegistry::empty();
    let count = registry
        .add_protocol("math", Arc::new(scripted_server()))
        .await
        .unwrap();
    assert_eq!(count, 2);
    let names: Vec<&str> = registry.all().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["add", "divide"]);

    let added = registry.invoke("add", json!({"a": 12, "b": 30})).await.unwrap();
    assert!(added.success);
    assert_eq!(added.output, json!(42.0));

    let divided = registry.invoke("divide", json!({"a": 1, "b": 0})).await.unwrap();
    assert!(!divided.success);
    assert_eq!(
        divided.error.as_deref(),
        Some("Division by zero is not allowed")
    );

    registry.shutdown().await;
}

#[tokio::test]
async fn test_rpc_error_is_reported() {
    let server = scripted_server();
    let err = server.execute("sqrt", json!({"a": 4})).await.unwrap_err();
    assert!(err.to_string().contains("Unknown tool"));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_after_shutdown() {
    let server = scripted_server();
    server.initialize().await.unwrap();
    server.shutdown().await.unwrap();

    let tools = server.list_tools().await.unwrap();
    assert_eq!(tools.len(), 2);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_command_fails_discovery() {
    let mut registry = ToolRegistry::empty();
    let err = registry
        .add_protocol(
            "ghost",
            Arc::new(McpStdioProtocol::new("/nonexistent/mcp-server")),
        )
        .await
        .unwrap_err();
    match err {
        RegistryError::Discovery { protocol, message } => {
            assert_eq!(protocol, "ghost");
            assert!(message.contains("failed to spawn"));
        }
        other => panic!("expected a discovery error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_that_exits_is_an_error() {
    let server = McpStdioProtocol::new("sh").with_args(["-c", "exit 0"]);
    assert!(server.initialize().await.is_err());
}

#[tokio::test]
async fn test_respawns_after_child_dies() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("spawns.log");
    let server = scripted_server().with_env("SPAWN_LOG", log.to_string_lossy());

    assert_eq!(server.list_tools().await.unwrap().len(), 2);
    assert_eq!(spawn_count(&log), 1);

    let err = server.execute("crash", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("closed its output"));

    // the next requests run against a fresh child
    assert_eq!(server.list_tools().await.unwrap().len(), 2);
    let added = server.execute("add", json!({"a": 12, "b": 30})).await.unwrap();
    assert_eq!(added.output, json!(42.0));
    assert_eq!(spawn_count(&log), 2);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rpc_error_keeps_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("spawns.log");
    let server = scripted_server().with_env("SPAWN_LOG", log.to_string_lossy());

    assert!(server.execute("sqrt", json!({"a": 4})).await.is_err());
    assert_eq!(server.list_tools().await.unwrap().len(), 2);
    assert_eq!(spawn_count(&log), 1);
    server.shutdown().await.unwrap();
}
