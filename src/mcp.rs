//! Tool-process session: scoped ownership of one MCP server subprocess.
//!
//! The session spawns the external tool server (the filesystem MCP server via
//! `npx`), completes the protocol handshake over newline-delimited JSON-RPC
//! on the child's stdio, and discovers the tool capability list up front.
//! [`ToolSession::close`] must run exactly once per successful open on every
//! exit path; `kill_on_drop` covers abrupt termination.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// MCP protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn tool process `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Working directory is not accessible: {0}")]
    WorkingDirectory(String),

    #[error("Tool process handshake failed: {0}")]
    Handshake(String),

    #[error("Tool process I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tool process closed its output stream")]
    ServerClosed,

    #[error("Tool protocol error: {0}")]
    Protocol(String),

    #[error("Tool `{name}` failed: {message}")]
    Tool { name: String, message: String },
}

impl McpError {
    /// Whether the tool process (or its working directory) could not be
    /// reached at all, as opposed to a failure inside an established session.
    pub fn is_access_error(&self) -> bool {
        matches!(
            self,
            McpError::Spawn { .. } | McpError::WorkingDirectory(_) | McpError::Handshake(_)
        )
    }
}

/// A tool advertised by the server during the startup handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolInfo {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Seam between the conversation loop and the tool process, so tests can
/// substitute a scripted backend.
#[async_trait]
pub trait ToolBackend: Send {
    /// Tool descriptors discovered at session startup.
    fn tools(&self) -> &[McpToolInfo];

    /// Invoke one tool and return its textual result.
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String, McpError>;
}

/// One running tool server plus its stdio channel.
///
/// Single-owner, single-borrower for the run's lifetime: requests are strictly
/// serialized because every call takes `&mut self`.
#[derive(Debug)]
pub struct ToolSession {
    child: Option<Child>,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    tools: Vec<McpToolInfo>,
    next_id: u64,
}

impl ToolSession {
    /// Spawn the tool server rooted at `working_dir` and complete the
    /// handshake, including tool discovery.
    ///
    /// # Errors
    ///
    /// Returns an access error (`Spawn`, `WorkingDirectory` or `Handshake`)
    /// if the process cannot be started or never becomes ready.
    pub async fn open(
        command: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<Self, McpError> {
        if !working_dir.is_dir() {
            return Err(McpError::WorkingDirectory(
                working_dir.display().to_string(),
            ));
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .arg(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Handshake("tool process stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| McpError::Handshake("tool process stdout was not captured".into()))?;

        // Drain stderr in the background so the child never blocks on it.
        if let Some(stderr) = child.stderr.take() {
            let program = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("tool process stderr ({program}): {line}");
                }
            });
        }

        let mut session = Self {
            child: Some(child),
            stdin,
            stdout,
            tools: Vec::new(),
            next_id: 0,
        };

        session.handshake().await?;

        tracing::info!(tools = session.tools.len(), "tool session established");
        Ok(session)
    }

    async fn handshake(&mut self) -> Result<(), McpError> {
        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "file-assistant",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let init = self
            .request("initialize", init_params)
            .await
            .map_err(|e| McpError::Handshake(e.to_string()))?;

        let negotiated = init
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::debug!(protocol = negotiated, "tool process initialized");

        self.notify("notifications/initialized", json!({}))
            .await
            .map_err(|e| McpError::Handshake(e.to_string()))?;

        let listed = self
            .request("tools/list", json!({}))
            .await
            .map_err(|e| McpError::Handshake(e.to_string()))?;
        self.tools = listed
            .get("tools")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::Handshake(format!("invalid tool list: {e}")))?
            .unwrap_or_default();

        Ok(())
    }

    /// Terminate the tool process and release the channel.
    ///
    /// Safe to call at most once per open; repeated calls are no-ops.
    pub async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to terminate tool process: {e}");
            } else {
                tracing::debug!("tool session closed");
            }
        }
    }

    /// Whether the session has already been closed.
    pub fn is_closed(&self) -> bool {
        self.child.is_none()
    }

    /// Issue one JSON-RPC request and wait for its matching response.
    async fn request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        loop {
            let reply = self.read_message().await?;

            // Server-initiated notifications and stray messages are skipped
            // until the response for our id arrives.
            if !id_matches(reply.get("id"), id) {
                continue;
            }

            if let Some(error) = reply.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(McpError::Protocol(format!("{method}: {message}")));
            }

            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Send one JSON-RPC notification (no response expected).
    async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }

    async fn send(&mut self, message: &Value) -> Result<(), McpError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Value, McpError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.stdout.read_line(&mut line).await?;
            if read == 0 {
                return Err(McpError::ServerClosed);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map_err(|e| McpError::Protocol(format!("invalid message from tool process: {e}")));
        }
    }
}

#[async_trait]
impl ToolBackend for ToolSession {
    fn tools(&self) -> &[McpToolInfo] {
        &self.tools
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String, McpError> {
        tracing::debug!(tool = name, "calling tool");
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        let text = collect_text_content(&result);
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_error {
            return Err(McpError::Tool {
                name: name.to_string(),
                message: text,
            });
        }
        Ok(text)
    }
}

/// Whether a response id matches the request id we sent. Servers may echo
/// the numeric id back as a JSON string.
fn id_matches(reply_id: Option<&Value>, id: u64) -> bool {
    match reply_id {
        Some(Value::Number(n)) => n.as_u64() == Some(id),
        Some(Value::String(s)) => *s == id.to_string(),
        _ => false,
    }
}

/// Concatenate the `text` items of a tool result's content array.
fn collect_text_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// Detect whether `npx` (the tool-process launcher) is available on PATH.
pub async fn npx_available() -> bool {
    Command::new("npx")
        .arg("--version")
        .output()
        .await
        .is_ok_and(|o| o.status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal scripted MCP server: answers initialize, tools/list and
    // tools/call with fixed ids matching the session's request counter.
    const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'
      ;;
    *'"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"ready"}}'
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"read_file","description":"Read a file","inputSchema":{"type":"object"}},{"name":"list_directory","description":"List a directory","inputSchema":{"type":"object"}}]}}'
      ;;
    *'"fail_tool"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"boom"}],"isError":true}}'
      ;;
    *'"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"file contents"},{"type":"text","text":"second part"}]}}'
      ;;
  esac
done
"#;

    // Same server, but echoing request ids back as JSON strings.
    const FAKE_SERVER_STRING_IDS: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":"1","result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'
      ;;
    *'"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":"2","result":{"tools":[{"name":"read_file","description":"Read a file","inputSchema":{"type":"object"}}]}}'
      ;;
    *'"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":"3","result":{"content":[{"type":"text","text":"ok"}]}}'
      ;;
  esac
done
"#;

    async fn open_fake_session(dir: &Path) -> ToolSession {
        ToolSession::open("sh", &["-c".to_string(), FAKE_SERVER.to_string()], dir)
            .await
            .expect("fake session should open")
    }

    #[tokio::test]
    async fn handshake_discovers_tools() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_fake_session(dir.path()).await;

        let names: Vec<&str> = session.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", "list_directory"]);

        session.close().await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn call_tool_joins_text_content_and_skips_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_fake_session(dir.path()).await;

        let result = session
            .call_tool("read_file", json!({"path": "a.txt"}))
            .await
            .unwrap();
        assert_eq!(result, "file contents\nsecond part");

        session.close().await;
    }

    #[tokio::test]
    async fn error_results_surface_as_tool_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_fake_session(dir.path()).await;

        let err = session.call_tool("fail_tool", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Tool { .. }));
        assert!(!err.is_access_error());

        session.close().await;
    }

    #[tokio::test]
    async fn missing_working_directory_is_an_access_error() {
        let err = ToolSession::open("sh", &[], Path::new("/definitely/not/a/real/dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::WorkingDirectory(_)));
        assert!(err.is_access_error());
    }

    #[tokio::test]
    async fn unspawnable_command_is_an_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolSession::open("fa-no-such-binary", &[], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Spawn { .. }));
        assert!(err.is_access_error());
    }

    #[tokio::test]
    async fn server_exit_during_handshake_is_an_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolSession::open("sh", &["-c".to_string(), "exit 0".to_string()], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Handshake(_)));
        assert!(err.is_access_error());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_fake_session(dir.path()).await;
        session.close().await;
        session.close().await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn string_response_ids_are_matched() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ToolSession::open(
            "sh",
            &["-c".to_string(), FAKE_SERVER_STRING_IDS.to_string()],
            dir.path(),
        )
        .await
        .expect("string-id session should open");

        assert_eq!(session.tools().len(), 1);
        let result = session
            .call_tool("read_file", json!({"path": "a.txt"}))
            .await
            .unwrap();
        assert_eq!(result, "ok");

        session.close().await;
    }

    #[test]
    fn response_id_matching_accepts_numbers_and_strings() {
        assert!(id_matches(Some(&json!(7)), 7));
        assert!(id_matches(Some(&json!("7")), 7));
        assert!(!id_matches(Some(&json!(8)), 7));
        assert!(!id_matches(Some(&json!("seven")), 7));
        assert!(!id_matches(Some(&Value::Null), 7));
        assert!(!id_matches(None, 7));
    }

    #[test]
    fn text_content_ignores_non_text_items() {
        let result = json!({
            "content": [
                {"type": "text", "text": "a"},
                {"type": "image", "data": "zzz"},
                {"type": "text", "text": "b"}
            ]
        });
        assert_eq!(collect_text_content(&result), "a\nb");
    }
}
