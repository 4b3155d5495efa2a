//! The `start` flow: wire configuration, model client, tool session and
//! conversation loop together.
//!
//! The tool session is a scoped acquisition: it is closed on every exit path
//! out of the loop, including errors, before the result propagates to the
//! top-level error classification in `main`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::agent::{run_loop, AgentDefinition, RunSettings};
use crate::config::Config;
use crate::llm::{AzureChatClient, ChatClient};
use crate::mcp::ToolSession;

/// Launcher for the filesystem tool server.
pub const TOOL_PROCESS_COMMAND: &str = "npx";

/// Arguments ahead of the working directory argument.
pub const TOOL_PROCESS_ARGS: &[&str] = &["-y", "@modelcontextprotocol/server-filesystem"];

/// Run the assistant until the exit sentinel or a failure.
///
/// Exactly one model client and one tool session exist for the whole run.
pub async fn start() -> anyhow::Result<()> {
    let config = Config::load();
    tracing::info!(model = %config.model_name, "loaded configuration");

    let client = AzureChatClient::new(&config);
    let settings = RunSettings::new(config.model_name.clone());
    let agent = AgentDefinition::assistant();

    let working_dir = prompt_working_directory()?;

    let args: Vec<String> = TOOL_PROCESS_ARGS.iter().map(|s| s.to_string()).collect();
    let mut session = ToolSession::open(TOOL_PROCESS_COMMAND, &args, &working_dir).await?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    run_with_session(
        &agent,
        &settings,
        &client,
        &mut session,
        stdin.lock(),
        &mut stdout,
    )
    .await
}

/// Run the conversation loop and close the session, whatever the outcome.
///
/// The session is closed exactly once per call, on the success, sentinel and
/// error paths alike; only then does the loop's result propagate.
async fn run_with_session<R, W>(
    agent: &AgentDefinition,
    settings: &RunSettings,
    client: &dyn ChatClient,
    session: &mut ToolSession,
    input: R,
    output: &mut W,
) -> anyhow::Result<()>
where
    R: BufRead,
    W: Write,
{
    let result = run_loop(agent, settings, client, session, input, output).await;
    session.close().await;
    result
}

fn prompt_working_directory() -> io::Result<PathBuf> {
    let mut stdout = io::stdout();
    write!(stdout, "Please specify the working directory: ")?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let working_dir = PathBuf::from(line.trim());
    writeln!(stdout, "Working directory set to: '{}'", working_dir.display())?;
    Ok(working_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatRequest, LlmError, Role};
    use async_trait::async_trait;
    use std::path::Path;

    // Scripted MCP server answering the handshake, so a real ToolSession can
    // be opened without npx.
    const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'
      ;;
    *'"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}'
      ;;
  esac
done
"#;

    async fn open_fake_session(dir: &Path) -> ToolSession {
        ToolSession::open("sh", &["-c".to_string(), FAKE_SERVER.to_string()], dir)
            .await
            .expect("fake session should open")
    }

    /// Model client that fails every request.
    struct FailingClient;

    #[async_trait]
    impl ChatClient for FailingClient {
        async fn chat_completion(&self, _request: &ChatRequest) -> Result<ChatMessage, LlmError> {
            Err(LlmError::EmptyResponse)
        }
    }

    /// Model client that answers every request with the same text.
    struct EchoClient;

    #[async_trait]
    impl ChatClient for EchoClient {
        async fn chat_completion(&self, _request: &ChatRequest) -> Result<ChatMessage, LlmError> {
            Ok(ChatMessage {
                role: Role::Assistant,
                content: Some("done".to_string()),
                tool_calls: None,
                tool_call_id: None,
            })
        }
    }

    #[tokio::test]
    async fn session_is_closed_after_an_exchange_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_fake_session(dir.path()).await;
        let mut output = Vec::new();

        let result = run_with_session(
            &AgentDefinition::assistant(),
            &RunSettings::new("gpt-4o".to_string()),
            &FailingClient,
            &mut session,
            "hello\n".as_bytes(),
            &mut output,
        )
        .await;

        assert!(result.is_err());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn session_is_closed_after_sentinel_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_fake_session(dir.path()).await;
        let mut output = Vec::new();

        run_with_session(
            &AgentDefinition::assistant(),
            &RunSettings::new("gpt-4o".to_string()),
            &EchoClient,
            &mut session,
            "hello\nthank you\n".as_bytes(),
            &mut output,
        )
        .await
        .unwrap();

        assert!(session.is_closed());
        let rendered = String::from_utf8(output).unwrap();
        assert!(rendered.contains("AI response: Goodbye!"));
    }

    #[tokio::test]
    async fn session_is_closed_after_end_of_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_fake_session(dir.path()).await;
        let mut output = Vec::new();

        run_with_session(
            &AgentDefinition::assistant(),
            &RunSettings::new("gpt-4o".to_string()),
            &EchoClient,
            &mut session,
            "".as_bytes(),
            &mut output,
        )
        .await
        .unwrap();

        assert!(session.is_closed());
    }
}
