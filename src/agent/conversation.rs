//! Core conversation loop implementation.

use std::io::{BufRead, Write};

use serde_json::Value;

use crate::llm::{ChatClient, ChatMessage, ChatRequest, ToolDef};
use crate::mcp::{McpToolInfo, ToolBackend};

use super::prompt::default_instructions;

/// User input that terminates the loop without a model call.
pub const EXIT_SENTINEL: &str = "thank you";

/// The assistant's identity and instructions, immutable for the run.
pub struct AgentDefinition {
    pub name: String,
    pub instructions: String,
}

impl AgentDefinition {
    /// The file assistant with its stock instructions.
    pub fn assistant() -> Self {
        Self {
            name: "Assistant".to_string(),
            instructions: default_instructions().to_string(),
        }
    }
}

/// Per-run request settings, immutable for the run.
pub struct RunSettings {
    /// Model name sent with every request
    pub model: String,

    /// Sampling temperature
    pub temperature: f64,

    /// Output token cap per request
    pub max_tokens: u32,

    /// Upper bound on tool round-trips within one exchange
    pub max_tool_iterations: usize,
}

impl RunSettings {
    pub fn new(model: String) -> Self {
        Self {
            model,
            temperature: 0.9,
            max_tokens: 1000,
            max_tool_iterations: 10,
        }
    }
}

/// Print a message in the assistant's voice.
pub fn ai_print<W: Write>(out: &mut W, message: &str) -> std::io::Result<()> {
    writeln!(out, "AI response: {message}")
}

/// Run the conversation loop until the exit sentinel or end of input.
///
/// Per turn: read one line, trim it, terminate on the sentinel, otherwise
/// issue exactly one exchange and print the result. Turn N is fully resolved
/// before turn N+1's input is read. Any failure during an exchange
/// propagates out of the loop; there is no per-turn recovery.
pub async fn run_loop<R, W>(
    agent: &AgentDefinition,
    settings: &RunSettings,
    client: &dyn ChatClient,
    session: &mut dyn ToolBackend,
    input: R,
    output: &mut W,
) -> anyhow::Result<()>
where
    R: BufRead,
    W: Write,
{
    writeln!(output, "\n(Say '{EXIT_SENTINEL}' to exit)")?;

    let tool_defs = tool_definitions(session.tools());
    let mut lines = input.lines();

    loop {
        write!(output, "Your message: ")?;
        output.flush()?;

        // End of input terminates the loop like a clean exit. The prompt
        // has already been printed, so finish its line first.
        let Some(line) = lines.next() else {
            writeln!(output)?;
            break;
        };
        let message = line?.trim().to_string();

        if message == EXIT_SENTINEL {
            ai_print(output, "Goodbye!")?;
            break;
        }

        let reply = run_exchange(agent, settings, client, session, &tool_defs, &message).await?;
        ai_print(output, &format!("{reply}\n\n"))?;
    }

    Ok(())
}

/// Convert discovered session tools into chat-completion tool descriptors.
fn tool_definitions(tools: &[McpToolInfo]) -> Vec<ToolDef> {
    tools
        .iter()
        .map(|tool| {
            ToolDef::function(
                tool.name.clone(),
                tool.description.clone(),
                tool.input_schema.clone(),
            )
        })
        .collect()
}

/// One exchange: a single user input resolved to a final textual answer,
/// with zero or more tool round-trips in between.
async fn run_exchange(
    agent: &AgentDefinition,
    settings: &RunSettings,
    client: &dyn ChatClient,
    session: &mut dyn ToolBackend,
    tool_defs: &[ToolDef],
    user_text: &str,
) -> anyhow::Result<String> {
    let mut messages = vec![
        ChatMessage::system(&agent.instructions),
        ChatMessage::user(user_text),
    ];

    for iteration in 0..settings.max_tool_iterations {
        tracing::debug!(iteration, "exchange iteration");

        let request = ChatRequest {
            model: settings.model.clone(),
            messages: messages.clone(),
            tools: (!tool_defs.is_empty()).then(|| tool_defs.to_vec()),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };
        let reply = client.chat_completion(&request).await?;

        if let Some(tool_calls) = &reply.tool_calls {
            if !tool_calls.is_empty() {
                messages.push(reply.clone());

                for call in tool_calls {
                    tracing::debug!(tool = %call.function.name, "executing tool call");
                    let arguments: Value =
                        serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
                    let result = session.call_tool(&call.function.name, arguments).await?;
                    messages.push(ChatMessage::tool_result(&call.id, result));
                }

                continue;
            }
        }

        // No tool calls - this is the final response.
        if let Some(content) = reply.content {
            return Ok(content);
        }

        anyhow::bail!("model returned a reply with no content and no tool calls");
    }

    anyhow::bail!(
        "exchange did not complete within {} tool iterations",
        settings.max_tool_iterations
    )
}
