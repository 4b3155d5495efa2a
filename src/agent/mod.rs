//! Agent module - the conversation loop and its agent definition.
//!
//! Each user input becomes one exchange against the model:
//! 1. Combine the agent's instructions, the session's tool descriptors and
//!    the user text into one request
//! 2. If the model requests tool calls, execute them against the tool
//!    session and feed results back
//! 3. Repeat until the model produces a final textual answer
//!
//! Turns are strictly serialized; the loop holds no history across turns.

mod conversation;
mod prompt;

pub use conversation::{ai_print, run_loop, AgentDefinition, RunSettings, EXIT_SENTINEL};
pub use prompt::default_instructions;
