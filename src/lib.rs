//! # file-assistant
//!
//! A command-line assistant that reads and modifies files in a chosen
//! directory through an AI model.
//!
//! This library provides:
//! - A configuration resolver backed by a persisted `.env` file
//! - A scoped tool-process session wrapping one MCP filesystem server
//! - A strictly sequential conversation loop between the user and the model
//!
//! ## Architecture
//!
//! The assistant follows the "tools in a loop" pattern:
//! 1. Read one line of user input
//! 2. Send it to the model together with the session's tool descriptors
//! 3. Execute any tool calls against the session, feed results back
//! 4. Print the model's final answer and return to step 1
//!
//! Exactly one tool session and one model client exist per run, and at most
//! one exchange is in flight at any time. The loop terminates when the user
//! says `thank you`.

pub mod agent;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod run;
pub mod setup;

pub use config::Config;
