//! file-assistant - CLI entry point.
//!
//! Two subcommands: `setup` writes the persisted configuration, `start` runs
//! the conversation loop. All errors are classified once, here, and turn
//! into a single user-facing message plus exit status 2.

use std::io;

use clap::{Parser, Subcommand};
use file_assistant::agent::ai_print;
use file_assistant::mcp::{npx_available, McpError};
use file_assistant::{run, setup};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "fa",
    about = "Read and modify your files with the help of an AI assistant."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Setup program variables
    Setup,
    /// Start the program
    Start,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "file_assistant=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Setup => setup::run_setup()?,
        Commands::Start => {
            // The tool-process launcher must exist before any model or
            // session setup happens.
            if !npx_available().await {
                eprintln!("npx is not installed. Please install it with `npm install -g npx`.");
                std::process::exit(2);
            }

            if let Err(error) = run::start().await {
                report_failure(&error);
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

/// Classify a run failure into one user-facing message.
fn report_failure(error: &anyhow::Error) {
    let mut stdout = io::stdout();
    let message = match error.downcast_ref::<McpError>() {
        Some(e) if e.is_access_error() => {
            tracing::debug!("tool access failure: {e}");
            "I cannot access the specified directory. Please check and try again.".to_string()
        }
        _ => format!("An error occurred, please try again. Error: {error}"),
    };
    ai_print(&mut stdout, &message).ok();
}
