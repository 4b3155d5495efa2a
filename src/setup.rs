//! Interactive credential setup: collects endpoint details and persists the
//! `.env` configuration file in the current directory.

use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::config::{Config, DEFAULT_API_VERSION};

/// Collect configuration interactively and write `.env`.
///
/// The API key is read without echoing it to the terminal. Only the `azure`
/// platform is currently offered.
pub fn run_setup() -> anyhow::Result<()> {
    let endpoint = prompt("Please provide the endpoint for your model: ")?;
    let api_version = prompt(&format!(
        "Please provide the API version (default: '{DEFAULT_API_VERSION}'): "
    ))?;
    let deployment = prompt("Please provide the name of the deployment: ")?;
    let api_key = rpassword::prompt_password("Please provide your API key: ")?;
    let model_name = prompt("Please provide the model name: ")?;

    let config = Config {
        platform: "azure".to_string(),
        api_version: if api_version.is_empty() {
            DEFAULT_API_VERSION.to_string()
        } else {
            api_version
        },
        api_key,
        endpoint,
        deployment,
        model_name,
    };

    config.write_env_file(Path::new(".env"))?;
    println!("Setup successfully!");
    Ok(())
}

fn prompt(label: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}")?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
