//! Configuration management for file-assistant.
//!
//! Settings are read from the process environment, after loading a `.env`
//! file from the current directory if one exists (written by `fa setup`):
//! - `AI_PLATFORM` - The AI platform identifier. Currently always `azure`.
//! - `AOAI_API_VERSION` - API version string. Defaults to `2024-12-01-preview`.
//! - `AOAI_API_KEY` - The API key (secret; never logged).
//! - `AOAI_ENDPOINT` - Base endpoint URL for the model.
//! - `AOAI_DEPLOYMENT` - Azure deployment name.
//! - `AOAI_MODEL_NAME` - Model name used for requests.
//!
//! Missing values become empty strings rather than load-time errors; a
//! misconfigured endpoint surfaces on the first model call instead.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// API version used when the user does not provide one.
pub const DEFAULT_API_VERSION: &str = "2024-12-01-preview";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to write configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Model endpoint configuration, immutable once loaded.
#[derive(Clone, Default)]
pub struct Config {
    /// AI platform identifier (`azure`)
    pub platform: String,

    /// API version string for the chat-completions endpoint
    pub api_version: String,

    /// API key (secret)
    pub api_key: String,

    /// Base endpoint URL
    pub endpoint: String,

    /// Deployment name
    pub deployment: String,

    /// Model name
    pub model_name: String,
}

// Manual Debug so the API key can never leak into logs or panic output.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("platform", &self.platform)
            .field("api_version", &self.api_version)
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl Config {
    /// Load configuration from the `.env` file (if present) and the process
    /// environment. Total: absent values become empty defaults and any
    /// resulting failure surfaces at first use, not here.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Read configuration from the process environment only.
    pub fn from_env() -> Self {
        Self {
            platform: env_or_empty("AI_PLATFORM"),
            api_version: std::env::var("AOAI_API_VERSION")
                .unwrap_or_else(|_| DEFAULT_API_VERSION.to_string()),
            api_key: env_or_empty("AOAI_API_KEY"),
            endpoint: env_or_empty("AOAI_ENDPOINT"),
            deployment: env_or_empty("AOAI_DEPLOYMENT"),
            model_name: env_or_empty("AOAI_MODEL_NAME"),
        }
    }

    /// Render the flat `KEY=value` representation persisted by `fa setup`.
    pub fn env_file_contents(&self) -> String {
        format!(
            "AI_PLATFORM={}\n\
             AOAI_API_VERSION={}\n\
             AOAI_API_KEY={}\n\
             AOAI_ENDPOINT={}\n\
             AOAI_DEPLOYMENT={}\n\
             AOAI_MODEL_NAME={}\n",
            self.platform,
            self.api_version,
            self.api_key,
            self.endpoint,
            self.deployment,
            self.model_name
        )
    }

    /// Persist the configuration as a `.env` file at `path`.
    pub fn write_env_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.env_file_contents()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn env_or_empty(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> Config {
        Config {
            platform: "azure".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            api_key: "secret-key".to_string(),
            endpoint: "https://example.openai.azure.com".to_string(),
            deployment: "gpt-4o".to_string(),
            model_name: "gpt-4o".to_string(),
        }
    }

    #[test]
    fn env_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        sample().write_env_file(&path).unwrap();

        let parsed: HashMap<String, String> = dotenvy::from_path_iter(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(parsed["AI_PLATFORM"], "azure");
        assert_eq!(parsed["AOAI_API_VERSION"], DEFAULT_API_VERSION);
        assert_eq!(parsed["AOAI_API_KEY"], "secret-key");
        assert_eq!(parsed["AOAI_ENDPOINT"], "https://example.openai.azure.com");
        assert_eq!(parsed["AOAI_DEPLOYMENT"], "gpt-4o");
        assert_eq!(parsed["AOAI_MODEL_NAME"], "gpt-4o");
    }

    #[test]
    fn debug_redacts_api_key() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn write_fails_on_missing_directory() {
        let err = sample()
            .write_env_file(Path::new("/nonexistent/dir/.env"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Write { .. }));
    }
}
