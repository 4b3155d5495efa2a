//! Azure OpenAI chat-completions client.

use serde::Deserialize;

use crate::config::Config;

use super::{ChatClient, ChatMessage, ChatRequest, LlmError};

use async_trait::async_trait;

/// Client for an Azure OpenAI chat-completions deployment.
///
/// Construction is pure: no network traffic and no credential validation
/// happen here. Missing or wrong credentials surface on the first request.
pub struct AzureChatClient {
    http: reqwest::Client,
    endpoint: String,
    deployment: String,
    api_version: String,
    api_key: String,
}

impl AzureChatClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            deployment: config.deployment.clone(),
            api_version: config.api_version.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn request_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

#[async_trait]
impl ChatClient for AzureChatClient {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        tracing::debug!(model = %request.model, messages = request.messages.len(), "sending chat completion request");

        let response = self
            .http
            .post(self.request_url())
            .header("api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Endpoint { status, body });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}
