//! HTTP completion client.
//!
//! Speaks the OpenAI-compatible chat endpoint and the Ollama native
//! endpoint; both return plain text which is classified into an
//! `Action` here. No retries at this layer — the agent loop owns retry
//! policy.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use autoquery_core::config::{LlmConfig, LlmProvider};
use autoquery_core::{Action, CompletionClient, CompletionError, PromptContext};

use crate::actions::parse_action;
use crate::prompt::build_messages;

const COMPLETION_TEMPERATURE: f64 = 0.1;
const ERROR_BODY_PREVIEW: usize = 500;

pub struct HttpCompletionClient {
    client: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl HttpCompletionClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| CompletionError::Unavailable(error.to_string()))?;

        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, LlmProvider::OpenAi) => "https://api.openai.com".to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434".to_string(),
        };

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn request_text(&self, context: &PromptContext<'_>) -> Result<String, CompletionError> {
        let messages = build_messages(context);

        let (url, body) = match self.provider {
            LlmProvider::OpenAi => (
                format!("{}/v1/chat/completions", self.base_url),
                json!({
                    "model": self.model,
                    "messages": messages,
                    "temperature": COMPLETION_TEMPERATURE,
                }),
            ),
            LlmProvider::Ollama => (
                format!("{}/api/chat", self.base_url),
                json!({
                    "model": self.model,
                    "messages": messages,
                    "stream": false,
                    "options": { "temperature": COMPLETION_TEMPERATURE },
                }),
            ),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| CompletionError::Unavailable(error.to_string()))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|error| CompletionError::Unavailable(error.to_string()))?;

        if !status.is_success() {
            let mut body = payload;
            body.truncate(ERROR_BODY_PREVIEW);
            return Err(CompletionError::Status { status: status.as_u16(), body });
        }

        extract_content(self.provider, &payload)
    }
}

fn extract_content(provider: LlmProvider, payload: &str) -> Result<String, CompletionError> {
    match provider {
        LlmProvider::OpenAi => {
            let parsed: OpenAiResponse = serde_json::from_str(payload)
                .map_err(|error| CompletionError::Decode(error.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content)
                .ok_or_else(|| CompletionError::Decode("response contained no choices".to_string()))
        }
        LlmProvider::Ollama => {
            let parsed: OllamaResponse = serde_json::from_str(payload)
                .map_err(|error| CompletionError::Decode(error.to_string()))?;
            Ok(parsed.message.content)
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn propose(&self, context: &PromptContext<'_>) -> Result<Action, CompletionError> {
        let text = self.request_text(context).await?;
        debug!(
            event_name = "llm.completion_received",
            chars = text.len(),
            "completion response received"
        );
        Ok(parse_action(&text))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}
