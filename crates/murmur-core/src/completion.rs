//! Chat completion client for OpenAI-compatible endpoints (OpenRouter by default).

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::CompletionError;
use crate::state::{ChatMessage, ChatRole};

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Returned when a successful response has no recognizable text.
pub const FALLBACK_REPLY: &str = "Sorry, I could not generate a response.";

const MISSING_KEY_MESSAGE: &str =
    "Missing OpenRouter API key. Set completion_api_key in config.json or OPENROUTER_API_KEY.";

/// Anything that can turn a conversation history into a reply.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, history: &[ChatMessage]) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
}

/// The fixed system instruction followed by every message in order.
pub fn build_messages(history: &[ChatMessage]) -> Vec<WireMessage> {
    std::iter::once(WireMessage {
        role: ChatRole::System.as_str().to_string(),
        content: SYSTEM_PROMPT.to_string(),
    })
    .chain(history.iter().map(|m| WireMessage {
        role: m.role.as_str().to_string(),
        content: m.content.clone(),
    }))
    .collect()
}

/// Reads `choices[0].message.content`, or the `choices[0].message[0].content`
/// variant some providers return.
pub fn extract_content(response: &Value) -> String {
    let message = &response["choices"][0]["message"];
    message["content"]
        .as_str()
        .or_else(|| message[0]["content"].as_str())
        .unwrap_or(FALLBACK_REPLY)
        .to_string()
}

#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl CompletionClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.base_url(), &config.model(), config.completion_api_key())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(&self, history: &[ChatMessage]) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CompletionError::Configuration(MISSING_KEY_MESSAGE.to_string()))?;

        let request = CompletionRequest {
            model: &self.model,
            messages: build_messages(history),
        };

        tracing::debug!(model = %self.model, messages = request.messages.len(), "Requesting completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "Murmur")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, "Completion endpoint returned an error");
            return Err(CompletionError::Remote { status, body });
        }

        let body: Value = response.json().await?;
        Ok(extract_content(&body))
    }
}
