//! Language model client for an Ollama-compatible `/api/chat` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parley_chat::{ModelClient, ModelError};
use parley_core::config::ModelConfig;
use parley_core::types::ContextMessage;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Non-streaming chat completion against a local model server.
pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::Unavailable(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            url: chat_url(&config.endpoint),
            model: config.name.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn chat_url(endpoint: &str) -> String {
    format!("{}/api/chat", endpoint.trim_end_matches('/'))
}

fn build_request<'a>(model: &'a str, messages: &'a [ContextMessage]) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
        stream: false,
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn complete(&self, messages: &[ContextMessage]) -> Result<String, ModelError> {
        let request = build_request(&self.model, messages);
        tracing::debug!(model = %self.model, messages = messages.len(), "Requesting completion");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Unavailable(format!("HTTP {status}: {body}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::BadResponse(e.to_string()))?;
        Ok(body.message.content)
    }
}
