//! Client for the local Ollama server (native API, not OpenAI-compatible).
//!
//! Three endpoints are used: `/api/chat` for completions (text and vision),
//! `/api/generate` with `keep_alive: 0` to evict a model from VRAM, and
//! `/api/tags` to list pulled models for health checks. Which model is
//! resident is tracked by the resource manager, not here.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::config::OllamaConfig;
use crate::llm::{ChatMessage, ProviderError};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    temperature: f32,
    unload_timeout: Duration,
}

impl OllamaProvider {
    pub fn new(config: &OllamaConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            unload_timeout: Duration::from_secs(config.unload_timeout_seconds),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Non-streaming chat with `model`. Loading the model is implicit: the
    /// server pulls it into VRAM on first use.
    pub async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let messages = messages
            .iter()
            .map(|m| Message {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                images: None,
            })
            .collect();
        self.send(model, messages).await
    }

    /// Single user turn with one base64 image attached.
    pub async fn vision(&self, model: &str, prompt: &str, image_b64: &str) -> Result<String, ProviderError> {
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
            images: Some(vec![image_b64.to_string()]),
        }];
        self.send(model, messages).await
    }

    /// Ask the server to drop `model` from VRAM immediately.
    pub async fn unload(&self, model: &str) -> Result<(), ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(%model, "requesting model unload");

        let response = self
            .client
            .post(&url)
            .timeout(self.unload_timeout)
            .json(&UnloadRequest { model, keep_alive: 0 })
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Permanent {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }
        Ok(())
    }

    /// Names of all pulled models, tags included (`gemma3:latest`).
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Permanent {
                status: status.as_u16(),
                message: format!("GET {url} failed"),
            });
        }

        let tags = response
            .json::<TagsResponse>()
            .await
            .map_err(|e| ProviderError::Response(format!("failed to parse /api/tags: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn send(&self, model: &str, messages: Vec<Message>) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let payload = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            options: Options { temperature: self.temperature },
        };

        debug!(%model, messages = payload.messages.len(), "sending local chat request");
        if tracing::enabled!(tracing::Level::TRACE) {
            // Image payloads are large; log only their count.
            let images: usize = payload
                .messages
                .iter()
                .map(|m| m.images.as_ref().map_or(0, Vec::len))
                .sum();
            let last = payload.messages.last().map(|m| m.content.as_str()).unwrap_or_default();
            trace!(images, last = %last, "local chat payload");
        }

        let response = self.client.post(&url).json(&payload).send().await.map_err(|e| {
            error!(%url, error = %e, "local HTTP request failed (transport)");
            ProviderError::from_transport(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            error!(%status, %message, "local chat returned HTTP error");
            return Err(ProviderError::Permanent { status: status.as_u16(), message });
        }

        let parsed = response.json::<ChatResponse>().await.map_err(|e| {
            ProviderError::Response(format!("failed to parse /api/chat body: {e}"))
        })?;

        let content = parsed.message.content.trim().to_string();
        if content.is_empty() {
            return Err(ProviderError::Response("empty message content".into()));
        }
        Ok(content)
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct UnloadRequest<'a> {
    model: &'a str,
    keep_alive: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}
