//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Serves the cloud side of the resource manager: OpenRouter, OpenAI, or any
//! hosted endpoint speaking the same wire format. All wire types are private
//! to this module. The provider is stateless; history is passed in per call.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::config::CloudConfig;
use crate::llm::{ChatMessage, ProviderError};

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Constructed once at startup, then cheaply cloned because
/// `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    text_model: String,
    vision_model: String,
    temperature: f32,
    max_tokens: u32,
    vision_max_tokens: u32,
    api_key: String,
    referer: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and the API key (sent as
    /// `Authorization: Bearer <key>` on every request).
    pub fn new(config: &CloudConfig, api_key: String) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            text_model: config.text_model.clone(),
            vision_model: config.vision_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            vision_max_tokens: config.vision_max_tokens,
            api_key,
            referer: config.referer.clone(),
        })
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    pub fn vision_model(&self) -> &str {
        &self.vision_model
    }

    /// Chat completion with the text model over a full message list.
    ///
    /// `max_tokens` of `0` means "use the configured default".
    pub async fn chat(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String, ProviderError> {
        let messages = messages
            .iter()
            .map(|m| Message {
                role: m.role.as_str().to_string(),
                content: Content::Text(m.content.clone()),
            })
            .collect();
        let max_tokens = if max_tokens == 0 { self.max_tokens } else { max_tokens };
        self.send(&self.text_model, messages, max_tokens).await
    }

    /// One user turn carrying `prompt` and a base64 JPEG as a data URL part.
    pub async fn vision(&self, prompt: &str, image_b64: &str) -> Result<String, ProviderError> {
        let messages = vec![Message {
            role: "user".to_string(),
            content: Content::Parts(vec![
                ContentPart::Text { text: prompt.to_string() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: format!("data:image/jpeg;base64,{image_b64}") },
                },
            ]),
        }];
        self.send(&self.vision_model, messages, self.vision_max_tokens).await
    }

    async fn send(&self, model: &str, messages: Vec<Message>, max_tokens: u32) -> Result<String, ProviderError> {
        // Some models (gpt-5 family) do not accept a temperature parameter.
        let temperature = if model.starts_with("gpt-5") {
            None
        } else {
            Some(self.temperature)
        };

        let payload = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            temperature,
            max_tokens,
        };

        debug!(
            model = %payload.model,
            temperature = ?payload.temperature,
            messages = payload.messages.len(),
            max_tokens,
            "sending cloud completion request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full cloud request payload");
        }

        let mut req = self
            .client
            .post(&self.api_base_url)
            .bearer_auth(&self.api_key)
            .json(&payload);
        if let Some(referer) = &self.referer {
            req = req.header(reqwest::header::REFERER, referer);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "cloud HTTP request failed (transport)");
            ProviderError::from_transport(e)
        })?;

        let response = check_status(response).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize cloud response");
            ProviderError::Response(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received cloud response");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Response("empty or missing content in response".into()))
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Content,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a permanent error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let detail = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("{}{code}", env.error.message)
    } else {
        body.chars().take(200).collect()
    };

    let message = match status.as_u16() {
        401 => format!("invalid API key: {detail}"),
        429 => format!("rate limit exceeded: {detail}"),
        _ => detail,
    };

    error!(%status, %message, "cloud request returned HTTP error");
    Err(ProviderError::Permanent { status: status.as_u16(), message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    use axum::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    fn provider(url: String) -> OpenAiCompatibleProvider {
        let config = CloudConfig {
            api_base_url: url,
            ..CloudConfig::test_default()
        };
        OpenAiCompatibleProvider::new(&config, "sk-test".into()).unwrap()
    }

    #[tokio::test]
    async fn chat_sends_history_and_bearer() {
        let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::default();
        let s = seen.clone();
        let app = axum::Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let s = s.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    s.lock().unwrap().push((auth, body));
                    Json(json!({ "choices": [{ "message": { "content": "  hi there \n" } }] }))
                }
            }),
        );
        let addr = testutil::spawn_server(app).await;
        let p = provider(format!("http://{addr}/v1/chat/completions"));

        let out = p
            .chat(&[ChatMessage::system("sys"), ChatMessage::user("hello")], 0)
            .await
            .unwrap();
        assert_eq!(out, "hi there");

        let seen = seen.lock().unwrap();
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(body["model"], "test-text-model");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[tokio::test]
    async fn vision_embeds_data_url() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::default();
        let s = seen.clone();
        let app = axum::Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<Value>| {
                let s = s.clone();
                async move {
                    *s.lock().unwrap() = Some(body);
                    Json(json!({ "choices": [{ "message": { "content": "a cat" } }] }))
                }
            }),
        );
        let addr = testutil::spawn_server(app).await;
        let p = provider(format!("http://{addr}/v1/chat/completions"));

        assert_eq!(p.vision("what is this", "QUJD").await.unwrap(), "a cat");

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "test-vision-model");
        let parts = &body["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "what is this");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    }

    #[tokio::test]
    async fn unauthorized_is_permanent() {
        let app = axum::Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": { "message": "No auth credentials found", "code": 401 } })),
                )
            }),
        );
        let addr = testutil::spawn_server(app).await;
        let p = provider(format!("http://{addr}/v1/chat/completions"));

        let err = p.chat(&[ChatMessage::user("hi")], 0).await.unwrap_err();
        match err {
            ProviderError::Permanent { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("invalid API key"));
                assert!(message.contains("No auth credentials found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_content_is_malformed() {
        let app = axum::Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({ "choices": [] })) }),
        );
        let addr = testutil::spawn_server(app).await;
        let p = provider(format!("http://{addr}/v1/chat/completions"));

        let err = p.chat(&[ChatMessage::user("hi")], 0).await.unwrap_err();
        assert!(matches!(err, ProviderError::Response(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        let addr = testutil::closed_addr();
        let p = provider(format!("http://{addr}/v1/chat/completions"));
        let err = p.chat(&[ChatMessage::user("hi")], 0).await.unwrap_err();
        assert!(err.is_transient(), "expected transient, got {err}");
    }
}
