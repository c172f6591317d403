//! LLM provider abstraction.
//!
//! Two kinds of inference endpoint sit behind the resource manager:
//!
//! * the **local** server ([`providers::ollama::OllamaProvider`]): one GPU,
//!   one resident model, explicit load / evict;
//! * the **cloud** endpoint ([`LlmProvider`]): OpenAI-compatible, no
//!   residency constraint.
//!
//! `LlmProvider` is an enum over concrete cloud implementations. Enum
//! dispatch avoids `dyn` trait objects; adding a backend = new module + new
//! variant + new match arms.

pub mod providers;
pub mod retry;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown backend mode: {0}")]
    UnknownBackend(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    /// Connection refused or timed out. The only retryable class.
    #[error("transient network error: {0}")]
    Transient(String),
    /// Non-retryable transport failure (TLS, redirect loop, body read…).
    #[error("request failed: {0}")]
    Request(String),
    /// The endpoint answered with an error status (auth, bad request, rate limit…).
    #[error("request rejected (HTTP {status}): {message}")]
    Permanent { status: u16, message: String },
    /// Transient failures exhausted the retry budget.
    #[error("{backend} backend unavailable after {attempts} attempts: {reason}")]
    Unavailable {
        backend: Backend,
        attempts: u32,
        reason: String,
    },
    #[error("malformed response: {0}")]
    Response(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify a reqwest transport error.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            ProviderError::Transient(e.to_string())
        } else {
            ProviderError::Request(e.to_string())
        }
    }
}

// ── Backends ──────────────────────────────────────────────────────────────────

/// A concrete inference provider a single call was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Local,
    Cloud,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Local => f.write_str("local"),
            Backend::Cloud => f.write_str("cloud"),
        }
    }
}

/// Configured backend selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Local,
    Cloud,
    /// Cloud while online, local otherwise. Resolved on every call.
    Auto,
}

impl FromStr for BackendMode {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "ollama" => Ok(BackendMode::Local),
            "cloud" | "openrouter" => Ok(BackendMode::Cloud),
            "auto" | "automatic" => Ok(BackendMode::Auto),
            other => Err(ProviderError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Local => f.write_str("local"),
            BackendMode::Cloud => f.write_str("cloud"),
            BackendMode::Auto => f.write_str("auto"),
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One provider-neutral chat message. Providers map it onto their wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

// ── Cloud provider enum ───────────────────────────────────────────────────────

/// Cloud (unconstrained) completion backends.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// Chat completion over a full message list.
    pub async fn chat(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.chat(messages).await,
            LlmProvider::OpenAiCompatible(p) => p.chat(messages, max_tokens).await,
        }
    }

    /// Single-turn multimodal request: `prompt` plus one base64 JPEG.
    pub async fn vision(&self, prompt: &str, image_b64: &str) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.vision(prompt, image_b64).await,
            LlmProvider::OpenAiCompatible(p) => p.vision(prompt, image_b64).await,
        }
    }

    pub fn text_model(&self) -> &str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(p) => p.text_model(),
        }
    }

    pub fn vision_model(&self) -> &str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(p) => p.vision_model(),
        }
    }
}
