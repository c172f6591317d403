//! Dummy LLM provider: echoes the last user message back prefixed with `[echo]`.
//! Used for exercising the full routing path without an API key.

use crate::llm::{ChatMessage, ChatRole, ProviderError};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(format!("[echo] {last}"))
    }

    pub async fn vision(&self, prompt: &str, image_b64: &str) -> Result<String, ProviderError> {
        Ok(format!("[echo] {prompt} ({} base64 chars)", image_b64.len()))
    }
}
