//! LLM provider implementations.
//!
//! `build_cloud(config, api_key)` is the cloud factory, called at startup.
//! The local server always speaks the Ollama API, see [`ollama`].

pub mod dummy;
pub mod ollama;
pub mod openai_compatible;

use tracing::warn;

use crate::config::CloudConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct the cloud provider, if one can be built.
///
/// `api_key` is sourced from the environment (never TOML). Without a key the
/// cloud client is not configured and `Ok(None)` is returned; the resource
/// manager then serves everything locally. `provider = "dummy"` builds the
/// echo provider for keyless smoke runs.
pub fn build_cloud(
    config: &CloudConfig,
    api_key: Option<String>,
) -> Result<Option<LlmProvider>, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(Some(LlmProvider::Dummy(dummy::DummyProvider))),
        "openai" | "openai-compatible" | "openrouter" => {
            let Some(key) = api_key.filter(|k| !k.trim().is_empty()) else {
                warn!(provider = %config.provider, "no cloud API key set, cloud backend disabled");
                return Ok(None);
            };
            let p = openai_compatible::OpenAiCompatibleProvider::new(config, key)?;
            Ok(Some(LlmProvider::OpenAiCompatible(p)))
        }
        other => Err(ProviderError::UnknownBackend(other.to_string())),
    }
}
