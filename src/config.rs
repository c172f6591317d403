//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! deep-merges the optional user overlay at `~/.config/murmur/config.toml`,
//! then applies `MURMUR_WORK_DIR`, `MURMUR_LOG_LEVEL` and `MURMUR_BACKEND`.
//! The cloud API key only ever comes from the environment
//! (`CLOUD_API_KEY`, falling back to `OPENROUTER_API_KEY`).

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;
use crate::llm::retry::RetryPolicy;
use crate::llm::{BackendMode, ProviderError};

/// Local inference server (`[ollama]`).
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub temperature: f32,
    /// Per-request HTTP timeout for chat calls.
    pub timeout_seconds: u64,
    /// Timeout for the `keep_alive: 0` eviction request.
    pub unload_timeout_seconds: u64,
    /// Unload the resident model after this long without use. `0` disables.
    pub idle_unload_seconds: u64,
}

impl OllamaConfig {
    pub fn idle_unload(&self) -> Option<Duration> {
        (self.idle_unload_seconds > 0).then(|| Duration::from_secs(self.idle_unload_seconds))
    }
}

/// Cloud completion endpoint (`[cloud]`).
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// `"openrouter"`, `"openai"`, `"openai-compatible"` or `"dummy"`.
    pub provider: String,
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub text_model: String,
    pub vision_model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    pub max_tokens: u32,
    pub vision_max_tokens: u32,
    pub timeout_seconds: u64,
    /// Sent as `HTTP-Referer`; OpenRouter uses it for attribution.
    pub referer: Option<String>,
}

/// Connectivity probe (`[connectivity]`).
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    pub check_url: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
}

/// Backoff parameters for load and completion calls (`[retry]`).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy<ProviderError> {
        RetryPolicy::transient(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Bounded,
    Persistent,
}

/// Conversation memory (`[memory]`).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub kind: MemoryKind,
    /// Bounded variant: hard cap on retained turns.
    pub max_messages: usize,
    /// Persistent variant: estimated-token budget.
    pub token_budget: usize,
    /// Fraction of the budget that triggers summarization.
    pub summarize_threshold: f32,
    /// Turns reloaded from storage on startup.
    pub restore_messages: usize,
    /// SQLite file (already expanded; relative paths resolve against `work_dir`).
    pub db_path: PathBuf,
    /// Daily session ids are `"{prefix}-{YYYY-MM-DD}"`.
    pub session_prefix: String,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub assistant_name: String,
    /// Working directory for all persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    /// Raw `[backend] mode` string; parsed by [`Config::backend_mode`].
    pub backend: String,
    pub ollama: OllamaConfig,
    pub cloud: CloudConfig,
    pub connectivity: ConnectivityConfig,
    pub retry: RetryConfig,
    pub memory: MemoryConfig,
    /// Cloud API key from the environment. Never sourced from TOML.
    pub cloud_api_key: Option<String>,
}

impl Config {
    pub fn backend_mode(&self) -> Result<BackendMode, ProviderError> {
        self.backend.parse()
    }

    /// Human-readable problems with the resolved config. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        match self.backend_mode() {
            Err(_) => problems.push(format!(
                "invalid backend mode '{}', must be one of local, cloud, auto",
                self.backend
            )),
            Ok(BackendMode::Cloud) if self.cloud.provider != "dummy" && !self.has_cloud_key() => {
                problems.push("cloud API key required when backend mode is 'cloud' (set CLOUD_API_KEY)".into())
            }
            Ok(_) => {}
        }

        let t = self.memory.summarize_threshold;
        if !(t > 0.0 && t <= 1.0) {
            problems.push(format!("memory.summarize_threshold must be in (0, 1], got {t}"));
        }
        if self.memory.kind == MemoryKind::Persistent && self.memory.token_budget == 0 {
            problems.push("memory.token_budget must be greater than zero".into());
        }
        if self.ollama.base_url.trim().is_empty() {
            problems.push("ollama.base_url must not be empty".into());
        }
        if self.connectivity.interval_seconds == 0 {
            problems.push("connectivity.interval_seconds must be greater than zero".into());
        }

        problems
    }

    fn has_cloud_key(&self) -> bool {
        self.cloud_api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Values taken from the process environment. Tests build this directly
/// instead of mutating env vars.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub backend: Option<String>,
    pub cloud_api_key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            work_dir: env::var("MURMUR_WORK_DIR").ok(),
            log_level: env::var("MURMUR_LOG_LEVEL").ok(),
            backend: env::var("MURMUR_BACKEND").ok(),
            cloud_api_key: env::var("CLOUD_API_KEY")
                .or_else(|_| env::var("OPENROUTER_API_KEY"))
                .ok(),
        }
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    assistant: RawAssistant,
    #[serde(default)]
    backend: RawBackend,
    #[serde(default)]
    ollama: RawOllama,
    #[serde(default)]
    cloud: RawCloud,
    #[serde(default)]
    connectivity: RawConnectivity,
    #[serde(default)]
    retry: RawRetry,
    #[serde(default)]
    memory: RawMemory,
}

#[derive(Deserialize)]
struct RawAssistant {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_work_dir")]
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

impl Default for RawAssistant {
    fn default() -> Self {
        Self {
            name: default_name(),
            work_dir: default_work_dir(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

#[derive(Deserialize)]
struct RawBackend {
    #[serde(default = "default_backend_mode")]
    mode: String,
}

impl Default for RawBackend {
    fn default() -> Self {
        Self { mode: default_backend_mode() }
    }
}

#[derive(Deserialize)]
struct RawOllama {
    #[serde(default = "default_ollama_base_url")]
    base_url: String,
    #[serde(default = "default_ollama_text_model")]
    text_model: String,
    #[serde(default = "default_ollama_vision_model")]
    vision_model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_ollama_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_unload_timeout_seconds")]
    unload_timeout_seconds: u64,
    #[serde(default)]
    idle_unload_seconds: u64,
}

impl Default for RawOllama {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            text_model: default_ollama_text_model(),
            vision_model: default_ollama_vision_model(),
            temperature: default_temperature(),
            timeout_seconds: default_ollama_timeout_seconds(),
            unload_timeout_seconds: default_unload_timeout_seconds(),
            idle_unload_seconds: 0,
        }
    }
}

#[derive(Deserialize)]
struct RawCloud {
    #[serde(default = "default_cloud_provider")]
    provider: String,
    #[serde(default = "default_cloud_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_cloud_text_model")]
    text_model: String,
    #[serde(default = "default_cloud_vision_model")]
    vision_model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_vision_max_tokens")]
    vision_max_tokens: u32,
    #[serde(default = "default_cloud_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    referer: Option<String>,
}

impl Default for RawCloud {
    fn default() -> Self {
        Self {
            provider: default_cloud_provider(),
            api_base_url: default_cloud_api_base_url(),
            text_model: default_cloud_text_model(),
            vision_model: default_cloud_vision_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            vision_max_tokens: default_vision_max_tokens(),
            timeout_seconds: default_cloud_timeout_seconds(),
            referer: None,
        }
    }
}

#[derive(Deserialize)]
struct RawConnectivity {
    #[serde(default = "default_check_url")]
    check_url: String,
    #[serde(default = "default_check_interval_seconds")]
    interval_seconds: u64,
    #[serde(default = "default_check_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawConnectivity {
    fn default() -> Self {
        Self {
            check_url: default_check_url(),
            interval_seconds: default_check_interval_seconds(),
            timeout_seconds: default_check_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawRetry {
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    max_delay_ms: u64,
}

impl Default for RawRetry {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Deserialize)]
struct RawMemory {
    #[serde(default = "default_memory_kind")]
    kind: MemoryKind,
    #[serde(default = "default_max_messages")]
    max_messages: usize,
    #[serde(default = "default_token_budget")]
    token_budget: usize,
    #[serde(default = "default_summarize_threshold")]
    summarize_threshold: f32,
    #[serde(default = "default_restore_messages")]
    restore_messages: usize,
    #[serde(default = "default_db_path")]
    db_path: String,
    #[serde(default = "default_session_prefix")]
    session_prefix: String,
}

impl Default for RawMemory {
    fn default() -> Self {
        Self {
            kind: default_memory_kind(),
            max_messages: default_max_messages(),
            token_budget: default_token_budget(),
            summarize_threshold: default_summarize_threshold(),
            restore_messages: default_restore_messages(),
            db_path: default_db_path(),
            session_prefix: default_session_prefix(),
        }
    }
}

fn default_name() -> String { "murmur".to_string() }
fn default_work_dir() -> String { "~/.murmur".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_backend_mode() -> String { "local".to_string() }
fn default_ollama_base_url() -> String { "http://localhost:11434".to_string() }
fn default_ollama_text_model() -> String { "gemma3".to_string() }
fn default_ollama_vision_model() -> String { "moondream".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_ollama_timeout_seconds() -> u64 { 120 }
fn default_unload_timeout_seconds() -> u64 { 10 }
fn default_cloud_provider() -> String { "openrouter".to_string() }
fn default_cloud_api_base_url() -> String { "https://openrouter.ai/api/v1/chat/completions".to_string() }
fn default_cloud_text_model() -> String { "meta-llama/llama-3.3-70b-instruct:free".to_string() }
fn default_cloud_vision_model() -> String { "nvidia/nemotron-nano-12b-v2-vl:free".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_vision_max_tokens() -> u32 { 512 }
fn default_cloud_timeout_seconds() -> u64 { 60 }
fn default_check_url() -> String { "https://openrouter.ai".to_string() }
fn default_check_interval_seconds() -> u64 { 300 }
fn default_check_timeout_seconds() -> u64 { 3 }
fn default_max_retries() -> u32 { 2 }
fn default_base_delay_ms() -> u64 { 1_000 }
fn default_max_delay_ms() -> u64 { 10_000 }
fn default_memory_kind() -> MemoryKind { MemoryKind::Persistent }
fn default_max_messages() -> usize { 50 }
fn default_token_budget() -> usize { 4_000 }
fn default_summarize_threshold() -> f32 { 0.8 }
fn default_restore_messages() -> usize { 100 }
fn default_db_path() -> String { "history.db".to_string() }
fn default_session_prefix() -> String { "session".to_string() }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Deep-merge two TOML values.
/// Tables are merged recursively; for every other type the overlay value
/// replaces the base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

fn read_toml(path: &Path) -> Result<toml::Value, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))
}

/// `~/.config/murmur/config.toml`, if the platform has a config dir.
pub fn user_overlay_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("murmur").join("config.toml"))
}

/// Load config from `config_path` (default `config/default.toml`) plus the
/// user overlay, then apply env-var overrides.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overlay = user_overlay_path().filter(|p| p.exists());
    load_from(
        Path::new(config_path.unwrap_or("config/default.toml")),
        overlay.as_deref(),
        &EnvOverrides::from_env(),
    )
}

/// Internal loader: explicit base path, optional overlay, explicit overrides.
pub fn load_from(
    path: &Path,
    overlay: Option<&Path>,
    overrides: &EnvOverrides,
) -> Result<Config, AppError> {
    let mut value = read_toml(path)?;
    if let Some(overlay) = overlay {
        value = merge_toml(value, read_toml(overlay)?);
    }

    let parsed: RawConfig = value
        .try_into()
        .map_err(|e| AppError::Config(format!("invalid config in {}: {e}", path.display())))?;

    Ok(resolve(parsed, overrides))
}

fn resolve(parsed: RawConfig, overrides: &EnvOverrides) -> Config {
    let a = parsed.assistant;

    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&a.work_dir));
    let log_level = overrides.log_level.clone().unwrap_or(a.log_level);
    let backend = overrides.backend.clone().unwrap_or(parsed.backend.mode);
    let under_work_dir = |p: &str| {
        let path = expand_home(p);
        if path.is_absolute() { path } else { work_dir.join(path) }
    };
    let log_file = a.log_file.as_deref().map(under_work_dir);
    let db_path = under_work_dir(&parsed.memory.db_path);

    let o = parsed.ollama;
    let c = parsed.cloud;
    let n = parsed.connectivity;
    let r = parsed.retry;
    let m = parsed.memory;

    Config {
        assistant_name: a.name,
        log_level,
        log_file,
        backend,
        ollama: OllamaConfig {
            base_url: o.base_url.trim_end_matches('/').to_string(),
            text_model: o.text_model,
            vision_model: o.vision_model,
            temperature: o.temperature,
            timeout_seconds: o.timeout_seconds,
            unload_timeout_seconds: o.unload_timeout_seconds,
            idle_unload_seconds: o.idle_unload_seconds,
        },
        cloud: CloudConfig {
            provider: c.provider,
            api_base_url: c.api_base_url,
            text_model: c.text_model,
            vision_model: c.vision_model,
            temperature: c.temperature,
            max_tokens: c.max_tokens,
            vision_max_tokens: c.vision_max_tokens,
            timeout_seconds: c.timeout_seconds,
            referer: c.referer,
        },
        connectivity: ConnectivityConfig {
            check_url: n.check_url,
            interval_seconds: n.interval_seconds,
            timeout_seconds: n.timeout_seconds,
        },
        retry: RetryConfig {
            max_retries: r.max_retries,
            base_delay_ms: r.base_delay_ms,
            max_delay_ms: r.max_delay_ms,
        },
        memory: MemoryConfig {
            kind: m.kind,
            max_messages: m.max_messages,
            token_budget: m.token_budget,
            summarize_threshold: m.summarize_threshold,
            restore_messages: m.restore_messages,
            db_path,
            session_prefix: m.session_prefix,
        },
        cloud_api_key: overrides.cloud_api_key.clone(),
        work_dir,
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

#[cfg(test)]
impl CloudConfig {
    pub fn test_default() -> Self {
        Self {
            provider: "openai".into(),
            api_base_url: "http://localhost:0/v1/chat/completions".into(),
            text_model: "test-text-model".into(),
            vision_model: "test-vision-model".into(),
            temperature: 0.0,
            max_tokens: 1024,
            vision_max_tokens: 512,
            timeout_seconds: 5,
            referer: None,
        }
    }
}

/// Safe `Config` for unit tests: local backend, no API keys, nothing listening.
#[cfg(test)]
impl Config {
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            assistant_name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            backend: "local".into(),
            ollama: OllamaConfig {
                base_url: "http://127.0.0.1:0".into(),
                text_model: "text-model".into(),
                vision_model: "vision-model".into(),
                temperature: 0.0,
                timeout_seconds: 5,
                unload_timeout_seconds: 5,
                idle_unload_seconds: 0,
            },
            cloud: CloudConfig::test_default(),
            connectivity: ConnectivityConfig {
                check_url: "http://127.0.0.1:0".into(),
                interval_seconds: 300,
                timeout_seconds: 1,
            },
            retry: RetryConfig { max_retries: 0, base_delay_ms: 1, max_delay_ms: 1 },
            memory: MemoryConfig {
                kind: MemoryKind::Bounded,
                max_messages: 50,
                token_budget: 100,
                summarize_threshold: 0.8,
                restore_messages: 100,
                db_path: work_dir.join("history.db"),
                session_prefix: "test".into(),
            },
            cloud_api_key: None,
        }
    }
}
