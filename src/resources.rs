//! GPU model residency and backend routing.
//!
//! The local GPU holds one large model at a time. [`ModelResourceManager`]
//! owns the [`ModelSlot`] recording which model is resident, swaps models
//! on demand (evict the old one, mark the new one resident, let the server
//! load it on first use), and routes every request to the local server or
//! the cloud endpoint according to the configured [`BackendMode`].
//!
//! Vision requests on the local backend always swap back afterwards: the
//! vision model is evicted whether the request succeeded or not, and the
//! text model reloads lazily on the next text request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::llm::providers::ollama::OllamaProvider;
use crate::llm::retry::{RetryPolicy, retry_with_backoff};
use crate::llm::{Backend, BackendMode, ChatMessage, LlmProvider, ProviderError};
use crate::memory::{SUMMARY_PROMPT, Summarizer};

/// System prompt for every conversational request.
pub const SYSTEM_PROMPT: &str = "You are a helpful personal assistant. Be concise and helpful.";

// ── Slot ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Text,
    Vision,
}

/// The model currently occupying the GPU.
///
/// `warmed` flips once the server has answered a request with this model,
/// i.e. the weights are actually loaded. A swap drops the whole value.
#[derive(Debug, Clone)]
pub struct ResidentModel {
    pub name: String,
    pub kind: ModelKind,
    pub since: Instant,
    pub warmed: bool,
}

#[derive(Debug, Default)]
pub struct ModelSlot {
    resident: Option<ResidentModel>,
    backend_in_use: Option<Backend>,
    last_swap_at: Option<Instant>,
    last_used_at: Option<Instant>,
    swaps: u64,
}

impl ModelSlot {
    fn is_resident(&self, name: &str) -> bool {
        self.resident.as_ref().is_some_and(|r| r.name == name)
    }

    fn occupy(&mut self, name: &str, kind: ModelKind) {
        debug_assert!(self.resident.is_none(), "occupy called on a non-empty slot");
        let now = Instant::now();
        self.resident = Some(ResidentModel {
            name: name.to_string(),
            kind,
            since: now,
            warmed: false,
        });
        self.last_swap_at = Some(now);
        self.swaps += 1;
    }

    fn vacate(&mut self) -> Option<ResidentModel> {
        self.resident.take()
    }

    fn mark_used(&mut self, ok: bool) {
        self.last_used_at = Some(Instant::now());
        if let Some(r) = self.resident.as_mut().filter(|r| ok && !r.warmed) {
            info!(model = %r.name, "model loaded");
            r.warmed = true;
        }
    }
}

/// Point-in-time copy of the slot for status output and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSnapshot {
    pub mode: BackendMode,
    pub resident: Option<String>,
    pub kind: Option<ModelKind>,
    pub warmed: bool,
    pub backend_in_use: Option<Backend>,
    pub swaps: u64,
    pub since_last_swap: Option<Duration>,
    pub idle_for: Option<Duration>,
}

// ── Manager ───────────────────────────────────────────────────────────────────

type EvictionHook = Box<dyn Fn(&str) + Send + Sync>;

enum Route<'a> {
    Local,
    Cloud(&'a LlmProvider),
}

pub struct ModelResourceManager {
    mode: BackendMode,
    local: OllamaProvider,
    text_model: String,
    vision_model: String,
    cloud: Option<LlmProvider>,
    online: Option<watch::Receiver<bool>>,
    retry: RetryPolicy<ProviderError>,
    idle_unload: Option<Duration>,
    on_evict: Option<EvictionHook>,
    // Held for the whole of one request; the single-request pipeline never
    // contends, the idle reaper and summarizer just queue behind it.
    slot: Mutex<ModelSlot>,
}

impl std::fmt::Debug for ModelResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResourceManager")
            .field("mode", &self.mode)
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field("cloud", &self.cloud.as_ref().map(LlmProvider::text_model))
            .field("idle_unload", &self.idle_unload)
            .finish()
    }
}

impl ModelResourceManager {
    pub fn new(
        mode: BackendMode,
        local: OllamaProvider,
        text_model: impl Into<String>,
        vision_model: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            local,
            text_model: text_model.into(),
            vision_model: vision_model.into(),
            cloud: None,
            online: None,
            retry: RetryPolicy::default(),
            idle_unload: None,
            on_evict: None,
            slot: Mutex::new(ModelSlot::default()),
        }
    }

    /// Build from resolved config. `cloud` comes from
    /// [`crate::llm::providers::build_cloud`], `online` from the
    /// connectivity monitor (only needed in `auto` mode).
    pub fn from_config(
        config: &Config,
        cloud: Option<LlmProvider>,
        online: Option<watch::Receiver<bool>>,
    ) -> Result<Self, ProviderError> {
        let mode = config.backend_mode()?;
        let local = OllamaProvider::new(&config.ollama)?;
        let mut manager = Self::new(mode, local, &config.ollama.text_model, &config.ollama.vision_model)
            .with_retry(config.retry.policy())
            .with_idle_unload(config.ollama.idle_unload());
        manager.cloud = cloud;
        manager.online = online;
        Ok(manager)
    }

    pub fn with_cloud(mut self, cloud: LlmProvider) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn with_connectivity(mut self, online: watch::Receiver<bool>) -> Self {
        self.online = Some(online);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy<ProviderError>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_idle_unload(mut self, idle_unload: Option<Duration>) -> Self {
        self.idle_unload = idle_unload;
        self
    }

    /// Run `hook(model)` after every eviction request, successful or not.
    /// The binary uses it to drop any local caches tied to the old model.
    pub fn with_eviction_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_evict = Some(Box::new(hook));
        self
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    pub fn vision_model(&self) -> &str {
        &self.vision_model
    }

    /// Model name that would serve a vision request right now.
    pub fn active_vision_model(&self) -> &str {
        match self.route() {
            Route::Local => &self.vision_model,
            Route::Cloud(cloud) => cloud.vision_model(),
        }
    }

    /// Backend the next request would use. Re-evaluated on every call.
    pub fn resolve_backend(&self) -> Backend {
        match self.route() {
            Route::Local => Backend::Local,
            Route::Cloud(_) => Backend::Cloud,
        }
    }

    fn route(&self) -> Route<'_> {
        match (self.mode, self.cloud.as_ref()) {
            (BackendMode::Local, _) => Route::Local,
            (BackendMode::Cloud, Some(cloud)) => Route::Cloud(cloud),
            (BackendMode::Cloud, None) => {
                warn!("cloud backend requested but no cloud client configured, using local");
                Route::Local
            }
            (BackendMode::Auto, Some(cloud)) if self.is_online() => Route::Cloud(cloud),
            (BackendMode::Auto, _) => Route::Local,
        }
    }

    fn is_online(&self) -> bool {
        self.online.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub async fn slot(&self) -> SlotSnapshot {
        let slot = self.slot.lock().await;
        SlotSnapshot {
            mode: self.mode,
            resident: slot.resident.as_ref().map(|r| r.name.clone()),
            kind: slot.resident.as_ref().map(|r| r.kind),
            warmed: slot.resident.as_ref().is_some_and(|r| r.warmed),
            backend_in_use: slot.backend_in_use,
            swaps: slot.swaps,
            since_last_swap: slot.last_swap_at.map(|t| t.elapsed()),
            idle_for: slot.last_used_at.map(|t| t.elapsed()),
        }
    }

    // ── Residency ────────────────────────────────────────────────────────────

    /// Make the text model the resident model. No-op if it already is.
    pub async fn ensure_text_model_loaded(&self) {
        let mut slot = self.slot.lock().await;
        self.swap_to(&mut slot, ModelKind::Text).await;
    }

    /// Make the vision model the resident model, evicting the text model.
    pub async fn ensure_vision_model_loaded(&self) {
        let mut slot = self.slot.lock().await;
        self.swap_to(&mut slot, ModelKind::Vision).await;
    }

    async fn swap_to(&self, slot: &mut ModelSlot, kind: ModelKind) {
        let target = match kind {
            ModelKind::Text => &self.text_model,
            ModelKind::Vision => &self.vision_model,
        };
        if slot.is_resident(target) {
            return;
        }
        if let Some(old) = slot.vacate() {
            info!(from = %old.name, to = %target, "swapping GPU model");
            self.evict(&old.name).await;
        }
        slot.occupy(target, kind);
    }

    /// Ask the server to drop `model`. Never fails: an eviction that does
    /// not reach the server is logged and forgotten.
    async fn evict(&self, model: &str) {
        match self.local.unload(model).await {
            Ok(()) => debug!(%model, "model unloaded"),
            Err(e) => warn!(%model, error = %e, "model unload failed, continuing"),
        }
        if let Some(hook) = &self.on_evict {
            hook(model);
        }
    }

    /// Evict whatever is resident. Idempotent.
    pub async fn unload_all(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.vacate() {
            info!(model = %old.name, "unloading resident model");
            self.evict(&old.name).await;
        }
    }

    /// Evict the resident model if it has been idle past the configured
    /// timeout. Returns whether anything was evicted.
    pub async fn evict_if_idle(&self) -> bool {
        let Some(timeout) = self.idle_unload else {
            return false;
        };
        let mut slot = self.slot.lock().await;
        let Some(resident) = slot.resident.as_ref() else {
            return false;
        };
        let last = slot.last_used_at.unwrap_or(resident.since).max(resident.since);
        if last.elapsed() < timeout {
            return false;
        }
        if let Some(old) = slot.vacate() {
            info!(model = %old.name, idle_secs = last.elapsed().as_secs(), "evicting idle model");
            self.evict(&old.name).await;
        }
        true
    }

    /// Periodically run [`Self::evict_if_idle`] until `shutdown` fires.
    /// Returns `None` when idle eviction is disabled.
    pub fn spawn_idle_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let timeout = self.idle_unload?;
        let period = (timeout / 2).max(Duration::from_secs(1));
        let manager = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // consume the first (immediate) tick
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        manager.evict_if_idle().await;
                    }
                }
            }
        }))
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    /// Conversational reply to `text` given prior turns.
    pub async fn get_text_response(&self, text: &str, history: &[ChatMessage]) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(text));
        self.chat(messages).await
    }

    /// One-shot completion: `system` + `prompt`, no history.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        self.chat(vec![ChatMessage::system(system), ChatMessage::user(prompt)]).await
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        let mut slot = self.slot.lock().await;
        let route = self.route();

        match route {
            Route::Cloud(cloud) => {
                slot.backend_in_use = Some(Backend::Cloud);
                let out = retry_with_backoff(&self.retry, "cloud chat", || cloud.chat(&messages, 0)).await;
                out.map_err(|e| self.exhausted(Backend::Cloud, e))
            }
            Route::Local => {
                slot.backend_in_use = Some(Backend::Local);
                self.swap_to(&mut slot, ModelKind::Text).await;
                let model = self.text_model.as_str();
                let out = retry_with_backoff(&self.retry, "local chat", || self.local.chat(model, &messages)).await;
                slot.mark_used(out.is_ok());
                out.map_err(|e| self.exhausted(Backend::Local, e))
            }
        }
    }

    /// Describe `image` (JPEG bytes) guided by `prompt`.
    pub async fn get_vision_response(&self, prompt: &str, image: &[u8]) -> Result<String, ProviderError> {
        let image_b64 = BASE64.encode(image);
        let mut slot = self.slot.lock().await;

        match self.route() {
            Route::Cloud(cloud) => {
                slot.backend_in_use = Some(Backend::Cloud);
                info!(model = %cloud.vision_model(), "sending image to cloud vision model");
                let out = retry_with_backoff(&self.retry, "cloud vision", || cloud.vision(prompt, &image_b64)).await;
                out.map_err(|e| self.exhausted(Backend::Cloud, e))
            }
            Route::Local => {
                slot.backend_in_use = Some(Backend::Local);
                self.swap_to(&mut slot, ModelKind::Vision).await;
                let model = self.vision_model.as_str();
                let out = retry_with_backoff(&self.retry, "local vision", || {
                    self.local.vision(model, prompt, &image_b64)
                })
                .await;
                slot.mark_used(out.is_ok());

                // Swap back regardless of outcome; text reloads lazily.
                if let Some(old) = slot.vacate() {
                    debug!(model = %old.name, "releasing vision model");
                    self.evict(&old.name).await;
                }
                out.map_err(|e| self.exhausted(Backend::Local, e))
            }
        }
    }

    fn exhausted(&self, backend: Backend, e: ProviderError) -> ProviderError {
        if e.is_transient() {
            ProviderError::Unavailable {
                backend,
                attempts: self.retry.max_attempts(),
                reason: e.to_string(),
            }
        } else {
            e
        }
    }
}

impl Summarizer for ModelResourceManager {
    fn summarize(&self, transcript: &str) -> impl Future<Output = Result<String, ProviderError>> + Send {
        self.complete(SUMMARY_PROMPT, transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OllamaConfig;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::testutil;

    use axum::Json;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::sync::Mutex as StdMutex;

    /// Requests seen by the fake Ollama server, in order.
    #[derive(Default)]
    struct Seen {
        unloads: Vec<String>,
        chats: Vec<(String, Value)>,
    }

    async fn fake_ollama(vision_status: StatusCode) -> (String, Arc<StdMutex<Seen>>) {
        let seen: Arc<StdMutex<Seen>> = Arc::default();
        let (s1, s2) = (seen.clone(), seen.clone());
        let app = axum::Router::new()
            .route(
                "/api/generate",
                post(move |Json(body): Json<Value>| {
                    let s = s1.clone();
                    async move {
                        let model = body["model"].as_str().unwrap_or_default().to_string();
                        s.lock().unwrap().unloads.push(model);
                        Json(json!({ "done": true }))
                    }
                }),
            )
            .route(
                "/api/chat",
                post(move |Json(body): Json<Value>| {
                    let s = s2.clone();
                    async move {
                        let model = body["model"].as_str().unwrap_or_default().to_string();
                        s.lock().unwrap().chats.push((model.clone(), body));
                        if model == "vision-model" && vision_status != StatusCode::OK {
                            return (vision_status, Json(json!({ "error": "vision failed" })));
                        }
                        (StatusCode::OK, Json(json!({ "message": { "content": format!("reply from {model}") } })))
                    }
                }),
            );
        let addr = testutil::spawn_server(app).await;
        (format!("http://{addr}"), seen)
    }

    fn local(base_url: String) -> OllamaProvider {
        OllamaProvider::new(&OllamaConfig {
            base_url,
            text_model: "text-model".into(),
            vision_model: "vision-model".into(),
            temperature: 0.0,
            timeout_seconds: 5,
            unload_timeout_seconds: 5,
            idle_unload_seconds: 0,
        })
        .unwrap()
    }

    fn manager(mode: BackendMode, base_url: String) -> ModelResourceManager {
        ModelResourceManager::new(mode, local(base_url), "text-model", "vision-model")
            .with_retry(RetryPolicy::transient(0, Duration::from_millis(1), Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn text_request_marks_text_model_resident() {
        let (url, seen) = fake_ollama(StatusCode::OK).await;
        let m = manager(BackendMode::Local, url);

        let out = m.get_text_response("hi", &[ChatMessage::assistant("earlier")]).await.unwrap();
        assert_eq!(out, "reply from text-model");

        let slot = m.slot().await;
        assert_eq!(slot.resident.as_deref(), Some("text-model"));
        assert_eq!(slot.kind, Some(ModelKind::Text));
        assert!(slot.warmed);
        assert_eq!(slot.backend_in_use, Some(Backend::Local));

        let seen = seen.lock().unwrap();
        assert!(seen.unloads.is_empty());
        let body = &seen.chats[0].1;
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"], "earlier");
        assert_eq!(body["messages"][2]["content"], "hi");
    }

    #[tokio::test]
    async fn ensure_text_is_idempotent() {
        let (url, seen) = fake_ollama(StatusCode::OK).await;
        let m = manager(BackendMode::Local, url);

        m.ensure_text_model_loaded().await;
        m.ensure_text_model_loaded().await;
        let slot = m.slot().await;
        assert_eq!(slot.swaps, 1);
        assert!(!slot.warmed);
        assert!(seen.lock().unwrap().unloads.is_empty());
    }

    #[tokio::test]
    async fn vision_evicts_text_then_swaps_back() {
        let (url, seen) = fake_ollama(StatusCode::OK).await;
        let m = manager(BackendMode::Local, url);

        m.get_text_response("hi", &[]).await.unwrap();
        let out = m.get_vision_response("what is this", b"jpeg").await.unwrap();
        assert_eq!(out, "reply from vision-model");

        let slot = m.slot().await;
        assert!(slot.resident.is_none());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.unloads, vec!["text-model", "vision-model"]);
        let vision_body = &seen.chats[1].1;
        assert_eq!(vision_body["messages"][0]["images"][0], BASE64.encode(b"jpeg"));
    }

    #[tokio::test]
    async fn vision_failure_still_swaps_back() {
        let (url, seen) = fake_ollama(StatusCode::INTERNAL_SERVER_ERROR).await;
        let m = manager(BackendMode::Local, url);

        let err = m.get_vision_response("what is this", b"jpeg").await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent { status: 500, .. }));
        assert!(m.slot().await.resident.is_none());
        assert_eq!(seen.lock().unwrap().unloads, vec!["vision-model"]);
    }

    #[tokio::test]
    async fn eviction_hook_runs_on_every_unload() {
        let (url, _seen) = fake_ollama(StatusCode::OK).await;
        let evicted: Arc<StdMutex<Vec<String>>> = Arc::default();
        let e = evicted.clone();
        let m = manager(BackendMode::Local, url).with_eviction_hook(move |model| {
            e.lock().unwrap().push(model.to_string());
        });

        m.ensure_vision_model_loaded().await;
        m.ensure_text_model_loaded().await;
        m.unload_all().await;
        m.unload_all().await;
        assert_eq!(*evicted.lock().unwrap(), vec!["vision-model", "text-model"]);
    }

    #[tokio::test]
    async fn unload_failure_is_swallowed() {
        let m = manager(BackendMode::Local, format!("http://{}", testutil::closed_addr()));
        m.ensure_text_model_loaded().await;
        m.ensure_vision_model_loaded().await;
        assert_eq!(m.slot().await.resident.as_deref(), Some("vision-model"));
        m.unload_all().await;
        assert!(m.slot().await.resident.is_none());
    }

    #[tokio::test]
    async fn server_down_surfaces_unavailable() {
        let m = ModelResourceManager::new(
            BackendMode::Local,
            local(format!("http://{}", testutil::closed_addr())),
            "text-model",
            "vision-model",
        )
        .with_retry(RetryPolicy::transient(2, Duration::from_millis(1), Duration::from_millis(2)));

        let err = m.get_text_response("hi", &[]).await.unwrap_err();
        match err {
            ProviderError::Unavailable { backend, attempts, .. } => {
                assert_eq!(backend, Backend::Local);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cloud_mode_without_client_falls_back_to_local() {
        let (url, _seen) = fake_ollama(StatusCode::OK).await;
        let m = manager(BackendMode::Cloud, url);
        assert_eq!(m.resolve_backend(), Backend::Local);
        assert_eq!(m.get_text_response("hi", &[]).await.unwrap(), "reply from text-model");
    }

    #[tokio::test]
    async fn cloud_mode_never_touches_the_gpu() {
        let (url, seen) = fake_ollama(StatusCode::OK).await;
        let m = manager(BackendMode::Cloud, url).with_cloud(LlmProvider::Dummy(DummyProvider));

        assert_eq!(m.get_text_response("hello", &[]).await.unwrap(), "[echo] hello");
        assert!(m.get_vision_response("look", b"jpeg").await.unwrap().starts_with("[echo] look"));

        let slot = m.slot().await;
        assert!(slot.resident.is_none());
        assert_eq!(slot.backend_in_use, Some(Backend::Cloud));
        let seen = seen.lock().unwrap();
        assert!(seen.chats.is_empty() && seen.unloads.is_empty());
    }

    #[tokio::test]
    async fn auto_mode_follows_connectivity() {
        let (url, _seen) = fake_ollama(StatusCode::OK).await;
        let (tx, rx) = watch::channel(false);
        let m = manager(BackendMode::Auto, url)
            .with_cloud(LlmProvider::Dummy(DummyProvider))
            .with_connectivity(rx);

        assert_eq!(m.resolve_backend(), Backend::Local);
        assert_eq!(m.active_vision_model(), "vision-model");
        tx.send(true).unwrap();
        assert_eq!(m.resolve_backend(), Backend::Cloud);
        assert_eq!(m.active_vision_model(), "dummy");
        tx.send(false).unwrap();
        assert_eq!(m.resolve_backend(), Backend::Local);
    }

    #[tokio::test]
    async fn auto_mode_without_cloud_is_local() {
        let (url, _seen) = fake_ollama(StatusCode::OK).await;
        let (_tx, rx) = watch::channel(true);
        let m = manager(BackendMode::Auto, url).with_connectivity(rx);
        assert_eq!(m.resolve_backend(), Backend::Local);
    }

    #[tokio::test]
    async fn summarizer_routes_through_the_slot() {
        let (url, seen) = fake_ollama(StatusCode::OK).await;
        let m = manager(BackendMode::Local, url);

        let out = m.summarize("USER: hi\nASSISTANT: hello").await.unwrap();
        assert_eq!(out, "reply from text-model");
        assert_eq!(m.slot().await.resident.as_deref(), Some("text-model"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.chats[0].1["messages"][0]["content"], SUMMARY_PROMPT);
    }

    #[tokio::test]
    async fn idle_eviction_disabled_by_default() {
        let (url, _seen) = fake_ollama(StatusCode::OK).await;
        let m = Arc::new(manager(BackendMode::Local, url));
        m.ensure_text_model_loaded().await;
        assert!(!m.evict_if_idle().await);
        assert!(m.spawn_idle_reaper(CancellationToken::new()).is_none());
    }

    #[tokio::test]
    async fn idle_model_is_evicted() {
        let (url, seen) = fake_ollama(StatusCode::OK).await;
        let m = manager(BackendMode::Local, url).with_idle_unload(Some(Duration::from_millis(20)));

        m.get_text_response("hi", &[]).await.unwrap();
        assert!(!m.evict_if_idle().await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(m.evict_if_idle().await);
        assert!(m.slot().await.resident.is_none());
        assert_eq!(seen.lock().unwrap().unloads, vec!["text-model"]);
    }
}
