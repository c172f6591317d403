//! Internet connectivity monitor.
//!
//! A `HEAD` probe against a configured URL decides online/offline. The
//! current value lives in a `watch` channel so readers (the resource
//! manager's `auto` backend resolution) never block on the probe; a stale
//! read is fine. Callbacks registered with [`ConnectivityMonitor::on_status_change`]
//! run synchronously whenever the value flips. A panicking callback is
//! caught and logged under the default unwind strategy; release builds
//! abort on panic, so callbacks must not panic there.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectivityConfig;
use crate::llm::ProviderError;

type StatusCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Floor for the probe period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub struct ConnectivityMonitor {
    client: Client,
    check_url: String,
    interval: Duration,
    state: watch::Sender<bool>,
    callbacks: Mutex<Vec<StatusCallback>>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("check_url", &self.check_url)
            .field("interval", &self.interval)
            .field("online", &*self.state.borrow())
            .finish()
    }
}

impl ConnectivityMonitor {
    /// Starts out offline until the first probe says otherwise.
    pub fn new(config: &ConnectivityConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;
        let (state, _) = watch::channel(false);
        Ok(Self {
            client,
            check_url: config.check_url.clone(),
            interval: Duration::from_secs(config.interval_seconds),
            state,
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver for the online flag. Cheap to clone, never blocks.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Register `callback(is_online)`, invoked on every change.
    pub fn on_status_change<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        if let Ok(mut cbs) = self.callbacks.lock() {
            cbs.push(Box::new(callback));
        }
    }

    /// Probe now and publish the result. Online iff a response arrives with
    /// a status below 500.
    pub async fn check_now(&self) -> bool {
        let online = match self.client.head(&self.check_url).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(e) => {
                debug!(url = %self.check_url, error = %e, "connectivity probe failed");
                false
            }
        };
        self.record(online);
        online
    }

    /// Publish `online`; fires callbacks if the value changed. Returns
    /// whether it changed.
    pub fn record(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "connectivity changed: {}", if online { "online" } else { "offline" });
            if let Ok(cbs) = self.callbacks.lock() {
                for cb in cbs.iter() {
                    if catch_unwind(AssertUnwindSafe(|| cb(online))).is_err() {
                        warn!("connectivity callback panicked");
                    }
                }
            }
        }
        changed
    }

    /// Run an initial check, then re-check every interval until `shutdown`
    /// is cancelled.
    pub async fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        self.check_now().await;
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.interval.max(MIN_INTERVAL));
            interval.tick().await; // consume the first (immediate) tick
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("connectivity monitor stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        monitor.check_now().await;
                    }
                }
            }
        })
    }
}
