//! Fake local inference server shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::routing::{get, post};
use serde_json::{Value, json};

use murmur::config::OllamaConfig;
use murmur::llm::providers::ollama::OllamaProvider;

/// Requests in arrival order, as `"unload:<model>"` or `"chat:<model>"`.
pub type Events = Arc<Mutex<Vec<String>>>;

pub async fn spawn_server(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Replies `"reply from <model>"` to every chat and records every request.
pub async fn fake_ollama() -> (String, Events) {
    let events: Events = Arc::default();
    let (unloads, chats) = (events.clone(), events.clone());
    let app = axum::Router::new()
        .route(
            "/api/generate",
            post(move |Json(body): Json<Value>| {
                let events = unloads.clone();
                async move {
                    let model = body["model"].as_str().unwrap_or_default();
                    events.lock().unwrap().push(format!("unload:{model}"));
                    Json(json!({ "done": true }))
                }
            }),
        )
        .route(
            "/api/chat",
            post(move |Json(body): Json<Value>| {
                let events = chats.clone();
                async move {
                    let model = body["model"].as_str().unwrap_or_default().to_string();
                    events.lock().unwrap().push(format!("chat:{model}"));
                    Json(json!({ "message": { "content": format!("reply from {model}") } }))
                }
            }),
        )
        .route(
            "/api/tags",
            get(|| async { Json(json!({ "models": [{ "name": "text-model:latest" }] })) }),
        );
    let addr = spawn_server(app).await;
    (format!("http://{addr}"), events)
}

pub fn ollama_config(base_url: String) -> OllamaConfig {
    OllamaConfig {
        base_url,
        text_model: "text-model".into(),
        vision_model: "vision-model".into(),
        temperature: 0.0,
        timeout_seconds: 5,
        unload_timeout_seconds: 5,
        idle_unload_seconds: 0,
    }
}

pub fn ollama(base_url: String) -> OllamaProvider {
    OllamaProvider::new(&ollama_config(base_url)).unwrap()
}

pub fn events(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}
