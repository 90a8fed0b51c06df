//! Test utilities for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, body::Body};
use futures::stream;
use serde_json::Value;

use deepseek_chat::api::AppState;
use deepseek_chat::api::app;
use deepseek_chat::core::{AppConfig, ChatError};
use deepseek_chat::deepseek::{
    ChatMessage, ChatOptions, ChunkStream, CompletionProvider, StreamChunk,
};

pub const TEST_BODY_LIMIT: usize = 1024 * 1024;

/// Configuration pointing the upstream client at `upstream_url`, which is
/// usually a `mockito` server.
pub fn test_config(upstream_url: &str) -> AppConfig {
    AppConfig {
        deepseek_api_url: upstream_url.to_string(),
        deepseek_api_key: String::from("sk-test"),
        deepseek_model: String::from("deepseek-chat"),
        upstream_timeout: Duration::from_secs(5),
        keep_alive_interval: Duration::from_secs(15),
        body_limit: TEST_BODY_LIMIT,
        cors_origin: String::from("*"),
        static_dir: String::from("./does-not-exist"),
    }
}

/// Creates the application router backed by the real DeepSeek client.
pub fn test_app(upstream_url: &str) -> Router {
    let config = test_config(upstream_url);
    app(Arc::new(AppState::from_config(config)))
}

/// Provider that replays a fixed list of stream items and never touches
/// the network.
pub struct ScriptedProvider {
    pub items: Vec<Result<StreamChunk, ChatError>>,
}

#[async_trait::async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<String, ChatError> {
        Ok(String::from("scripted"))
    }

    async fn stream_complete(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChunkStream, ChatError> {
        use futures::StreamExt;
        let items: Vec<_> = self
            .items
            .iter()
            .map(|item| match item {
                Ok(chunk) => Ok(chunk.clone()),
                Err(e) => Err(ChatError::stream(&e.message)),
            })
            .collect();
        Ok(stream::iter(items).boxed())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Provider whose stream yields one fragment and then stays open without
/// sending anything else.
pub struct StalledProvider;

#[async_trait::async_trait]
impl CompletionProvider for StalledProvider {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<String, ChatError> {
        Ok(String::from("stalled"))
    }

    async fn stream_complete(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChunkStream, ChatError> {
        use futures::StreamExt;
        let first = stream::once(async { Ok::<_, ChatError>(StreamChunk::content("A")) });
        Ok(first.chain(stream::pending()).boxed())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Creates the application router backed by a [`StalledProvider`] with the
/// given keep-alive interval.
pub fn stalled_app(keep_alive_interval: Duration) -> Router {
    let mut config = test_config("http://127.0.0.1:9");
    config.keep_alive_interval = keep_alive_interval;
    app(Arc::new(AppState::new(config, Arc::new(StalledProvider))))
}

/// Creates the application router backed by a [`ScriptedProvider`].
pub fn scripted_app(items: Vec<Result<StreamChunk, ChatError>>) -> Router {
    let config = test_config("http://127.0.0.1:9");
    let provider = Arc::new(ScriptedProvider { items });
    app(Arc::new(AppState::new(config, provider)))
}

pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

pub async fn body_to_json(body: Body) -> Value {
    let body = body_to_string(body).await;
    serde_json::from_str(&body).expect("Body is not JSON")
}

pub fn chat_body(content: &str) -> String {
    serde_json::json!({
        "messages": [{"role": "user", "content": content}]
    })
    .to_string()
}

/// Creates the application router serving static assets from `dir`.
pub fn static_app(dir: &str) -> Router {
    let mut config = test_config("http://127.0.0.1:9");
    config.static_dir = dir.to_string();
    app(Arc::new(AppState::from_config(config)))
}
