//! HTTP client for the OpenAI compatible DeepSeek completion API.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use http::header::RETRY_AFTER;
use serde_json::{Value, json};

use crate::core::{AppConfig, ChatError};
use crate::deepseek::core::{
    ChatMessage, ChatOptions, Completion, Role, StreamChunk, validate_messages, validate_options,
};
use crate::sse::{self, LineBuffer};

/// Lazily driven sequence of upstream frames. Ends when the upstream
/// sends `[DONE]` or closes the body.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ChatError>>;

/// Anything that can produce chat completions. The HTTP layer only
/// depends on this so tests can substitute canned responses.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ChatError>;

    async fn stream_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChunkStream, ChatError>;

    async fn health_check(&self) -> bool;
}

#[derive(Clone, Debug)]
pub struct DeepSeekClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl DeepSeekClient {
    pub fn new(api_url: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.deepseek_api_url,
            &config.deepseek_api_key,
            &config.deepseek_model,
            config.upstream_timeout,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_url.trim_end_matches('/'))
    }

    fn payload(&self, messages: &[ChatMessage], options: &ChatOptions, stream: bool) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": options.max_tokens(),
            "temperature": options.temperature(),
        });
        if stream {
            payload["stream"] = json!(true);
        }
        payload
    }

    fn classify(&self, err: reqwest::Error) -> ChatError {
        if err.is_timeout() {
            return ChatError::timeout(self.timeout.as_millis() as u64);
        }
        ChatError::from(err)
    }

    /// Send the request and turn non-2xx responses into the matching
    /// error. `deadline` bounds the whole exchange including the body;
    /// streaming requests pass `None` and bound only the connection
    /// phase themselves.
    async fn send(
        &self,
        payload: &Value,
        deadline: Option<Duration>,
    ) -> Result<reqwest::Response, ChatError> {
        let mut request = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(payload);
        if let Some(deadline) = deadline {
            request = request.timeout(deadline);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Err(ChatError::from_upstream_response(
            status,
            &body,
            retry_after.as_deref(),
        ))
    }

    async fn complete_inner(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ChatError> {
        validate_messages(messages)?;
        validate_options(options)?;

        tracing::info!(
            "[DeepSeek] Starting completion request, message count: {}",
            messages.len()
        );

        let payload = self.payload(messages, options, false);
        let response = self.send(&payload, Some(self.timeout)).await?;
        let text = response.text().await.map_err(|e| self.classify(e))?;

        if text.trim().is_empty() {
            return Err(ChatError::empty_response());
        }
        let raw: Value = serde_json::from_str(&text)?;
        if raw.is_null() {
            return Err(ChatError::empty_response());
        }
        let completion: Completion = serde_json::from_value(raw.clone())?;

        let Some(choice) = completion.choices.first() else {
            return Err(ChatError::completion_failed(Some(json!({ "completion": raw }))));
        };

        match choice
            .message
            .as_ref()
            .and_then(|m| m.content.as_deref())
            .filter(|c| !c.is_empty())
        {
            Some(content) => {
                tracing::info!(
                    "[DeepSeek] Completion succeeded, content length: {}, finish reason: {}",
                    content.len(),
                    choice.finish_reason.as_deref().unwrap_or("none")
                );
                Ok(content.to_string())
            }
            None => Err(ChatError::empty_content(Some(json!({ "choice": choice })))),
        }
    }

    async fn stream_complete_inner(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChunkStream, ChatError> {
        validate_messages(messages)?;
        validate_options(options)?;

        tracing::info!(
            "[DeepSeek] Starting streaming request, message count: {}",
            messages.len()
        );

        let payload = self.payload(messages, options, true);
        let response = tokio::time::timeout(self.timeout, self.send(&payload, None))
            .await
            .map_err(|_| ChatError::timeout(self.timeout.as_millis() as u64))??;

        tracing::info!("[DeepSeek] Stream connection established");
        Ok(decode_event_stream(response.bytes_stream()).boxed())
    }
}

#[async_trait]
impl CompletionProvider for DeepSeekClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ChatError> {
        self.complete_inner(messages, options)
            .await
            .inspect_err(|e| tracing::error!("[DeepSeek] Completion failed: {}", e))
    }

    async fn stream_complete(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChunkStream, ChatError> {
        self.stream_complete_inner(messages, options)
            .await
            .inspect_err(|e| tracing::error!("[DeepSeek] Streaming completion failed: {}", e))
    }

    /// Cheap round trip to check that the upstream answers at all.
    async fn health_check(&self) -> bool {
        let messages = [ChatMessage::new(Role::User, "Hello")];
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": 10,
        });
        let result = async {
            let response = self.send(&payload, Some(self.timeout)).await?;
            let completion: Completion = response.json().await.map_err(|e| self.classify(e))?;
            Ok::<bool, ChatError>(!completion.choices.is_empty())
        }
        .await;

        result
            .inspect_err(|e| tracing::error!("[DeepSeek] Health check failed: {}", e))
            .unwrap_or(false)
    }
}

/// Turn an upstream `text/event-stream` body into completion frames.
///
/// Events are accumulated until their terminating blank line, so a
/// frame split over several reads is parsed once it is whole. Comment
/// lines (`: keep-alive`) are ignored. A frame that is not valid JSON
/// ends the sequence with an error.
pub fn decode_event_stream<S, E>(bytes: S) -> impl Stream<Item = Result<StreamChunk, ChatError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut lines = LineBuffer::new();
        let mut data: Vec<String> = Vec::new();
        let mut finished = false;

        'outer: while let Some(read) = bytes.next().await {
            let read = read.map_err(|e| -> ChatError { e.into() })?;
            for line in lines.push(&read) {
                match dispatch_line(line, &mut data)? {
                    Dispatch::Pending => {}
                    Dispatch::Chunk(chunk) => yield chunk,
                    Dispatch::Done => {
                        finished = true;
                        break 'outer;
                    }
                }
            }
        }

        if !finished {
            // Body ended without a terminating blank line
            if let Some(line) = lines.finish() {
                if let Dispatch::Chunk(chunk) = dispatch_line(line, &mut data)? {
                    yield chunk;
                }
            }
            if let Some(chunk) = flush_event(&mut data)? {
                yield chunk;
            }
        }
    }
}

enum Dispatch {
    Pending,
    Chunk(StreamChunk),
    Done,
}

fn dispatch_line(line: Vec<u8>, data: &mut Vec<String>) -> Result<Dispatch, ChatError> {
    let line = String::from_utf8(line)
        .map_err(|_| ChatError::stream("upstream sent invalid UTF-8"))?;

    if line.is_empty() {
        if data.len() == 1 && data[0] == sse::DONE {
            data.clear();
            return Ok(Dispatch::Done);
        }
        return Ok(match flush_event(data)? {
            Some(chunk) => Dispatch::Chunk(chunk),
            None => Dispatch::Pending,
        });
    }

    if let Some(value) = sse::data_field(&line) {
        data.push(value.to_string());
    }
    Ok(Dispatch::Pending)
}

fn flush_event(data: &mut Vec<String>) -> Result<Option<StreamChunk>, ChatError> {
    if data.is_empty() {
        return Ok(None);
    }
    let payload = data.join("\n");
    data.clear();

    let payload = payload.trim();
    if payload.is_empty() || payload == sse::DONE {
        return Ok(None);
    }

    serde_json::from_str::<StreamChunk>(payload)
        .map(Some)
        .inspect_err(|e| {
            tracing::error!("Parsing completion chunk failed for {}\nError:{}", payload, e)
        })
        .map_err(|_| ChatError::json_parse(payload))
}
