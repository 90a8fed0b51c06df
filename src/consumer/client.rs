//! Client for the streaming relay endpoint.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::event::{ParseFailure, StreamEvent, parse_line};
use crate::core::ClientConfig;
use crate::deepseek::{ChatMessage, Role};
use crate::sessions::{MessageType, SessionMessage};
use crate::sse::LineBuffer;

/// Result of a call that was not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The stream ended on its own.
    Finished(String),
    /// `stop_generation` was called. Holds the text received so far.
    Cancelled { partial: String },
    /// The relay sent an error event after the stream started. Holds the
    /// text received so far and the relay's message.
    Interrupted { partial: String, error: String },
}

impl Completion {
    pub fn text(&self) -> &str {
        match self {
            Completion::Finished(text) => text,
            Completion::Cancelled { partial } => partial,
            Completion::Interrupted { partial, .. } => partial,
        }
    }
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" - {body}")
    }
}

/// Failures surfaced to the caller. The display text is meant for the
/// person using the client.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Network connection failed, please check your connection ({0})")]
    Network(String),
    #[error("Server error: HTTP {status}: {reason}{}", body_suffix(.body))]
    HttpStatus {
        status: u16,
        reason: String,
        body: String,
    },
    #[error("Server did not return stream data")]
    EmptyBody,
    #[error("Stream processing error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for ConsumerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            ConsumerError::Network(e.to_string())
        } else {
            ConsumerError::Stream(e.to_string())
        }
    }
}

enum LineStep {
    Skip,
    Appended,
    Failed(String),
    Done,
}

/// Apply one complete line to the accumulated text.
fn apply_line(line: &[u8], accumulated: &mut String) -> LineStep {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(e) => {
            tracing::error!("Failed to decode stream data: {}", e);
            return LineStep::Skip;
        }
    };
    if line.is_empty() {
        return LineStep::Skip;
    }

    match parse_line(line) {
        Ok(StreamEvent::Content(content)) => {
            accumulated.push_str(&content);
            LineStep::Appended
        }
        Ok(StreamEvent::Done) => LineStep::Done,
        Ok(StreamEvent::Comment) => LineStep::Skip,
        Ok(StreamEvent::Error { message, code }) => {
            tracing::error!("Stream reported an error (code {:?}): {}", code, message);
            LineStep::Failed(message)
        }
        Err(ParseFailure::InvalidJson { payload, reason }) => {
            tracing::error!("JSON parse error: {}, raw data: {}", reason, payload);
            LineStep::Skip
        }
        Err(ParseFailure::MissingContent(value)) => {
            tracing::warn!("Unexpected data format: {}", value);
            LineStep::Skip
        }
    }
}

/// Consumes `/ai/chat-stream-deepseek` and reports the growing response
/// text as it arrives.
///
/// At most one call is expected to be in flight at a time.
/// [`StreamConsumer::stop_generation`] cancels it from any task.
#[derive(Debug)]
pub struct StreamConsumer {
    http: reqwest::Client,
    api_base_url: String,
    default_system_role: String,
    in_flight: Mutex<Option<CancellationToken>>,
    generating: AtomicBool,
}

/// Resets the in-flight state on every exit path of `call_api`.
struct InFlightGuard<'a>(&'a StreamConsumer);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.generating.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.0.in_flight.lock() {
            *slot = None;
        }
    }
}

impl StreamConsumer {
    pub fn new(api_base_url: &str, default_system_role: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            default_system_role: default_system_role.to_string(),
            in_flight: Mutex::new(None),
            generating: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.api_base_url, &config.system_role)
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    /// Cancel the in-flight call, if any. Returns whether there was one.
    pub fn stop_generation(&self) -> bool {
        let token = match self.in_flight.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// System preamble, then the history mapped to chat roles, then the
    /// new user message.
    pub fn build_messages(
        &self,
        user_message: &str,
        history: &[SessionMessage],
        system_role: Option<&str>,
    ) -> Vec<ChatMessage> {
        let system_role = system_role
            .filter(|role| !role.trim().is_empty())
            .unwrap_or(self.default_system_role.as_str());

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new(Role::System, system_role));
        messages.extend(history.iter().map(|msg| {
            let role = match msg.kind {
                MessageType::User => Role::User,
                MessageType::Ai => Role::Assistant,
            };
            ChatMessage::new(role, &msg.content)
        }));
        messages.push(ChatMessage::new(Role::User, user_message));
        messages
    }

    /// Send the conversation to the relay and stream the reply.
    ///
    /// `on_partial` receives the whole text accumulated so far after each
    /// fragment. It is never called after `stop_generation`.
    pub async fn call_api<F>(
        &self,
        user_message: &str,
        history: &[SessionMessage],
        system_role: Option<&str>,
        mut on_partial: F,
    ) -> Result<Completion, ConsumerError>
    where
        F: FnMut(&str),
    {
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.in_flight.lock() {
            *slot = Some(token.clone());
        }
        self.generating.store(true, Ordering::SeqCst);
        let _guard = InFlightGuard(self);

        let url = format!("{}/ai/chat-stream-deepseek", self.api_base_url);
        let body = json!({
            "messages": self.build_messages(user_message, history, system_role),
        });

        let mut accumulated = String::new();
        let cancelled = |partial: String| {
            tracing::info!("Request cancelled by user");
            Ok(Completion::Cancelled { partial })
        };

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return cancelled(accumulated),
            response = self.http.post(&url).json(&body).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = tokio::select! {
                biased;
                _ = token.cancelled() => return cancelled(accumulated),
                text = response.text() => text.unwrap_or_default(),
            };
            return Err(ConsumerError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                body: text,
            });
        }

        if response.content_length() == Some(0) {
            return Err(ConsumerError::EmptyBody);
        }

        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut done = false;
        let mut relay_error = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return cancelled(accumulated),
                next = bytes.next() => next,
            };
            let read = match next {
                Some(Ok(read)) => read,
                Some(Err(e)) => return Err(ConsumerError::Stream(e.to_string())),
                None => break,
            };

            // Lines after the end marker are drained but not applied
            for line in lines.push(&read) {
                if done {
                    continue;
                }
                match apply_line(&line, &mut accumulated) {
                    LineStep::Appended => {
                        if token.is_cancelled() {
                            return cancelled(accumulated);
                        }
                        on_partial(&accumulated);
                    }
                    LineStep::Failed(message) => relay_error = Some(message),
                    LineStep::Done => done = true,
                    LineStep::Skip => {}
                }
            }
        }

        if let Some(line) = lines.finish().filter(|_| !done) {
            match apply_line(&line, &mut accumulated) {
                LineStep::Appended => {
                    if token.is_cancelled() {
                        return cancelled(accumulated);
                    }
                    on_partial(&accumulated);
                }
                LineStep::Failed(message) => relay_error = Some(message),
                LineStep::Done | LineStep::Skip => {}
            }
        }

        tracing::debug!("Stream finished, content length: {}", accumulated.len());
        match relay_error {
            Some(error) => Ok(Completion::Interrupted {
                partial: accumulated,
                error,
            }),
            None => Ok(Completion::Finished(accumulated)),
        }
    }
}
