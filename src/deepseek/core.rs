use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::core::ChatError;

pub const DEFAULT_MAX_TOKENS: u32 = 3000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Longest accepted message content, in characters.
pub const MAX_CONTENT_CHARS: usize = 32_000;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl Role {
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        ChatMessage {
            role,
            content: content.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ChatOptions {
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// Why the upstream stopped generating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    InsufficientSystemResource,
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::InsufficientSystemResource => "insufficient_system_resource",
            FinishReason::Other(other) => other,
        }
    }
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" => FinishReason::ToolCalls,
            "insufficient_system_resource" => FinishReason::InsufficientSystemResource,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FinishReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(FinishReason::from(raw.as_str()))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl ChunkChoice {
    /// Incremental text carried by this choice, if any.
    pub fn content(&self) -> &str {
        self.delta
            .as_ref()
            .and_then(|d| d.content.as_deref())
            .unwrap_or("")
    }

    /// Reasoning text of reasoning models. Never relayed.
    pub fn reasoning(&self) -> &str {
        self.delta
            .as_ref()
            .and_then(|d| d.reasoning_content.as_deref())
            .unwrap_or("")
    }
}

/// One frame of an upstream streaming completion.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

impl StreamChunk {
    pub fn choice(&self) -> Option<&ChunkChoice> {
        self.choices.first()
    }

    /// A frame carrying a text fragment.
    pub fn content(text: &str) -> Self {
        Self {
            id: None,
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta {
                    content: Some(text.to_string()),
                    reasoning_content: None,
                }),
                finish_reason: None,
            }],
        }
    }

    /// A terminal frame.
    pub fn finished(reason: FinishReason) -> Self {
        Self {
            id: None,
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta::default()),
                finish_reason: Some(reason),
            }],
        }
    }
}

// Non-streaming response. Only the fields needed to extract the
// first choice's text are modelled.
#[derive(Debug, Deserialize)]
pub(crate) struct Completion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct CompletionChoice {
    #[serde(default)]
    pub message: Option<CompletionMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Validate typed messages before any network call.
pub fn validate_messages(messages: &[ChatMessage]) -> Result<(), ChatError> {
    if messages.is_empty() {
        return Err(ChatError::validation(
            "Messages array must not be empty",
            None,
        ));
    }

    for (i, message) in messages.iter().enumerate() {
        validate_content(i, &message.content)?;
    }

    Ok(())
}

/// Validate and convert an untyped `messages` value, e.g. taken from
/// a request body. Unknown roles, missing fields and empty or
/// oversized content are rejected with the offending index.
pub fn parse_messages(value: &Value) -> Result<Vec<ChatMessage>, ChatError> {
    let entries = value
        .as_array()
        .ok_or_else(|| ChatError::validation("Messages must be an array", None))?;

    if entries.is_empty() {
        return Err(ChatError::validation(
            "Messages array must not be empty",
            None,
        ));
    }

    let mut messages = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let role = entry["role"].as_str().filter(|r| !r.is_empty());
        let content = &entry["content"];
        let content_missing = content.is_null() || content.as_str() == Some("");

        let Some(role) = role.filter(|_| !content_missing) else {
            return Err(ChatError::validation(
                format!("Message {} is missing required fields", i + 1),
                Some(json!({ "messageIndex": i, "message": entry })),
            ));
        };

        let Some(role) = Role::parse(role) else {
            return Err(ChatError::validation(
                format!("Invalid message role: {role}"),
                Some(json!({ "messageIndex": i, "invalidRole": role })),
            ));
        };

        let Some(content) = content.as_str() else {
            return Err(ChatError::validation(
                format!("Message {} content must not be empty", i + 1),
                Some(json!({ "messageIndex": i })),
            ));
        };
        validate_content(i, content)?;

        messages.push(ChatMessage::new(role, content));
    }

    Ok(messages)
}

pub fn validate_options(options: &ChatOptions) -> Result<(), ChatError> {
    if options.max_tokens == Some(0) {
        return Err(ChatError::validation(
            "maxTokens must be a positive integer",
            Some(json!({ "maxTokens": 0 })),
        ));
    }
    Ok(())
}

fn validate_content(index: usize, content: &str) -> Result<(), ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::validation(
            format!("Message {} content must not be empty", index + 1),
            Some(json!({ "messageIndex": index })),
        ));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::token_limit(MAX_CONTENT_CHARS));
    }
    Ok(())
}
