//! Public types for the AI chat API
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deepseek::ChatOptions;

/// Body of both chat endpoints. `messages` is kept untyped so that
/// missing or malformed entries are reported through the error
/// taxonomy instead of a generic extractor rejection.
#[derive(Deserialize, Serialize, Default)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Option<Value>,
    #[serde(default)]
    pub options: Option<ChatOptions>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub data: String,
    pub request_id: String,
    pub timestamp: String,
}

#[derive(Deserialize, Default)]
pub struct HealthQuery {
    /// Also probe the upstream completion API
    pub upstream: Option<bool>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub status: String,
    pub timestamp: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}
