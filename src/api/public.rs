//! Public API types

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;

use crate::core::ChatError;

// Errors

/// A [`ChatError`] bound to the request it happened in.
pub struct ApiError {
    error: ChatError,
    request_id: String,
    route: Option<(String, String)>,
}

impl ApiError {
    pub fn new(error: ChatError, request_id: &str) -> Self {
        Self {
            error,
            request_id: request_id.to_string(),
            route: None,
        }
    }

    /// Include the method and path in the response body.
    pub fn with_route(mut self, method: &str, path: &str) -> Self {
        self.route = Some((method.to_string(), path.to_string()));
        self
    }
}

/// Convert `ApiError` into an Axum compatible response.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let log = self.error.to_log(&self.request_id);
        if self.error.status.is_server_error() || !self.error.operational {
            tracing::error!("[{}] Request failed: {}", self.request_id, log);
        } else {
            tracing::warn!("[{}] Request rejected: {}", self.request_id, log);
        }

        let mut body = json!({
            "success": false,
            "error": self.error.body(),
            "requestId": self.request_id,
        });
        if let Some((method, path)) = &self.route {
            body["path"] = json!(path);
            body["method"] = json!(method);
        }

        (self.error.status, Json(body)).into_response()
    }
}

/// Map a rejected JSON request body into the error taxonomy.
pub fn json_rejection_error(rejection: JsonRejection, body_limit: usize) -> ChatError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ChatError::payload_too_large(body_limit);
    }
    match rejection {
        JsonRejection::JsonSyntaxError(err) => ChatError::json_parse(&err.body_text()),
        JsonRejection::MissingJsonContentType(_) => ChatError::validation(
            "Expected request with `Content-Type: application/json`",
            None,
        ),
        other => ChatError::validation(other.body_text(), None),
    }
}

// Re-export public types from each route

pub mod ai {
    pub use crate::api::routes::ai::public::*;
}
