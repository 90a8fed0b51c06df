//! Error taxonomy shared by the upstream adapter, the relay and the
//! HTTP layer.
//!
//! Every failure that leaves the upstream adapter is a [`ChatError`]
//! carrying a stable numeric [`ErrorCode`], the HTTP status it should
//! be reported with, a human readable message and optional structured
//! details.

use std::error::Error as StdError;
use std::io;

use chrono::{SecondsFormat, Utc};
use http::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};

/// Transport level timeout used when the cause does not say otherwise.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Longest prefix of unparseable data kept in error details.
const PARSE_ERROR_SNIPPET_LEN: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // General
    Unknown = 1000,
    Validation = 1001,
    MissingRequiredField = 1002,
    InvalidRequestFormat = 1003,

    // Network and connection
    Network = 2000,
    ConnectionTimeout = 2001,
    ConnectionRefused = 2002,
    DnsResolutionFailed = 2003,

    // Upstream API
    ApiKeyInvalid = 3000,
    ApiKeyMissing = 3001,
    ApiQuotaExceeded = 3002,
    ApiRateLimited = 3003,
    ApiServiceUnavailable = 3004,
    ApiResponseInvalid = 3005,

    // Model
    ModelError = 4000,
    TokenLimitExceeded = 4001,
    StreamError = 4002,
    CompletionFailed = 4003,

    // Data handling
    JsonParseError = 5000,
    DataFormatError = 5001,
    ResponseEmpty = 5002,
    StreamReadError = 5003,

    // System
    InternalServerError = 6000,
    ServiceUnavailable = 6001,
    ResourceNotFound = 6002,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ChatError {
    pub code: ErrorCode,
    pub status: StatusCode,
    pub message: String,
    /// `false` only for unexpected failures that indicate a bug or an
    /// unknown upstream condition.
    pub operational: bool,
    pub timestamp: String,
    pub details: Option<Value>,
}

/// Body of every JSON error response.
#[derive(Serialize)]
pub struct ErrorBody<'a> {
    pub code: ErrorCode,
    pub message: &'a str,
    pub timestamp: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a Value>,
}

impl ChatError {
    pub fn new(
        message: impl Into<String>,
        code: ErrorCode,
        status: StatusCode,
        operational: bool,
        details: Option<Value>,
    ) -> Self {
        Self {
            code,
            status,
            message: message.into(),
            operational,
            timestamp: now_rfc3339(),
            details,
        }
    }

    pub fn validation(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::new(
            message,
            ErrorCode::Validation,
            StatusCode::BAD_REQUEST,
            true,
            details,
        )
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            format!("Missing required field: {field}"),
            ErrorCode::MissingRequiredField,
            StatusCode::BAD_REQUEST,
            true,
            Some(json!({ "field": field })),
        )
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            "Request body is too large, please shorten the input",
            ErrorCode::Validation,
            StatusCode::PAYLOAD_TOO_LARGE,
            true,
            Some(json!({ "limit": limit })),
        )
    }

    pub fn network(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::new(
            message,
            ErrorCode::Network,
            StatusCode::SERVICE_UNAVAILABLE,
            true,
            details,
        )
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            format!("Request timed out ({timeout_ms}ms)"),
            ErrorCode::ConnectionTimeout,
            StatusCode::REQUEST_TIMEOUT,
            true,
            Some(json!({ "timeout": timeout_ms })),
        )
    }

    pub fn connection_refused(cause: &str) -> Self {
        Self::new(
            "Connection refused, the upstream server may be unavailable",
            ErrorCode::ConnectionRefused,
            StatusCode::SERVICE_UNAVAILABLE,
            true,
            Some(json!({ "originalError": cause })),
        )
    }

    pub fn dns_failed(cause: &str) -> Self {
        Self::new(
            "DNS resolution failed, please check the network connection",
            ErrorCode::DnsResolutionFailed,
            StatusCode::SERVICE_UNAVAILABLE,
            true,
            Some(json!({ "originalError": cause })),
        )
    }

    pub fn api_key() -> Self {
        Self::new(
            "API key is invalid or missing",
            ErrorCode::ApiKeyInvalid,
            StatusCode::UNAUTHORIZED,
            true,
            None,
        )
    }

    pub fn quota_exceeded() -> Self {
        Self::new(
            "API quota exhausted",
            ErrorCode::ApiQuotaExceeded,
            StatusCode::TOO_MANY_REQUESTS,
            true,
            None,
        )
    }

    pub fn rate_limited(retry_after: Option<&str>) -> Self {
        Self::new(
            "Too many requests, please try again later",
            ErrorCode::ApiRateLimited,
            StatusCode::TOO_MANY_REQUESTS,
            true,
            Some(json!({ "retryAfter": retry_after })),
        )
    }

    pub fn upstream_unavailable(status: StatusCode, cause: &str) -> Self {
        Self::new(
            "DeepSeek service is temporarily unavailable",
            ErrorCode::ApiServiceUnavailable,
            status,
            true,
            Some(json!({ "originalError": cause })),
        )
    }

    pub fn model(message: &str) -> Self {
        Self::new(
            format!("DeepSeek model error: {message}"),
            ErrorCode::ModelError,
            StatusCode::BAD_REQUEST,
            true,
            Some(json!({ "model": message })),
        )
    }

    pub fn token_limit(limit: usize) -> Self {
        Self::new(
            format!("Input exceeds the token limit ({limit})"),
            ErrorCode::TokenLimitExceeded,
            StatusCode::BAD_REQUEST,
            true,
            Some(json!({ "limit": limit })),
        )
    }

    pub fn stream(message: &str) -> Self {
        Self::new(
            format!("Stream processing error: {message}"),
            ErrorCode::StreamError,
            StatusCode::INTERNAL_SERVER_ERROR,
            true,
            None,
        )
    }

    pub fn completion_failed(details: Option<Value>) -> Self {
        Self::new(
            "DeepSeek returned an empty choice list",
            ErrorCode::CompletionFailed,
            StatusCode::BAD_GATEWAY,
            true,
            details,
        )
    }

    pub fn json_parse(data: &str) -> Self {
        let snippet: String = data.chars().take(PARSE_ERROR_SNIPPET_LEN).collect();
        Self::new(
            "Failed to parse JSON data",
            ErrorCode::JsonParseError,
            StatusCode::BAD_REQUEST,
            true,
            Some(json!({ "data": snippet })),
        )
    }

    pub fn empty_response() -> Self {
        Self::new(
            "Upstream returned an empty response",
            ErrorCode::ResponseEmpty,
            StatusCode::BAD_GATEWAY,
            true,
            None,
        )
    }

    pub fn empty_content(details: Option<Value>) -> Self {
        Self::new(
            "DeepSeek returned empty content",
            ErrorCode::ResponseEmpty,
            StatusCode::BAD_GATEWAY,
            true,
            details,
        )
    }

    pub fn internal(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::new(
            message,
            ErrorCode::InternalServerError,
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
            details,
        )
    }

    pub fn not_found(method: &str, path: &str) -> Self {
        Self::new(
            format!("Route not found: {method} {path}"),
            ErrorCode::ResourceNotFound,
            StatusCode::NOT_FOUND,
            true,
            Some(json!({ "path": path, "method": method })),
        )
    }

    /// Classify a non-2xx response from the upstream completion API.
    ///
    /// `body` is the raw response text; OpenAI compatible providers
    /// return `{"error": {"message": ..., "type": ...}}`.
    pub fn from_upstream_response(status: StatusCode, body: &str, retry_after: Option<&str>) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let upstream_error = parsed.as_ref().map(|v| &v["error"]);
        let error_type = upstream_error.and_then(|e| e["type"].as_str());
        let message = upstream_error
            .and_then(|e| e["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("Upstream API error (HTTP {})", status.as_u16())
                } else {
                    body.trim().to_string()
                }
            });

        match status.as_u16() {
            400 if error_type == Some("invalid_request_error") => Self::validation(
                message,
                Some(json!({ "originalError": { "status": 400, "body": parsed } })),
            ),
            400 => Self::model(&message),
            401 => Self::api_key(),
            // DeepSeek reports an exhausted balance as 402
            402 => Self::quota_exceeded(),
            429 => Self::rate_limited(retry_after),
            502..=504 => Self::upstream_unavailable(status, &message),
            _ => Self::internal(
                message,
                Some(json!({ "originalError": { "status": status.as_u16(), "body": parsed } })),
            ),
        }
    }

    /// Log representation including everything useful for diagnostics.
    pub fn to_log(&self, request_id: &str) -> Value {
        json!({
            "requestId": request_id,
            "errorCode": self.code,
            "message": self.message,
            "httpStatus": self.status.as_u16(),
            "timestamp": self.timestamp,
            "details": self.details,
            "isOperational": self.operational,
        })
    }

    pub fn body(&self) -> ErrorBody<'_> {
        ErrorBody {
            code: self.code,
            message: &self.message,
            timestamp: &self.timestamp,
            details: self.details.as_ref(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        let chain = error_chain(&err);

        if err.is_timeout() {
            return Self::timeout(DEFAULT_TIMEOUT_MS);
        }
        if let Some(status) = err.status() {
            return Self::from_upstream_response(status, "", None);
        }
        if err.is_connect() || err.is_request() {
            if has_io_kind(&err, io::ErrorKind::ConnectionRefused)
                || chain.contains("Connection refused")
            {
                return Self::connection_refused(&chain);
            }
            if chain.contains("dns error") || chain.contains("failed to lookup address") {
                return Self::dns_failed(&chain);
            }
            if has_io_kind(&err, io::ErrorKind::TimedOut) {
                return Self::timeout(DEFAULT_TIMEOUT_MS);
            }
            return Self::network(
                format!("Network error: {err}"),
                Some(json!({ "originalError": chain })),
            );
        }
        if err.is_decode() {
            return Self::json_parse(&chain);
        }
        if err.is_body() {
            return Self::network(
                format!("Network error: {err}"),
                Some(json!({ "originalError": chain })),
            );
        }

        Self::internal(err.to_string(), Some(json!({ "originalError": chain })))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::json_parse(&err.to_string())
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render an error and all of its sources as a single line.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

fn has_io_kind(err: &(dyn StdError + 'static), kind: io::ErrorKind) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == kind {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
