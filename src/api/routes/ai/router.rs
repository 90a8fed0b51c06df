//! Router for the AI chat API

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderValue, header},
    response::{IntoResponse, Response, sse::Event, sse::KeepAlive, sse::Sse},
    routing::{get, post},
};
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;

use super::public;
use super::relay::relay_stream;
use crate::api::public::{ApiError, json_rejection_error};
use crate::api::state::SharedState;
use crate::api::utils::{generate_request_id, timestamp};
use crate::core::ChatError;
use crate::deepseek::{ChatMessage, ChatOptions, parse_messages, validate_options};

/// Check the request body shape before anything is sent upstream.
fn prepare_request(
    payload: Result<Json<public::ChatRequest>, JsonRejection>,
    body_limit: usize,
) -> Result<(Vec<ChatMessage>, ChatOptions), ChatError> {
    let Json(request) = payload.map_err(|rejection| json_rejection_error(rejection, body_limit))?;

    let messages = request
        .messages
        .filter(|m| !m.is_null())
        .ok_or_else(|| ChatError::missing_field("messages"))?;
    let messages = parse_messages(&messages)?;
    let options = request.options.unwrap_or_default();
    validate_options(&options)?;

    Ok((messages, options))
}

/// Single shot completion
async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<public::ChatRequest>, JsonRejection>,
) -> Result<Json<public::ChatResponse>, ApiError> {
    let request_id = generate_request_id();
    tracing::info!("[{}] Handling chat request", request_id);

    let (messages, options) = prepare_request(payload, state.config.body_limit)
        .map_err(|e| ApiError::new(e, &request_id))?;
    tracing::info!(
        "[{}] Request validated, message count: {}",
        request_id,
        messages.len()
    );

    let data = state
        .provider
        .complete(&messages, &options)
        .await
        .map_err(|e| ApiError::new(e, &request_id))?;
    tracing::info!(
        "[{}] DeepSeek responded, content length: {}",
        request_id,
        data.len()
    );

    Ok(Json(public::ChatResponse {
        success: true,
        data,
        request_id,
        timestamp: timestamp(),
    }))
}

/// Stream a completion back as server-sent events
async fn chat_stream_handler(
    State(state): State<SharedState>,
    payload: Result<Json<public::ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request_id = generate_request_id();
    tracing::info!("[{}] Handling streaming chat request", request_id);

    // Until the upstream stream is open every failure is a plain JSON
    // error response.
    let (messages, options) = prepare_request(payload, state.config.body_limit)
        .map_err(|e| ApiError::new(e, &request_id))?;
    tracing::info!(
        "[{}] Request validated, message count: {}",
        request_id,
        messages.len()
    );

    let chunks = state
        .provider
        .stream_complete(&messages, &options)
        .await
        .map_err(|e| ApiError::new(e, &request_id))?;

    // From here on the response is committed to SSE
    tracing::info!("[{}] Stream started", request_id);

    // Capacity of one: the relay holds at most one delta that the
    // client has not consumed yet.
    let (tx, rx) = mpsc::channel::<String>(1);
    tokio::spawn(relay_stream(request_id, chunks, tx));

    let sse_stream =
        ReceiverStream::new(rx).map(|payload| Ok::<Event, Infallible>(Event::default().data(payload)));

    let mut resp = Sse::new(sse_stream)
        .keep_alive(
            KeepAlive::default()
                .text("keep-alive")
                .interval(state.config.keep_alive_interval),
        )
        .into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Cache-Control"),
    );

    Ok(resp)
}

/// Liveness probe, optionally checking the upstream as well
async fn health_handler(
    State(state): State<SharedState>,
    Query(params): Query<public::HealthQuery>,
) -> Json<public::HealthResponse> {
    let request_id = generate_request_id();
    tracing::debug!("[{}] Health check", request_id);

    let upstream = if params.upstream.unwrap_or(false) {
        let reachable = state.provider.health_check().await;
        Some(if reachable { "reachable" } else { "unreachable" }.to_string())
    } else {
        None
    };

    Json(public::HealthResponse {
        success: true,
        status: "healthy".to_string(),
        timestamp: timestamp(),
        request_id,
        upstream,
    })
}

/// Create the AI router
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/chat-deepseek", post(chat_handler))
        .route("/chat-stream-deepseek", post(chat_stream_handler))
        .route("/health", get(health_handler))
}
