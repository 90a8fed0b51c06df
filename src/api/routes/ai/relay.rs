//! Relay of one upstream completion stream to one downstream SSE
//! response.
//!
//! The relay writes SSE `data` payloads into a bounded channel whose
//! receiving end is the HTTP response body. A closed channel means the
//! client went away; it is checked on every iteration so that no further
//! writes are attempted after a disconnect.

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use crate::core::ChatError;
use crate::deepseek::{ChunkStream, FinishReason};
use crate::sse::DONE;

/// How a relay loop ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Upstream signalled a finish reason, or ran out of frames (`None`).
    Finished(Option<FinishReason>),
    /// The downstream connection was closed.
    Disconnected,
    /// Upstream failed after the response had started.
    Failed(ChatError),
}

pub fn content_payload(content: &str) -> String {
    json!({ "content": content }).to_string()
}

pub fn error_payload(err: &ChatError) -> String {
    json!({ "error": err.message, "code": err.code }).to_string()
}

/// Forward `chunks` to `tx` until the upstream finishes, fails, or the
/// client disconnects. Never fails itself: once this runs the response
/// headers are committed, so upstream errors become one error event.
pub async fn relay_stream(
    request_id: String,
    mut chunks: ChunkStream,
    tx: mpsc::Sender<String>,
) -> RelayOutcome {
    let mut chunk_count = 0usize;
    let mut total_content = String::new();
    let mut reasoning_length = 0usize;
    let mut upstream_id: Option<String> = None;

    let outcome = loop {
        let next = chunks.next().await;

        if tx.is_closed() {
            tracing::info!("[{}] Client disconnected, stopping stream", request_id);
            break RelayOutcome::Disconnected;
        }

        let chunk = match next {
            None => break RelayOutcome::Finished(None),
            Some(Err(err)) => break RelayOutcome::Failed(err),
            Some(Ok(chunk)) => chunk,
        };

        if upstream_id.is_none() {
            if let Some(id) = &chunk.id {
                tracing::debug!("[{}] Upstream completion id: {}", request_id, id);
                upstream_id = Some(id.clone());
            }
        }

        let Some(choice) = chunk.choice() else {
            tracing::warn!("[{}] Received chunk without a choice, skipping", request_id);
            continue;
        };

        if let Some(reason) = &choice.finish_reason {
            tracing::info!("[{}] Stream finished, reason: {}", request_id, reason);
            break RelayOutcome::Finished(Some(reason.clone()));
        }

        reasoning_length += choice.reasoning().len();

        let content = choice.content();
        if content.is_empty() {
            continue;
        }
        total_content.push_str(content);
        chunk_count += 1;

        if tx.send(content_payload(content)).await.is_err() {
            tracing::info!("[{}] Client disconnected, stopping stream", request_id);
            break RelayOutcome::Disconnected;
        }
    };

    match &outcome {
        RelayOutcome::Finished(_) => {
            let _ = tx.send(DONE.to_string()).await;
            tracing::info!(
                "[{}] Stream completed, chunks: {}, content length: {}, reasoning length: {}, upstream id: {}",
                request_id,
                chunk_count,
                total_content.len(),
                reasoning_length,
                upstream_id.as_deref().unwrap_or("none")
            );
        }
        RelayOutcome::Failed(err) => {
            tracing::error!(
                "[{}] Error while streaming: {}",
                request_id,
                err.to_log(&request_id)
            );
            if !tx.is_closed() {
                let _ = tx.send(error_payload(err)).await;
            }
        }
        RelayOutcome::Disconnected => {
            tracing::debug!(
                "[{}] Relayed {} chunks before disconnect",
                request_id,
                chunk_count
            );
        }
    }

    // Dropping `tx` ends the response body
    outcome
}
