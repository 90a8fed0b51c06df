//! Integration tests for the AI chat API endpoints

mod test_utils;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{Body, BodyDataStream},
        http::{Request, StatusCode, header},
    };
    use futures::StreamExt;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use tower::util::ServiceExt;

    use deepseek_chat::core::ChatError;
    use deepseek_chat::deepseek::{FinishReason, StreamChunk};

    use crate::test_utils::{
        body_to_json, body_to_string, chat_body, scripted_app, stalled_app, test_app,
    };

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    /// Payloads of every `data:` field in an event stream body
    fn data_payloads(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|value| value.strip_prefix(' ').unwrap_or(value).to_string())
            .collect()
    }

    fn upstream_frame(content: Option<&str>, finish_reason: Option<&str>) -> String {
        let delta = match content {
            Some(content) => json!({ "content": content }),
            None => json!({}),
        };
        let frame = json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
        });
        format!("data: {frame}\n\n")
    }

    /// Tests a single shot completion end to end against a stub upstream
    #[tokio::test]
    async fn it_returns_completion() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "deepseek-chat",
                "messages": [{"role": "user", "content": "Hi"}],
                "max_tokens": 3000,
                "temperature": 0.7
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "id": "chatcmpl-1",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "hello"},
                        "finish_reason": "stop"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let app = test_app(&server.url());
        let response = app
            .oneshot(post_json("/api/ai/chat-deepseek", chat_body("Hi")))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], "hello");
        assert!(body["requestId"].as_str().unwrap().starts_with("req_"));
        assert!(body["timestamp"].is_string());
    }

    /// Tests that a missing messages field is rejected before any
    /// upstream call
    #[tokio::test]
    async fn it_rejects_missing_messages() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .expect(0)
            .create_async()
            .await;

        let app = test_app(&server.url());
        let response = app
            .oneshot(post_json("/api/ai/chat-deepseek", json!({}).to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], 1002);
        assert!(body["requestId"].is_string());
        mock.assert_async().await;
    }

    /// Tests empty and malformed message arrays
    #[tokio::test]
    async fn it_rejects_invalid_messages() {
        let cases = [
            json!({ "messages": [] }),
            json!({ "messages": "hello" }),
            json!({ "messages": [{"role": "robot", "content": "hi"}] }),
            json!({ "messages": [{"role": "user", "content": "   "}] }),
            json!({ "messages": [{"role": "user"}] }),
        ];

        for case in cases {
            let app = test_app("http://127.0.0.1:9");
            let response = app
                .oneshot(post_json("/api/ai/chat-deepseek", case.to_string()))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "case {case}");
            let body = body_to_json(response.into_body()).await;
            let code = body["error"]["code"].as_u64().unwrap();
            assert!(code == 1001 || code == 1002, "case {case} gave {code}");
        }
    }

    /// Tests the content length limit
    #[tokio::test]
    async fn it_rejects_too_long_content() {
        let app = test_app("http://127.0.0.1:9");
        let response = app
            .oneshot(post_json(
                "/api/ai/chat-deepseek",
                chat_body(&"a".repeat(32_001)),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], 4001);
    }

    /// Tests that invalid JSON maps to a parse error
    #[tokio::test]
    async fn it_rejects_invalid_json() {
        let app = test_app("http://127.0.0.1:9");
        let response = app
            .oneshot(post_json(
                "/api/ai/chat-deepseek",
                "{\"messages\": [".to_string(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], 5000);
    }

    /// Tests that a body over the configured limit is refused
    #[tokio::test]
    async fn it_rejects_oversized_body() {
        let app = test_app("http://127.0.0.1:9");
        let response = app
            .oneshot(post_json(
                "/api/ai/chat-deepseek",
                chat_body(&"a".repeat(2 * 1024 * 1024)),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], 1001);
    }

    /// Tests that an upstream auth failure keeps its status
    #[tokio::test]
    async fn it_passes_through_upstream_auth_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Authentication Fails","type":"authentication_error"}}"#)
            .create_async()
            .await;

        let app = test_app(&server.url());
        let response = app
            .oneshot(post_json("/api/ai/chat-deepseek", chat_body("Hi")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], 3000);
    }

    /// Tests the streamed relay of upstream deltas
    async fn next_frame(frames: &mut BodyDataStream) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
            .await
            .expect("No frame before timeout")
            .unwrap()
            .unwrap();
        String::from_utf8(frame.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn it_sends_keep_alive_while_upstream_is_silent() {
        let app = stalled_app(Duration::from_millis(50));
        let response = app
            .oneshot(post_json("/api/ai/chat-stream-deepseek", chat_body("Hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut frames = response.into_body().into_data_stream();
        assert_eq!(next_frame(&mut frames).await, "data: {\"content\":\"A\"}\n\n");
        assert_eq!(next_frame(&mut frames).await, ": keep-alive\n\n");
        assert_eq!(next_frame(&mut frames).await, ": keep-alive\n\n");
    }

    #[tokio::test]
    async fn it_relays_stream() {
        let mut server = Server::new_async().await;
        let upstream_body = [
            ": keep-alive\n\n".to_string(),
            upstream_frame(Some("A"), None),
            upstream_frame(Some("B"), None),
            upstream_frame(None, Some("stop")),
            "data: [DONE]\n\n".to_string(),
        ]
        .concat();
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({ "stream": true })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(upstream_body)
            .create_async()
            .await;

        let app = test_app(&server.url());
        let response = app
            .oneshot(post_json("/api/ai/chat-stream-deepseek", chat_body("Hi")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body = body_to_string(response.into_body()).await;
        mock.assert_async().await;
        assert_eq!(
            data_payloads(&body),
            vec![r#"{"content":"A"}"#, r#"{"content":"B"}"#, "[DONE]"]
        );
    }

    /// Tests that a failure before streaming starts is a JSON error
    #[tokio::test]
    async fn it_returns_json_error_before_stream_starts() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("retry-after", "30")
            .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
            .create_async()
            .await;

        let app = test_app(&server.url());
        let response = app
            .oneshot(post_json("/api/ai/chat-stream-deepseek", chat_body("Hi")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let content_type = response.headers()[header::CONTENT_TYPE].clone();
        assert_eq!(content_type, "application/json");
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], 3003);
    }

    /// Tests that an upstream failure after streaming starts becomes an
    /// error event
    #[tokio::test]
    async fn it_sends_error_event_mid_stream() {
        let app = scripted_app(vec![
            Ok(StreamChunk::content("partial")),
            Err(ChatError::network("connection reset", None)),
        ]);
        let response = app
            .oneshot(post_json("/api/ai/chat-stream-deepseek", chat_body("Hi")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_to_string(response.into_body()).await;
        let payloads = data_payloads(&body);

        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], r#"{"content":"partial"}"#);
        let event: serde_json::Value = serde_json::from_str(&payloads[1]).unwrap();
        assert_eq!(event["error"], "connection reset");
        assert_eq!(event["code"], 4002);
    }

    /// Tests that a malformed upstream frame ends the stream with a
    /// parse error event
    #[tokio::test]
    async fn it_reports_malformed_upstream_frame() {
        let mut server = Server::new_async().await;
        let upstream_body = [
            upstream_frame(Some("A"), None),
            "data: {\"choices\": [\n\n".to_string(),
        ]
        .concat();
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(upstream_body)
            .create_async()
            .await;

        let app = test_app(&server.url());
        let response = app
            .oneshot(post_json("/api/ai/chat-stream-deepseek", chat_body("Hi")))
            .await
            .unwrap();

        let body = body_to_string(response.into_body()).await;
        let payloads = data_payloads(&body);
        assert_eq!(payloads[0], r#"{"content":"A"}"#);
        let event: serde_json::Value = serde_json::from_str(&payloads[1]).unwrap();
        assert_eq!(event["code"], 5000);
    }

    /// Tests that the stream ends cleanly on a finish reason from a
    /// scripted provider
    #[tokio::test]
    async fn it_ends_stream_on_finish_reason() {
        let app = scripted_app(vec![
            Ok(StreamChunk::content("A")),
            Ok(StreamChunk::finished(FinishReason::Length)),
            Ok(StreamChunk::content("ignored")),
        ]);
        let response = app
            .oneshot(post_json("/api/ai/chat-stream-deepseek", chat_body("Hi")))
            .await
            .unwrap();

        let body = body_to_string(response.into_body()).await;
        assert_eq!(data_payloads(&body), vec![r#"{"content":"A"}"#, "[DONE]"]);
    }

    /// Tests the API health endpoint
    #[tokio::test]
    async fn it_reports_health() {
        let app = scripted_app(vec![]);
        let response = app.oneshot(get("/api/ai/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "healthy");
        assert!(body["requestId"].is_string());
        assert!(body.get("upstream").is_none());

        let app = scripted_app(vec![]);
        let response = app
            .oneshot(get("/api/ai/health?upstream=true"))
            .await
            .unwrap();
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["upstream"], "reachable");
    }

    /// Tests the service level health endpoint
    #[tokio::test]
    async fn it_reports_service_health() {
        let app = scripted_app(vec![]);
        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "DeepSeek Chat API");
    }

    /// Tests the JSON 404 for unknown routes
    #[tokio::test]
    async fn it_returns_json_not_found() {
        let app = scripted_app(vec![]);
        let response = app
            .oneshot(post_json("/api/unknown", "{}".to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_to_json(response.into_body()).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], 6002);
        assert_eq!(body["path"], "/api/unknown");
        assert_eq!(body["method"], "POST");
    }
}
