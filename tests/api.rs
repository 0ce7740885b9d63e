use async_trait::async_trait;
use axum::{ body::Body, http::{ Request, StatusCode }, Router };
use chat_buddy::context::ContextAugmenter;
use chat_buddy::history::MemoryStore;
use chat_buddy::llm::chat::{ ChatClient, ChatRequest, ChatStream, CompletionResponse };
use chat_buddy::mock::{ MockResponder, GREETING };
use chat_buddy::models::stream::StreamFrame;
use chat_buddy::relay::{ MockStreamSettings, Relay };
use chat_buddy::server::{ build_router, AppState };
use serde_json::{ json, Value };
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Upstream that rejects every call, as a provider with a revoked key would.
struct RejectingUpstream;

#[async_trait]
impl ChatClient for RejectingUpstream {
    async fn complete(&self, _: &ChatRequest) -> Result<CompletionResponse, Box<dyn Error + Send + Sync>> {
        Err("401 Unauthorized: invalid api key".into())
    }

    async fn stream_chat(&self, _: &ChatRequest) -> Result<ChatStream, Box<dyn Error + Send + Sync>> {
        Err("401 Unauthorized: invalid api key".into())
    }

    fn get_model(&self) -> String {
        "rejecting".into()
    }
}

fn app(upstream: Option<Arc<dyn ChatClient>>) -> Router {
    let has_key = upstream.is_some();
    let relay = Relay::new(
        upstream,
        ContextAugmenter::new(Arc::new(MemoryStore::new())),
        MockResponder::seeded(Some(1)),
        MockStreamSettings { batch_size: 3, delay: Duration::ZERO }
    );
    build_router(AppState::new(relay, has_key, "OpenAI"))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn empty_messages_are_rejected_without_a_stream() {
    let response = app(None)
        .oneshot(post_json("/api/chat", json!({ "messages": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"], "Messages are required and must be an array");
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    for body in [json!({}), json!({ "messages": "hi" }), json!({ "messages": [{ "role": "user" }] })] {
        let response = app(None).oneshot(post_json("/api/chat", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = app(None)
        .oneshot(
            Request::builder().method("POST").uri("/api/chat").body(Body::from("not json")).unwrap()
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mock_greeting_streams_as_frames() {
    let response = app(None)
        .oneshot(post_json("/api/chat", json!({ "messages": [{ "role": "user", "content": "hi" }] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache, no-transform");
    assert_eq!(response.headers()["connection"], "keep-alive");

    let body = body_text(response).await;
    assert!(body.ends_with("data: [DONE]\n\n"));

    let frames: Vec<StreamFrame> = body
        .split("\n\n")
        .filter(|block| !block.is_empty())
        .map(|block| StreamFrame::decode_data(block.strip_prefix("data: ").unwrap()).unwrap())
        .collect();
    assert_eq!(frames.iter().filter(|f| f.is_done()).count(), 1);

    let text: String = frames
        .iter()
        .filter_map(|f| match f {
            StreamFrame::Content(chunk) => Some(chunk.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, GREETING);
}

#[tokio::test]
async fn upstream_failure_before_streaming_is_a_json_error() {
    let response = app(Some(Arc::new(RejectingUpstream)))
        .oneshot(post_json("/api/chat", json!({ "messages": [{ "role": "user", "content": "hello" }] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"], "401 Unauthorized: invalid api key");
}

#[tokio::test]
async fn conversation_name_falls_back_without_credential() {
    let response = app(None)
        .oneshot(
            post_json(
                "/api/conversation-name",
                json!({ "messages": [{ "role": "user", "content": "Can you help me with taxes?" }] })
            )
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, json!({ "name": "Help Request" }));
}

#[tokio::test]
async fn conversation_name_reports_upstream_failure() {
    let response = app(Some(Arc::new(RejectingUpstream)))
        .oneshot(post_json("/api/conversation-name", json!({ "messages": [{ "role": "user", "content": "x" }] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["name"], "New Conversation");
    assert!(body["error"].as_str().unwrap().contains("invalid api key"));

    let response = app(None)
        .oneshot(post_json("/api/conversation-name", json!({ "messages": [] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_reports_mock_mode() {
    let response = app(None)
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(
        body,
        json!({ "status": "ok", "hasApiKey": false, "usingMock": true, "provider": "OpenAI" })
    );
}
