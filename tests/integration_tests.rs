//! Integration tests for the Anthropic-to-OpenAI protocol translation proxy.
//!
//! Exercises `server::messages`/`server::health` against a real `AppState`
//! backed by a `wiremock` stand-in for the upstream, the way a client would
//! see the proxy end to end.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use claude_model_router::config::{CliArgs, Config};
use claude_model_router::server::{self, AppState};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_state(upstream_base: String) -> Arc<AppState> {
    let mut cli = CliArgs::parse(Vec::<String>::new().into_iter()).unwrap();
    cli.upstream = Some(upstream_base);
    let config = Config::from_args_and_env(cli).unwrap();
    Arc::new(AppState::new(config).unwrap())
}

fn headers_with_key() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", "test-key".parse().unwrap());
    headers
}

#[tokio::test]
async fn health_reports_required_capabilities() {
    let state = test_state("http://127.0.0.1:1".to_string()).await;
    let response = server::health(State(state)).await;
    let body = response.0;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["capabilities"]["supports_responses"], true);
    assert_eq!(body["capabilities"]["retry_on_not_chat_model"], true);
}

/// S1 — non-streaming text round trip.
#[tokio::test]
async fn non_streaming_text_scenario() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c1",
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5}
        })))
        .mount(&mock_server)
        .await;

    let state = test_state(mock_server.uri()).await;
    let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
    let response = server::messages(State(state), headers_with_key(), body.to_string().into()).await;
    assert_eq!(response.status(), 200);

    let parsed: Value = response_json(response).await;
    assert_eq!(parsed["id"], "msg_c1");
    assert_eq!(parsed["content"][0]["text"], "hello");
    assert_eq!(parsed["stop_reason"], "end_turn");
    assert_eq!(parsed["usage"]["input_tokens"], 3);
    assert_eq!(parsed["usage"]["output_tokens"], 5);
}

/// S3 — Chat→Responses one-shot fallback on a not-a-chat-model rejection.
#[tokio::test]
async fn chat_to_responses_fallback_scenario() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "This model is not a chat model and thus not supported in the v1/chat/completions endpoint"}
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "r1",
            "model": "o3-mini",
            "output": [{"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "hi there"}]}],
            "usage": {"input_tokens": 2, "output_tokens": 4}
        })))
        .mount(&mock_server)
        .await;

    let state = test_state(mock_server.uri()).await;
    let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
    let response = server::messages(State(state), headers_with_key(), body.to_string().into()).await;
    assert_eq!(response.status(), 200);

    let parsed: Value = response_json(response).await;
    assert_eq!(parsed["content"][0]["text"], "hi there");

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

/// S6 — malformed JSON body.
#[tokio::test]
async fn malformed_body_returns_invalid_request() {
    let state = test_state("http://127.0.0.1:1".to_string()).await;
    let response = server::messages(State(state), headers_with_key(), "not json".into()).await;
    assert_eq!(response.status(), 400);

    let parsed: Value = response_json(response).await;
    assert_eq!(parsed["error"]["type"], "invalid_request");
    assert_eq!(parsed["error"]["message"], "Invalid JSON");
}

#[tokio::test]
async fn missing_credential_returns_unauthorized() {
    let state = test_state("http://127.0.0.1:1".to_string()).await;
    let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
    let response = server::messages(State(state), HeaderMap::new(), body.to_string().into()).await;
    assert_eq!(response.status(), 401);
}

/// S3, streaming variant — the fallback must fire before any SSE bytes are
/// forwarded, since the initial status is known ahead of the stream body.
#[tokio::test]
async fn streaming_chat_to_responses_fallback_scenario() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "This model is not a chat model and thus not supported in the v1/chat/completions endpoint"}
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(
                    "data: {\"type\":\"response.created\",\"response\":{\"id\":\"r1\",\"model\":\"o3-mini\"}}\n\n\
                     data: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\n\n\
                     data: {\"type\":\"response.completed\",\"response\":{\"id\":\"r1\",\"usage\":{\"input_tokens\":1,\"output_tokens\":1}}}\n\n\
                     data: [DONE]\n\n",
                    "text/event-stream",
                ),
        )
        .mount(&mock_server)
        .await;

    let state = test_state(mock_server.uri()).await;
    let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}], "stream": true});
    let response = server::messages(State(state), headers_with_key(), body.to_string().into()).await;
    assert_eq!(response.status(), 200);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url.path(), "/v1/chat/completions");
    assert_eq!(requests[1].url.path(), "/v1/responses");
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
