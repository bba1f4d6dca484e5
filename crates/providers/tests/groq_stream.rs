use std::time::Duration;

use blue_core::{
    llm::ChatError, CancelToken, SessionConfig, SessionError, StreamRequest, StreamingChatSession,
};
use blue_providers::{GroqClient, GroqConfig};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(chunks: &[&str]) -> String {
    let mut body = String::from(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
    );
    for c in chunks {
        let ev = json!({"choices": [{"delta": {"content": c}, "finish_reason": null}]});
        body.push_str(&format!("data: {}\n\n", ev));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

fn session(server: &MockServer) -> StreamingChatSession<GroqClient> {
    let client = GroqClient::new(GroqConfig::with_base_url("test-key", server.uri())).unwrap();
    StreamingChatSession::new(
        client,
        SessionConfig {
            pacing: Duration::from_millis(1),
            ..SessionConfig::default()
        },
    )
}

#[tokio::test]
async fn streams_reply_through_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "mixtral-8x7b-32768",
            "stream": true,
            "max_tokens": 2048
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&["Hi", " there", "!"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let s = session(&server);
    let text = s
        .start(StreamRequest::new("Hello", CancelToken::new()).with_model("not-a-real-model"))
        .unwrap()
        .into_text()
        .await
        .unwrap();
    assert_eq!(text, "Hi there!");
}

#[tokio::test]
async fn persona_prompt_is_sent_as_system_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gemma2-9b-it",
            "messages": [
                {"role": "system", "content": "You are Luna."},
                {"role": "user", "content": "hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse(&["ok"]), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let s = session(&server);
    let text = s
        .start(
            StreamRequest::new("hi", CancelToken::new())
                .with_model("gemma2-9b-it")
                .with_system_prompt(Some("You are Luna.".into())),
        )
        .unwrap()
        .into_text()
        .await
        .unwrap();
    assert_eq!(text, "ok");
}

#[tokio::test]
async fn auth_failure_carries_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Invalid API Key", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let s = session(&server);
    let err = s
        .start(StreamRequest::new("Hello", CancelToken::new()))
        .unwrap()
        .into_text()
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::Provider(ChatError::Auth("Invalid API Key".into()))
    );
    assert_eq!(err.to_string(), "failed to generate response: Invalid API Key");
}

#[tokio::test]
async fn mid_stream_error_event_ends_session() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Partial \"}}]}\n\n",
        "data: {\"error\":{\"message\":\"model overloaded\"}}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let s = session(&server);
    let mut f = s.start(StreamRequest::new("go", CancelToken::new())).unwrap();
    assert_eq!(f.next().await, Some(Ok("Partial ".to_string())));
    let err = f.next().await.unwrap().unwrap_err();
    assert!(err.to_string().contains("model overloaded"));
    assert_eq!(f.next().await, None);
}

#[tokio::test]
async fn cancel_before_response_arrives() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&["late"]), "text/event-stream")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let s = session(&server);
    let cancel = CancelToken::new();
    let mut f = s.start(StreamRequest::new("go", cancel.clone())).unwrap();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });
    let next = tokio::time::timeout(Duration::from_secs(5), f.next())
        .await
        .expect("cancel observed while connecting");
    assert_eq!(next, Some(Err(SessionError::Cancelled)));
}

#[tokio::test]
async fn empty_input_never_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let s = session(&server);
    assert!(matches!(
        s.start(StreamRequest::new("   ", CancelToken::new())),
        Err(SessionError::EmptyInput)
    ));
}

#[tokio::test]
async fn body_cut_off_before_done_is_an_error() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}",
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let s = session(&server);
    let err = s
        .start(StreamRequest::new("go", CancelToken::new()))
        .unwrap()
        .into_text()
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Provider(ChatError::Decode(_))));
}

#[tokio::test]
async fn finish_reason_without_done_completes() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Done here\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let s = session(&server);
    let text = s
        .start(StreamRequest::new("go", CancelToken::new()))
        .unwrap()
        .into_text()
        .await
        .unwrap();
    assert_eq!(text, "Done here");
}

#[tokio::test]
async fn idle_limit_ends_a_silent_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&["late"]), "text/event-stream")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let mut cfg = GroqConfig::with_base_url("test-key", server.uri());
    cfg.stream_idle_timeout = Some(Duration::from_millis(200));
    let s = StreamingChatSession::new(GroqClient::new(cfg).unwrap(), SessionConfig::default());
    let res = tokio::time::timeout(
        Duration::from_secs(5),
        s.start(StreamRequest::new("go", CancelToken::new()))
            .unwrap()
            .into_text(),
    )
    .await
    .expect("idle limit fires before the server answers");
    assert!(matches!(
        res,
        Err(SessionError::Provider(ChatError::Timeout(_)))
    ));
}
