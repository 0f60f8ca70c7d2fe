use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use mockito::Matcher;
use scribe_core::{
    ApiClient, ClientConfig, CredentialProvider, NoCredentials, SessionEnd, StaticToken,
    StreamOutcome, StreamSession,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

const GENERATE_BODY: &str = "event: progress\n\
data: {\"type\":\"progress\",\"message\":\"building\",\"progress\":30}\n\
\n\
data: {\"type\":\"chunk\",\"content\":\"Hello \"}\n\
\n\
data: {\"type\":\"chunk\",\"content\":\"world\"}\n\
\n\
event: done\n\
data: [DONE]\n";

fn session(base_url: String, credentials: Arc<dyn CredentialProvider>) -> StreamSession {
    let config = ClientConfig {
        base_url,
        ..ClientConfig::default()
    };
    StreamSession::new(ApiClient::new(config, credentials).unwrap())
}

async fn run(
    session: &StreamSession,
    endpoint: &str,
    payload: serde_json::Value,
) -> (SessionEnd, Vec<StreamOutcome>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let end = session.start(endpoint, &payload, tx).await;
    let mut outcomes = Vec::new();
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }
    (end, outcomes)
}

#[tokio::test]
async fn test_generation_stream_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/novel/chapter/generate")
        .match_header("accept", "text/event-stream")
        .match_header("authorization", "Bearer secret-token")
        .match_body(Matcher::PartialJson(json!({"chapterId": "7"})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(GENERATE_BODY)
        .create_async()
        .await;

    let session = session(
        format!("{}/api", server.url()),
        Arc::new(StaticToken::new("secret-token")),
    );
    let (end, outcomes) = run(
        &session,
        "/novel/chapter/generate",
        json!({"chapterId": "7", "wordCount": 3000}),
    )
    .await;

    mock.assert_async().await;
    assert_eq!(end, SessionEnd::Completed);
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes.last(), Some(&StreamOutcome::Complete));

    let state = session.state();
    assert!(!state.is_streaming);
    assert_eq!(state.content, "Hello world");
    assert_eq!(state.progress, 100);
    assert_eq!(state.message, "building");
}

#[tokio::test]
async fn test_http_error_is_single_error_outcome() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/novel/outline/generate")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":500,"message":"NullPointerException"}"#)
        .create_async()
        .await;

    let session = session(server.url(), Arc::new(NoCredentials));
    let (end, outcomes) = run(&session, "novel/outline/generate", json!({})).await;

    assert_eq!(end, SessionEnd::Failed);
    assert_eq!(
        outcomes,
        vec![StreamOutcome::Error {
            message: "Internal server error".to_string(),
            code: Some(500),
        }]
    );
    let state = session.state();
    assert_eq!(state.error.as_deref(), Some("Internal server error"));
    assert_eq!(state.error_code, Some(500));
}

#[tokio::test]
async fn test_unknown_status_uses_server_message() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/generate")
        .with_status(429)
        .with_body(r#"{"message":"Too many generations in progress"}"#)
        .create_async()
        .await;

    let session = session(server.url(), Arc::new(NoCredentials));
    let (_, outcomes) = run(&session, "generate", json!({})).await;
    assert_eq!(
        outcomes,
        vec![StreamOutcome::Error {
            message: "Too many generations in progress".to_string(),
            code: Some(429),
        }]
    );
}

#[tokio::test]
async fn test_connection_failure_reports_error_without_code() {
    // Nothing listens on port 1
    let session = session("http://127.0.0.1:1".to_string(), Arc::new(NoCredentials));
    let (end, outcomes) = run(&session, "generate", json!({})).await;

    assert_eq!(end, SessionEnd::Failed);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(&outcomes[0], StreamOutcome::Error { code: None, .. }));
}

#[tokio::test]
async fn test_error_frame_then_close_has_no_complete() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/generate")
        .with_status(200)
        .with_body("data: {\"type\":\"chunk\",\"content\":\"Once\"}\nevent: error\ndata: model overloaded\ndata: [DONE]\n")
        .create_async()
        .await;

    let session = session(server.url(), Arc::new(NoCredentials));
    let (end, outcomes) = run(&session, "generate", json!({})).await;

    assert_eq!(end, SessionEnd::Failed);
    assert_eq!(
        outcomes,
        vec![
            StreamOutcome::Chunk {
                text: "Once".to_string()
            },
            StreamOutcome::Error {
                message: "model overloaded".to_string(),
                code: None,
            },
        ]
    );
}

#[tokio::test]
async fn test_abort_after_completion_is_noop() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/generate")
        .with_status(200)
        .with_body(GENERATE_BODY)
        .create_async()
        .await;

    let session = session(server.url(), Arc::new(NoCredentials));
    let handle = session.abort_handle();
    let (end, outcomes) = run(&session, "generate", json!({})).await;
    assert_eq!(end, SessionEnd::Completed);

    handle.abort();
    session.abort();
    session.abort();
    assert!(!handle.is_active());
    assert_eq!(outcomes.len(), 4);
    assert_eq!(session.state().content, "Hello world");

    session.reset();
    assert_eq!(session.state().content, "");
}

#[tokio::test]
async fn test_session_is_reusable() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/generate")
        .with_status(200)
        .with_body(GENERATE_BODY)
        .expect(2)
        .create_async()
        .await;

    let session = session(server.url(), Arc::new(NoCredentials));
    let (first, _) = run(&session, "generate", json!({})).await;
    let (second, outcomes) = run(&session, "generate", json!({})).await;

    assert_eq!(first, SessionEnd::Completed);
    assert_eq!(second, SessionEnd::Completed);
    assert_eq!(outcomes.len(), 4);
    // Content does not leak across sessions
    assert_eq!(session.state().content, "Hello world");
}

#[tokio::test]
async fn test_abort_while_server_stalls_ends_silently() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/generate")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_secs(2));
            w.write_all(GENERATE_BODY.as_bytes())
        })
        .create_async()
        .await;

    let session = Arc::new(session(server.url(), Arc::new(NoCredentials)));
    let handle = session.abort_handle();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let running = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.start("generate", &json!({}), tx).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.is_active());
    assert!(session.is_streaming());
    session.abort();

    // Well before the server would have sent anything
    let end = timeout(Duration::from_secs(1), running)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(end, SessionEnd::Cancelled);
    assert!(rx.recv().await.is_none());
    assert!(!session.is_streaming());
    assert!(!handle.is_active());
    assert_eq!(session.state().error, None);

    handle.abort();
}
