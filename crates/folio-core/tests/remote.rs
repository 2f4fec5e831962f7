//! HTTP contract tests for the RAG server client.
//!
//! These pin down the wire format of `/retrieve-context` and `/chat`:
//! request bodies, context normalization and error mapping.

use folio_core::ai::RemoteClient;
use folio_core::error::{GenerationError, RetrievalError};
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn collect_reply(client: &RemoteClient, query: &str) -> String {
    let mut stream = client.chat_stream(query).await.expect("stream opens");
    let mut reply = String::new();
    while let Some(chunk) = stream.next().await {
        reply.push_str(&chunk.expect("chunk"));
    }
    reply
}

/// A loopback address with nothing listening on it.
fn closed_port_uri() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}", addr)
}

// ── /retrieve-context ───────────────────────────────────────────────

#[tokio::test]
async fn test_retrieve_joins_passages_with_blank_line() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/retrieve-context"))
        .and(body_json(json!({"query": "projects"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"context": ["a", "b"]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    assert_eq!(client.retrieve("projects").await.unwrap(), "a\n\nb");
}

#[tokio::test]
async fn test_retrieve_keeps_server_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/retrieve-context"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"context": ["z", "a", "m"]})))
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    assert_eq!(client.retrieve("q").await.unwrap(), "z\n\na\n\nm");
}

#[tokio::test]
async fn test_retrieve_accepts_plain_string() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/retrieve-context"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"context": "one passage"})))
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    assert_eq!(client.retrieve("q").await.unwrap(), "one passage");
}

#[tokio::test]
async fn test_retrieve_missing_field_is_empty_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/retrieve-context"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    assert_eq!(client.retrieve("q").await.unwrap(), "");
}

#[tokio::test]
async fn test_retrieve_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/retrieve-context"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    let err = client.retrieve("q").await.unwrap_err();
    assert!(matches!(err, RetrievalError::Status(s) if s.as_u16() == 500), "got {err:?}");
}

#[tokio::test]
async fn test_retrieve_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/retrieve-context"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"context": 42})))
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    let err = client.retrieve("q").await.unwrap_err();
    assert!(matches!(err, RetrievalError::Malformed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_retrieve_unreachable_server() {
    let client = RemoteClient::new(&closed_port_uri());
    let err = client.retrieve("q").await.unwrap_err();
    assert!(matches!(err, RetrievalError::Request(_)), "got {err:?}");
}

#[tokio::test]
async fn test_chat_unreachable_server() {
    let client = RemoteClient::new(&closed_port_uri());
    let err = client.chat_stream("q").await.err().expect("connection refused");
    assert!(matches!(err, GenerationError::Request(_)), "got {err:?}");
}

// ── /chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_streams_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_json(json!({"query": "Who is Ethan?"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ethan is a développeur."))
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteClient::new(&format!("{}/", server.uri()));
    assert_eq!(collect_reply(&client, "Who is Ethan?").await, "Ethan is a développeur.");
}

#[tokio::test]
async fn test_chat_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    let err = client.chat_stream("q").await.err().expect("status error");
    assert!(matches!(err, GenerationError::Status(s) if s.as_u16() == 503), "got {err:?}");
}

#[tokio::test]
async fn test_chat_without_body_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    let err = client.chat_stream("q").await.err().expect("no body");
    assert!(matches!(err, GenerationError::NoBody), "got {err:?}");
}

// ── GET / ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "Portfolio RAG Backend is running."})),
        )
        .mount(&server)
        .await;

    let client = RemoteClient::new(&server.uri());
    assert_eq!(client.health().await.unwrap(), "Portfolio RAG Backend is running.");
}
