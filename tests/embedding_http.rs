//! HTTP behavior of the embedding and reasoning clients against a mock
//! server: response parsing, auth headers, and the retry policy's
//! fail-fast path for non-retryable client errors.

use httpmock::prelude::*;

use docgraph::embedding::{EmbeddingClient, OpenAiEmbeddingClient};
use docgraph::relations::{OpenAiReasoningClient, PairContext, ReasoningClient};

fn embed_client(server: &MockServer, max_retries: u32) -> OpenAiEmbeddingClient {
    OpenAiEmbeddingClient::new(
        "text-embedding-3-small".to_string(),
        3,
        server.url("/v1/embeddings"),
        "test-key".to_string(),
        5,
        max_retries,
    )
    .unwrap()
}

#[tokio::test]
async fn openai_embeddings_success() {
    let server = MockServer::start_async().await;

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .header("authorization", "Bearer test-key")
                .json_body_partial(r#"{"model": "text-embedding-3-small"}"#);
            then.status(200).json_body(serde_json::json!({
                "data": [
                    { "index": 0, "embedding": [0.1, 0.2, 0.3] },
                    { "index": 1, "embedding": [0.4, 0.5, 0.6] }
                ]
            }));
        })
        .await;

    let client = embed_client(&server, 0);
    let vectors = client
        .embed(&["alpha".to_string(), "beta".to_string()])
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
    assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
}

#[tokio::test]
async fn openai_embeddings_client_error_does_not_retry() {
    let server = MockServer::start_async().await;

    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(401)
                .json_body(serde_json::json!({ "error": "bad api key" }));
        })
        .await;

    let client = embed_client(&server, 3);
    let err = client.embed(&["alpha".to_string()]).await.unwrap_err();

    // One call, not four: 4xx is not retryable.
    mock.assert_hits_async(1).await;
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn openai_embeddings_retries_server_errors() {
    let server = MockServer::start_async().await;

    let failing = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(500).body("upstream exploded");
        })
        .await;

    let client = embed_client(&server, 1);
    let err = client.embed(&["alpha".to_string()]).await.unwrap_err();

    // Initial attempt plus one retry.
    failing.assert_hits_async(2).await;
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn reasoning_client_parses_chat_response() {
    let server = MockServer::start_async().await;

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200).json_body(serde_json::json!({
                "choices": [
                    { "message": { "content":
                        "{\"relation_type\": \"REFERENCES\", \"confidence\": 0.85, \"reasoning\": \"B cites A\"}"
                    } }
                ]
            }));
        })
        .await;

    let client = OpenAiReasoningClient::new(
        "gpt-4o-mini".to_string(),
        server.url("/v1/chat/completions"),
        "test-key".to_string(),
        5,
        0,
    )
    .unwrap();

    let pair = PairContext {
        source_title: "Contract".to_string(),
        source_entities: vec!["Acme Corp (ORG)".to_string()],
        target_title: "Invoice".to_string(),
        target_entities: vec!["Acme Corp (ORG)".to_string()],
    };
    let judgement = client.classify(&pair).await.unwrap().unwrap();

    mock.assert_async().await;
    assert_eq!(judgement.relation_type.as_str(), "REFERENCES");
    assert!((judgement.confidence - 0.85).abs() < 1e-9);
}
