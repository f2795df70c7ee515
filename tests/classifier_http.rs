// tests/classifier_http.rs
// HttpClassifier against a local chat-completions stub.

use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use chrono::Utc;
use crypto_news_signals::classifier::{HttpClassifier, NewsClassifier};
use crypto_news_signals::error::ClassifyError;
use crypto_news_signals::event::{RawItem, Sentiment};
use serde_json::json;

fn raw_item() -> RawItem {
    RawItem {
        source_id: "tw-55".to_string(),
        text: "Miners capitulating as hashprice slides".to_string(),
        author: "onchain_desk".to_string(),
        url: None,
        engagement_score: 31.0,
        observed_at: Utc::now(),
    }
}

/// Serve one canned completion body on an ephemeral port.
async fn stub_server(content: &str, status: StatusCode) -> String {
    let content = content.to_string();
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let content = content.clone();
            async move {
                (
                    status,
                    Json(json!({
                        "choices": [{"message": {"content": content}}]
                    })),
                )
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/chat/completions")
}

#[tokio::test]
async fn valid_completion_parses_into_a_result() {
    let body = json!({
        "economic": 15.0, "crypto": 88.0, "privacy": 2.0, "instability": 35.0,
        "sentiment": "bearish", "confidence": 0.82, "overall_relevance": 74.0,
        "summary": "miner stress", "key_entities": ["hashprice"]
    })
    .to_string();
    let endpoint = stub_server(&body, StatusCode::OK).await;

    let classifier = HttpClassifier::new("test-key", None).with_endpoint(endpoint);
    let result = classifier.classify(&raw_item()).await.unwrap();
    assert_eq!(result.sentiment, Sentiment::Bearish);
    assert_eq!(result.key_entities, vec!["hashprice".to_string()]);
    assert!((result.confidence - 0.82).abs() < 1e-9);
}

#[tokio::test]
async fn fenced_completion_still_parses() {
    let body = format!(
        "```json\n{}\n```",
        json!({
            "economic": 10.0, "crypto": 60.0, "privacy": 0.0, "instability": 5.0,
            "sentiment": "bullish", "confidence": 0.7, "overall_relevance": 65.0
        })
    );
    let endpoint = stub_server(&body, StatusCode::OK).await;

    let classifier = HttpClassifier::new("test-key", None).with_endpoint(endpoint);
    let result = classifier.classify(&raw_item()).await.unwrap();
    assert_eq!(result.sentiment, Sentiment::Bullish);
    assert_eq!(result.summary, ""); // defaulted, not required
}

#[tokio::test]
async fn prose_content_is_malformed_not_retried() {
    let endpoint = stub_server("The market looks shaky today.", StatusCode::OK).await;
    let classifier = HttpClassifier::new("test-key", None).with_endpoint(endpoint);
    let err = classifier.classify(&raw_item()).await.unwrap_err();
    assert!(matches!(err, ClassifyError::MalformedResponse(_)));
}

#[tokio::test]
async fn out_of_range_scores_from_the_wire_are_malformed() {
    let body = json!({
        "economic": 15.0, "crypto": 140.0, "privacy": 2.0, "instability": 35.0,
        "sentiment": "bearish", "confidence": 0.82, "overall_relevance": 74.0
    })
    .to_string();
    let endpoint = stub_server(&body, StatusCode::OK).await;
    let classifier = HttpClassifier::new("test-key", None).with_endpoint(endpoint);
    let err = classifier.classify(&raw_item()).await.unwrap_err();
    assert!(matches!(err, ClassifyError::MalformedResponse(_)));
}

#[tokio::test]
async fn server_error_surfaces_as_transient() {
    let endpoint = stub_server("irrelevant", StatusCode::INTERNAL_SERVER_ERROR).await;
    let classifier = HttpClassifier::new("test-key", None).with_endpoint(endpoint);
    let err = classifier.classify(&raw_item()).await.unwrap_err();
    assert!(matches!(err, ClassifyError::Transient(_)));
    assert!(err.is_retryable());
}
