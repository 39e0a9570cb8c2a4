use super::*;
use crate::config::OllamaConfig;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, batch_size: u32) -> Config {
    Config {
        ollama: OllamaConfig {
            host: server.address().ip().to_string(),
            port: server.address().port(),
            model: "all-minilm:latest".to_string(),
            batch_size,
            embedding_dimension: 2,
            ..OllamaConfig::default()
        },
        ..Config::default()
    }
}

fn client_for(server: &MockServer, batch_size: u32) -> OllamaClient {
    OllamaClient::new(&config_for(server, batch_size))
        .expect("Failed to create client")
        .with_retry_attempts(2)
        .with_retry_base_delay(Duration::from_millis(10))
}

#[test]
fn client_configuration() {
    let config = Config {
        ollama: OllamaConfig {
            host: "test-host".to_string(),
            port: 1234,
            model: "test-model".to_string(),
            batch_size: 128,
            ..OllamaConfig::default()
        },
        ..Config::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.model_name(), "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(client.dimension(), DEFAULT_EMBEDDING_DIMENSION as usize);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&Config::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);
}

#[test]
fn empty_batch_makes_no_request() {
    let client = OllamaClient::new(&Config::default()).expect("Failed to create client");
    let vectors = client
        .generate_embeddings_batch(&[])
        .expect("empty batch should succeed");
    assert!(vectors.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_requests_by_batch_size() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "all-minilm:latest" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.1, 0.2], [0.3, 0.4]]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let texts: Vec<String> = (0..4).map(|i| format!("chunk {}", i)).collect();

    let vectors = tokio::task::spawn_blocking(move || client.embed_documents(&texts))
        .await
        .expect("task should not panic")
        .expect("embedding should succeed");

    assert_eq!(vectors.len(), 4);
    assert_eq!(vectors[2], vec![0.1, 0.2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn count_mismatch_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.1, 0.2]]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let texts = vec!["one".to_string(), "two".to_string()];

    let result = tokio::task::spawn_blocking(move || client.generate_embeddings_batch(&texts))
        .await
        .expect("task should not panic");

    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn unexpected_dimension_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.1, 0.2, 0.3]]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let result = tokio::task::spawn_blocking(move || client.embed_query("hello"))
        .await
        .expect("task should not panic");

    let message = format!("{:#}", result.expect_err("dimension should be checked"));
    assert!(message.contains("returned 3 dimensions but 2 are configured"));
}

#[test]
fn retry_classification() {
    assert!(is_retryable(&ureq::Error::StatusCode(503)));
    assert!(is_retryable(&ureq::Error::ConnectionFailed));
    assert!(!is_retryable(&ureq::Error::StatusCode(404)));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let result = tokio::task::spawn_blocking(move || client.embed_query("hello"))
        .await
        .expect("task should not panic");

    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let result = tokio::task::spawn_blocking(move || client.embed_query("hello"))
        .await
        .expect("task should not panic");

    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_requires_model() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "nomic-embed-text:latest" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should not panic");

    assert!(result.is_err());
}
