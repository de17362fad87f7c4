//! Wiremock integration tests for the reqwest call boundary.
//!
//! Verifies that HTTP failures map onto the error variants the retry policy
//! classifies, and that a gateway call recovers from a 5xx burst end to end.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skjold::http::error_for_status;
use skjold::{CircuitBreakerConfig, RetryConfig, Skjold, SkjoldError};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct Video {
    id: String,
    title: String,
}

async fn get(client: &reqwest::Client, url: String) -> skjold::Result<reqwest::Response> {
    let response = client.get(url).send().await?;
    error_for_status(response).await
}

#[tokio::test]
async fn success_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&server)
        .await;

    let response = get(&reqwest::Client::new(), format!("{}/ok", server.uri()))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "fine");
}

#[tokio::test]
async fn server_error_maps_to_api_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
        .mount(&server)
        .await;

    let err = get(&reqwest::Client::new(), server.uri()).await.unwrap_err();

    match &err {
        SkjoldError::Api { status, message } => {
            assert_eq!(*status, 503);
            assert_eq!(message, "upstream overloaded");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn empty_body_uses_reason_phrase() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = get(&reqwest::Client::new(), server.uri()).await.unwrap_err();

    assert!(matches!(err, SkjoldError::Api { status: 404, ref message } if message == "Not Found"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let err = get(&reqwest::Client::new(), server.uri()).await.unwrap_err();

    assert!(matches!(err, SkjoldError::RateLimited { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn unauthorized_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = get(&reqwest::Client::new(), server.uri()).await.unwrap_err();

    assert!(matches!(err, SkjoldError::AuthenticationFailed));
    assert!(!RetryConfig::new().is_retryable(&err));
}

#[tokio::test]
async fn forbidden_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("key lacks scope"))
        .mount(&server)
        .await;

    let err = get(&reqwest::Client::new(), server.uri()).await.unwrap_err();

    assert!(matches!(err, SkjoldError::Api { status: 403, ref message } if message == "key lacks scope"));
    assert!(!RetryConfig::new().is_retryable(&err));
    assert!(RetryConfig::new().retryable_statuses([403]).is_retryable(&err));
}

#[tokio::test]
async fn slow_response_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let err = get(&client, server.uri()).await.unwrap_err();

    assert!(matches!(err, SkjoldError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn refused_connection_maps_to_network() {
    // reserve a port, then free it so nothing is listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = get(&reqwest::Client::new(), format!("http://{addr}/"))
        .await
        .unwrap_err();

    assert!(matches!(err, SkjoldError::Network(_)), "got {err:?}");
}

#[tokio::test]
async fn gateway_recovers_from_5xx_burst_and_caches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos/dQw4w9WgXcQ"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/videos/dQw4w9WgXcQ"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Skjold::builder()
        .retry(
            RetryConfig::new()
                .base_delay(Duration::from_millis(5))
                .jitter(false),
        )
        .dependency("youtube", CircuitBreakerConfig::new(3, 1, Duration::from_secs(30)))
        .build()
        .unwrap();
    let client = reqwest::Client::new();
    let url = format!("{}/videos/dQw4w9WgXcQ", server.uri());
    let key = skjold::cache_key("youtube", "video", "dQw4w9WgXcQ");

    for _ in 0..2 {
        let video: Video = gateway
            .call("youtube", &key, None, || async {
                let response = get(&client, url.clone()).await?;
                Ok::<_, SkjoldError>(response.json::<Video>().await?)
            })
            .await
            .unwrap();
        assert_eq!(video.title, "Never Gonna Give You Up");
        assert_eq!(video.id, "dQw4w9WgXcQ");
    }

    // second iteration was a cache hit
    assert_eq!(gateway.cache().metrics().hits, 1);
}
