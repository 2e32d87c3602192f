// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for `Fetcher::fetch` against a mocked HTTP origin,
//! covering the retry loop and the status-to-`FetchError` mapping that the
//! crate's own unit tests (pure helpers only) never exercise.

use std::sync::Arc;
use std::time::Duration;

use marketsync_fetch::{FetchError, Fetcher, RetryConfig};
use marketsync_identity::{Identity, IdentityPool, RateLimitConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        overall_timeout: Duration::from_secs(5),
        jitter_factor: 0.0,
    }
}

async fn fetcher() -> Fetcher {
    let pool = Arc::new(IdentityPool::new(RateLimitConfig {
        capacity: 100.0,
        refill_per_sec: 100.0,
    }));
    pool.add(Identity {
        id: "test-identity".to_string(),
        user_agent: "marketsync-fetch-tests/0.1".to_string(),
        proxy: None,
    })
    .await;
    Fetcher::new(pool, false)
}

#[tokio::test]
async fn successful_response_is_returned_on_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/widget"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher().await;
    let page = fetcher.fetch(&format!("{}/widget", server.uri()), &fast_retry_config()).await.unwrap();
    assert_eq!(page.status, 200);
    assert_eq!(page.body, "hello");
}

#[tokio::test]
async fn server_error_is_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let fetcher = fetcher().await;
    let page = fetcher.fetch(&format!("{}/flaky", server.uri()), &fast_retry_config()).await.unwrap();
    assert_eq!(page.body, "recovered");
}

#[tokio::test]
async fn forbidden_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher().await;
    let err = fetcher.fetch(&format!("{}/blocked", server.uri()), &fast_retry_config()).await.unwrap_err();
    assert!(matches!(err, FetchError::Forbidden { .. }));
}

#[tokio::test]
async fn too_many_requests_maps_to_rate_limited_error_after_exhausting_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/throttled")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

    let fetcher = fetcher().await;
    let err = fetcher.fetch(&format!("{}/throttled", server.uri()), &fast_retry_config()).await.unwrap_err();
    assert!(matches!(err, FetchError::TooManyRequests { .. }));
}

#[tokio::test]
async fn captcha_body_is_detected_even_on_a_200() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/captcha"))
        .respond_with(ResponseTemplate::new(200).set_body_string("please solve this captcha to continue"))
        .mount(&server)
        .await;

    let fetcher = fetcher().await;
    let err = fetcher.fetch(&format!("{}/captcha", server.uri()), &fast_retry_config()).await.unwrap_err();
    assert!(matches!(err, FetchError::Captcha { .. }));
}
