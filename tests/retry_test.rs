//! Retry behavior end-to-end: exponential backoff over real failures,
//! verb gating, status gating and the onRetry hook.

use async_trait::async_trait;
use callwire::prelude::*;
use callwire::hooks::CallContext;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_flaky(server: &MockServer, failures: u64, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "flaky"})))
        .up_to_n_times(failures)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"recovered": true})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn exponential_retry_recovers_with_growing_delays() {
    let server = MockServer::start().await;
    mount_flaky(&server, 2, "/flaky").await;

    let client = CallClient::builder().base_url(server.uri()).build();
    let started = Instant::now();
    let outcome = client
        .call::<Value>(
            "/flaky",
            CallOptions::new().with_retry(
                RetryPolicy::new(2)
                    .with_delay_ms(100)
                    .with_strategy(RetryStrategy::Exponential),
            ),
        )
        .await
        .unwrap();

    assert_eq!(outcome.data, Some(json!({"recovered": true})));
    // Delays of >= 100ms then >= 200ms elapsed before the 200.
    assert!(started.elapsed().as_millis() >= 300);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn retry_exhaustion_returns_the_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/always-down"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "down"})))
        .expect(3)
        .mount(&server)
        .await;

    let client = CallClient::builder().base_url(server.uri()).build();
    let outcome = client
        .call::<Value>(
            "/always-down",
            CallOptions::new().with_retry(RetryPolicy::new(2).with_delay_ms(10)),
        )
        .await
        .unwrap();
    let error = outcome.error.unwrap();
    assert_eq!(error.name, "HTTPError");
    assert_eq!(error.message, "down");
}

#[tokio::test]
async fn non_idempotent_verbs_are_not_retried_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = CallClient::builder().base_url(server.uri()).build();
    let outcome = client
        .call::<Value>(
            "@post/submit",
            CallOptions::new().with_retry(RetryPolicy::new(3).with_delay_ms(5)),
        )
        .await
        .unwrap();
    assert_eq!(outcome.error.unwrap().name, "HTTPError");
}

#[tokio::test]
async fn status_code_list_gates_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/not-listed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = CallClient::builder().base_url(server.uri()).build();
    let outcome = client
        .call::<Value>(
            "/not-listed",
            CallOptions::new().with_retry(
                RetryPolicy::new(3)
                    .with_delay_ms(5)
                    .with_status_codes([503]),
            ),
        )
        .await
        .unwrap();
    // 500 is not in the list, so exactly one request happened.
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn on_retry_fires_once_per_re_entry_with_the_next_attempt() {
    let server = MockServer::start().await;
    mount_flaky(&server, 2, "/observed").await;

    #[derive(Default)]
    struct Observer {
        attempts: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl CallHooks for Observer {
        async fn on_retry(
            &self,
            _ctx: &CallContext,
            error: &CallError,
            next_attempt: u32,
        ) -> CallResult<()> {
            assert_eq!(error.name(), "HTTPError");
            self.attempts.lock().unwrap().push(next_attempt);
            Ok(())
        }
    }

    let observer = Arc::new(Observer::default());
    let client = CallClient::builder().base_url(server.uri()).build();
    let outcome = client
        .call::<Value>(
            "/observed",
            CallOptions::new()
                .with_retry(RetryPolicy::new(2).with_delay_ms(10))
                .with_hooks(observer.clone()),
        )
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(*observer.attempts.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn network_errors_retry_without_a_status_check() {
    // Nothing listens on this port: every attempt is a transport
    // failure, and the open method list admits it.
    let client = CallClient::new();
    let outcome = client
        .call::<Value>(
            "http://127.0.0.1:9/unreachable",
            CallOptions::new().with_retry(
                RetryPolicy::new(1)
                    .with_delay_ms(5)
                    .with_status_codes([503]),
            ),
        )
        .await
        .unwrap();
    // Still fails, but only after the retry ran through.
    assert_eq!(outcome.error.unwrap().name, "Error");
}
