pub mod client;
pub mod diagnostics;

pub use client::Client;
pub use client::RetryPolicy;
pub use diagnostics::{DiagnosticEntry, DiagnosticsLog};
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed: {status}: {body}")]
    FailedWithBody {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("function failed ({status}): {error}")]
    Function {
        status: reqwest::StatusCode,
        error: String,
        kind: Option<String>,
    },
    #[error("encode error: {0}")]
    Encode(serde_json::Error),
    #[error("unexpected response: {0}")]
    Decode(serde_json::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

impl Error {
    /// Error kind reported by the server, when the failure came from a function.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Error::Function { kind, .. } => kind.as_deref(),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State as AxumState,
        http::StatusCode as AxumStatusCode,
        routing::{get, post},
        Router,
    };
    use puosu_execution::mocks::{active_game, funded_users, joined_challenge};
    use puosu_execution::{GameStatsSource, Memory, StatsError};
    use puosu_server::{Api, Server, ServerConfig};
    use puosu_types::api::{
        EmergencyStopRequest, MarketAction, SettlementKind, SimRunnerRequest, SweepRequest,
    };
    use puosu_types::wager::{
        Challenge, ChallengeStatus, ChallengeType, MatchStats, RefundType,
    };
    use puosu_types::{Money, UserId};
    use serde_json::json;
    use std::{
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };
    use tokio::time::{sleep, Duration};

    struct NoStats;

    impl GameStatsSource for NoStats {
        async fn fetch_stats(
            &self,
            _challenge: &Challenge,
            _user_id: UserId,
        ) -> std::result::Result<MatchStats, StatsError> {
            Err(StatsError::Unavailable("offline".into()))
        }
    }

    struct TestContext {
        server: Arc<Server<Memory, NoStats>>,
        base_url: String,
        server_handle: tokio::task::JoinHandle<()>,
    }

    impl TestContext {
        async fn new() -> Self {
            let config = ServerConfig {
                deterministic_seed: Some(11),
                ..ServerConfig::default()
            };
            let server = Arc::new(Server::new(Memory::new(), NoStats, config));
            let router = Api::new(server.clone()).router();

            let addr = SocketAddr::from(([127, 0, 0, 1], 0));
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let actual_addr = listener.local_addr().unwrap();
            let base_url = format!("http://{actual_addr}");

            let server_handle = tokio::spawn(async move {
                axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
                .unwrap();
            });

            // Give server time to start
            sleep(Duration::from_millis(50)).await;

            Self {
                server,
                base_url,
                server_handle,
            }
        }

        fn create_client(&self) -> Client {
            Client::new(&self.base_url).unwrap()
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            self.server_handle.abort();
        }
    }

    #[tokio::test]
    async fn test_sim_runner_round_trip() {
        let ctx = TestContext::new().await;
        active_game(ctx.server.store(), "Apex Legends").await;
        funded_users(ctx.server.store(), 4, Money::from_units(50), true).await;

        let diagnostics = Arc::new(DiagnosticsLog::new(8));
        let client = ctx.create_client().with_diagnostics(diagnostics.clone());
        let report = client
            .sim_runner(&SimRunnerRequest {
                manual: true,
                participants: Some(4),
                crash_probability: Some(0.0),
                ..SimRunnerRequest::default()
            })
            .await
            .unwrap();

        assert!(!report.crashed);
        assert_eq!(report.participants.len(), 4);
        assert_eq!(report.settlement.kind, SettlementKind::Paid);

        let entries = diagnostics.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].function, "sim-runner");
        assert_eq!(entries[0].status, Some(200));
        assert!(entries[0].ok);
    }

    #[tokio::test]
    async fn test_function_failure_carries_kind() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        let err = client
            .emergency_tournament_stop(&EmergencyStopRequest {
                tournament_id: None,
                challenge_id: None,
                reason: "ops".to_string(),
                refund_type: RefundType::Full,
            })
            .await
            .unwrap_err();
        let Error::Function { status, .. } = &err else {
            panic!("expected function error, got {err:?}");
        };
        assert_eq!(*status, reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), Some("invalid_request"));

        let err = client
            .invoke::<_, serde_json::Value>("resolve-disputes", &json!({ "dryRun": true }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some("invalid_request"));

        let err = client
            .invoke::<_, serde_json::Value>("mint-money", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some("unknown_function"));
    }

    #[tokio::test]
    async fn test_settle_failure_is_not_retried() {
        let ctx = TestContext::new().await;
        let users = funded_users(ctx.server.store(), 2, Money::from_units(5), false).await;
        let id = joined_challenge(
            ctx.server.store(),
            ChallengeType::OneVsOne,
            Money::from_units(5),
            &users,
            puosu_types::now_ms(),
        )
        .await;

        let diagnostics = Arc::new(DiagnosticsLog::default());
        let client = ctx
            .create_client()
            .with_diagnostics(diagnostics.clone())
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
                retry_non_idempotent: true,
            });

        let started = client
            .atomic_market_engine(&MarketAction::Start { challenge_id: id })
            .await
            .unwrap();
        assert_eq!(started.status, ChallengeStatus::Active);

        let err = client
            .atomic_market_engine(&MarketAction::Settle { challenge_id: id })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some("incomplete_results"));
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_sweeps_and_probes() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        assert!(client.healthz().await.unwrap());
        let report = client
            .resolve_disputes(&SweepRequest::default())
            .await
            .unwrap();
        assert_eq!(report.still_pending, 0);
        client
            .tournament_automation(&SweepRequest { manual: true })
            .await
            .unwrap();

        let text = client.prometheus_metrics(None).await.unwrap();
        assert!(text.contains("puosu_function_invocations_total{function=\"resolve-disputes\"} 1"));
    }

    #[test]
    fn test_client_invalid_scheme() {
        let result = Client::new("ftp://example.com");
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(matches!(err, Error::InvalidScheme(_)));
            assert_eq!(
                err.to_string(),
                "invalid URL scheme: ftp (expected http or https)"
            );
        }

        assert!(Client::new("http://localhost:8080").is_ok());
        assert!(Client::new("https://localhost:8080").is_ok());
    }

    async fn serve_router(router: Router) -> (String, tokio::task::JoinHandle<()>) {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let actual_addr = listener.local_addr().unwrap();
        let base_url = format!("http://{actual_addr}");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });

        sleep(Duration::from_millis(50)).await;
        (base_url, handle)
    }

    fn no_backoff(retry_non_idempotent: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            retry_non_idempotent,
        }
    }

    #[tokio::test]
    async fn test_get_with_retry_retries_retryable_statuses() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/flaky",
                get(
                    |AxumState(counter): AxumState<Arc<AtomicUsize>>| async move {
                        let attempt = counter.fetch_add(1, Ordering::SeqCst);
                        if attempt < 2 {
                            AxumStatusCode::SERVICE_UNAVAILABLE
                        } else {
                            AxumStatusCode::OK
                        }
                    },
                ),
            )
            .with_state(counter.clone());

        let (base_url, handle) = serve_router(router).await;
        let client = Client::new(&base_url)
            .unwrap()
            .with_retry_policy(no_backoff(false));

        let url = client.base_url.join("flaky").unwrap();
        let response = client.get_with_retry(url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test]
    async fn test_post_with_retry_respects_retry_non_idempotent_default() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/flaky-post",
                post(
                    |AxumState(counter): AxumState<Arc<AtomicUsize>>,
                     _body: axum::body::Bytes| async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        AxumStatusCode::SERVICE_UNAVAILABLE
                    },
                ),
            )
            .with_state(counter.clone());

        let (base_url, handle) = serve_router(router).await;
        let client = Client::new(&base_url)
            .unwrap()
            .with_retry_policy(no_backoff(false));

        let url = client.base_url.join("flaky-post").unwrap();
        let err = client
            .post_bytes_with_retry(url.clone(), b"{}".to_vec())
            .await
            .expect_err("POST should not be retried by default");
        let Error::FailedWithBody { status, body } = err else {
            panic!("expected FailedWithBody, got {err:?}");
        };
        assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("POST"));
        assert!(body.contains(url.as_str()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_post_with_retry_retries_when_enabled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/flaky-post",
                post(
                    |AxumState(counter): AxumState<Arc<AtomicUsize>>,
                     _body: axum::body::Bytes| async move {
                        let attempt = counter.fetch_add(1, Ordering::SeqCst);
                        if attempt < 2 {
                            AxumStatusCode::SERVICE_UNAVAILABLE
                        } else {
                            AxumStatusCode::OK
                        }
                    },
                ),
            )
            .with_state(counter.clone());

        let (base_url, handle) = serve_router(router).await;
        let diagnostics = Arc::new(DiagnosticsLog::new(2));
        let client = Client::new(&base_url)
            .unwrap()
            .with_retry_policy(no_backoff(true))
            .with_diagnostics(diagnostics.clone());

        let url = client.base_url.join("flaky-post").unwrap();
        client
            .post_bytes_with_retry(url, b"{}".to_vec())
            .await
            .expect("POST should succeed after retry");
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        // Capacity two: the first failed attempt has been dropped.
        let entries = diagnostics.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempt, 2);
        assert!(!entries[0].ok);
        assert!(entries[1].ok);

        handle.abort();
    }
}
