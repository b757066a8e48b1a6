use super::*;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use puosu_execution::mocks::{active_game, funded_users, joined_challenge};
use puosu_execution::{Memory, StatsError};
use puosu_types::wager::{Challenge, ChallengeStatus, ChallengeType, MatchStats};
use puosu_types::{Money, UserId};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{Function, ServerConfig};

struct NoStats;

impl GameStatsSource for NoStats {
    async fn fetch_stats(
        &self,
        _challenge: &Challenge,
        _user_id: UserId,
    ) -> Result<MatchStats, StatsError> {
        Err(StatsError::Unavailable("offline".into()))
    }
}

fn test_server() -> Arc<Server<Memory, NoStats>> {
    let config = ServerConfig {
        deterministic_seed: Some(7),
        ..ServerConfig::default()
    };
    Arc::new(Server::new(Memory::new(), NoStats, config))
}

async fn call(
    server: &Arc<Server<Memory, NoStats>>,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let body = body.map_or_else(Body::empty, |value| Body::from(value.to_string()));
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = Api::new(server.clone()).router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_sim_runner_returns_success_envelope() {
    let server = test_server();
    active_game(server.store(), "Valorant").await;
    funded_users(server.store(), 3, Money::from_units(50), true).await;

    let (status, body) = call(
        &server,
        "POST",
        "/functions/sim-runner",
        Some(json!({ "manual": true, "crashProbability": 0.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["crashed"], false);
    assert_eq!(body["settlement"]["kind"], "paid");
    assert_eq!(body["participants"].as_array().map(Vec::len), Some(3));
    assert_eq!(server.metrics().invocations(Function::SimRunner), 1);
}

#[tokio::test]
async fn test_unknown_field_is_bad_request() {
    let server = test_server();
    let (status, body) = call(
        &server,
        "POST",
        "/functions/tournament-automation",
        Some(json!({ "manual": true, "dryRun": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "invalid_request");
    assert!(body["error"].as_str().unwrap().contains("dryRun"));
}

#[tokio::test]
async fn test_unknown_function_is_not_found() {
    let server = test_server();
    let (status, body) = call(&server, "POST", "/functions/mint-money", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "unknown_function");
}

#[tokio::test]
async fn test_empty_body_runs_sweep() {
    let server = test_server();
    let (status, body) = call(&server, "POST", "/functions/resolve-disputes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["stillPending"], 0);
}

#[tokio::test]
async fn test_emergency_stop_without_target_is_bad_request() {
    let server = test_server();
    let (status, body) = call(
        &server,
        "POST",
        "/functions/emergency-tournament-stop",
        Some(json!({ "reason": "ops", "refundType": "partial" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn test_execution_failure_is_server_error() {
    let server = test_server();
    let users = funded_users(server.store(), 2, Money::from_units(5), false).await;
    let id = joined_challenge(
        server.store(),
        ChallengeType::OneVsOne,
        Money::from_units(5),
        &users,
        puosu_types::now_ms(),
    )
    .await;

    let (status, body) = call(
        &server,
        "POST",
        "/functions/atomic-market-engine",
        Some(json!({ "action": "start", "challengeId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["status"], ChallengeStatus::Active.as_str());

    let (status, body) = call(
        &server,
        "POST",
        "/functions/atomic-market-engine",
        Some(json!({ "action": "settle", "challengeId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "incomplete_results");
    assert_eq!(server.store().balance(users[0]), Money::ZERO);
}

#[tokio::test]
async fn test_health_monitor_reports_process() {
    let server = test_server();
    let (status, body) = call(&server, "POST", "/functions/platform-health-monitor", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert!(body["process"]["rssBytes"].is_u64());
}

#[tokio::test]
async fn test_healthz_and_metrics() {
    let server = test_server();
    let (status, body) = call(&server, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    call(&server, "POST", "/functions/resolve-disputes", None).await;
    let request = Request::builder()
        .uri("/metrics/prometheus")
        .body(Body::empty())
        .unwrap();
    let response = Api::new(server.clone()).router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("puosu_function_invocations_total{function=\"resolve-disputes\"} 1"));
}

#[tokio::test]
async fn test_preflight_is_permissive() {
    let server = test_server();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/functions/sim-runner")
        .header("origin", "https://admin.example")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = Api::new(server).router().oneshot(request).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some("*")
    );
}
