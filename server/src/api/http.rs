use axum::{
    body::Bytes,
    extract::{Path, State as AxumState},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use puosu_execution::{Datastore, GameStatsSource};
use puosu_types::api::Failure;
use serde::Serialize;
use std::sync::Arc;

use crate::{ApiError, Function, Server};

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownFunction(_) => StatusCode::NOT_FOUND,
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(Failure::new(self.to_string(), Some(self.kind())))).into_response()
    }
}

pub(super) async fn invoke<S: Datastore, G: GameStatsSource>(
    AxumState(server): AxumState<Arc<Server<S, G>>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let function = match name.parse::<Function>() {
        Ok(function) => function,
        Err(err) => return err.into_response(),
    };
    match server.invoke(function, &body).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Liveness only; platform health is the `platform-health-monitor` function.
pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn prometheus_metrics<S: Datastore, G: GameStatsSource>(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server<S, G>>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers) {
        return status.into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        server.metrics().render(),
    )
        .into_response()
}

fn metrics_auth_error(headers: &HeaderMap) -> Option<StatusCode> {
    let token = std::env::var("METRICS_AUTH_TOKEN").unwrap_or_default();
    metrics_token_mismatch(headers, &token)
}

fn metrics_token_mismatch(headers: &HeaderMap, token: &str) -> Option<StatusCode> {
    if token.is_empty() {
        return None;
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let header_token = headers
        .get("x-metrics-token")
        .and_then(|value| value.to_str().ok());
    if bearer == Some(token) || header_token == Some(token) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}
