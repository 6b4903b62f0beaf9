//! Admin HTTP surface.
//!
//! Thin on purpose: request routing, in-flight counting, and JSON encoding.
//! All business logic lives behind [`Manager`]. Successes answer
//! `{"ok":true,"message":...}`, failures `{"ok":false,"error":...}`; a
//! missing `id` is a 400, everything else surfaces as a 500.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::manager::Manager;

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<Manager>,
    pub metrics: Option<PrometheusHandle>,
    pub in_flight: Arc<AtomicI64>,
}

impl ApiState {
    pub fn new(manager: Arc<Manager>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            manager,
            metrics,
            in_flight: Arc::new(AtomicI64::new(0)),
        }
    }
}

#[derive(Serialize)]
struct ApiMessage {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ok_response(message: &str) -> Response {
    (
        StatusCode::OK,
        Json(ApiMessage {
            ok: true,
            message: Some(message.to_string()),
            error: None,
        }),
    )
        .into_response()
}

fn err_response(code: StatusCode, error: impl ToString) -> Response {
    (
        code,
        Json(ApiMessage {
            ok: false,
            message: None,
            error: Some(error.to_string()),
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct IdQuery {
    id: Option<String>,
}

impl IdQuery {
    fn require(self) -> Result<String, Response> {
        match self.id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(err_response(StatusCode::BAD_REQUEST, "missing id")),
        }
    }
}

/// Builds the admin router. The health and metrics routes are mounted at the
/// configured paths.
pub fn router(state: ApiState, healthz_path: &str, metrics_path: &str) -> Router {
    Router::new()
        .route(healthz_path, get(healthz))
        .route(metrics_path, get(metrics_exposition))
        .route("/api/v1/configs", get(list_configs))
        .route("/api/v1/reprobe", get(reprobe))
        .route("/api/v1/quarantine", get(quarantine))
        .route("/api/v1/delete", get(delete))
        .route("/api/v1/rollback", get(rollback))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            count_in_flight,
        ))
        .with_state(state)
}

/// Serves the admin API until cancelled.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    healthz_path: &str,
    metrics_path: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let app = router(state, healthz_path, metrics_path);
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn count_in_flight(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    state.in_flight.fetch_add(1, Ordering::SeqCst);
    let res = next.run(req).await;
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    res
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_exposition(State(state): State<ApiState>) -> Response {
    let body = state.metrics.as_ref().map(|h| h.render()).unwrap_or_default();
    (StatusCode::OK, body).into_response()
}

async fn list_configs(State(state): State<ApiState>) -> Response {
    match state.manager.list_configs() {
        Ok(configs) => Json(configs).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn reprobe(State(state): State<ApiState>, Query(q): Query<IdQuery>) -> Response {
    let id = match q.require() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.reprobe(&id).await {
        Ok(_) => ok_response("scheduled"),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn quarantine(State(state): State<ApiState>, Query(q): Query<IdQuery>) -> Response {
    let id = match q.require() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.quarantine(&id) {
        Ok(()) => ok_response("quarantined"),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn delete(State(state): State<ApiState>, Query(q): Query<IdQuery>) -> Response {
    let id = match q.require() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.delete(&id).await {
        Ok(()) => ok_response("deleted"),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn rollback(State(state): State<ApiState>, Query(q): Query<IdQuery>) -> Response {
    let id = match q.require() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.rollback(&id) {
        Ok(()) => ok_response("rolled_back"),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
