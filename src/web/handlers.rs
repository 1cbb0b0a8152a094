//! HTTP request handlers.

use super::AppState;
use crate::db::DbError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;

const DEFAULT_CHECK_LIMIT: i64 = 50;

pub async fn handle_ping() -> &'static str {
    "pong"
}

/// Run one sweep and reply once it has finished.
pub async fn handle_check(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.scheduler.run_sweep().await;
    tracing::debug!("Check request finished: {:?}", summary);
    "done"
}

pub async fn handle_get_endpoints(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.reports().await {
        Ok(reports) => Json(reports).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    pub limit: Option<i64>,
}

/// Recent check history of one endpoint.
pub async fn handle_get_checks(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<ChecksQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_endpoint(&key) {
        return match e {
            DbError::NotFound => (StatusCode::NOT_FOUND, "Endpoint not found").into_response(),
            e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        };
    }

    let limit = query.limit.unwrap_or(DEFAULT_CHECK_LIMIT).clamp(1, 1000);
    match state.store.get_check_results(&key, limit) {
        Ok(checks) => Json(checks).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
