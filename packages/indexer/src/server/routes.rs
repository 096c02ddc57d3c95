//! Health routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::kernel::IndexerDeps;
use crate::monitoring;

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn indexing_health(State(deps): State<Arc<IndexerDeps>>) -> impl IntoResponse {
    match monitoring::health_report(&deps.db_pool).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health report failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "health report failed"})),
            )
                .into_response()
        }
    }
}

pub async fn repository_health(
    State(deps): State<Arc<IndexerDeps>>,
    Path(repository_id): Path<i64>,
) -> impl IntoResponse {
    match monitoring::repository_status(&deps.db_pool, repository_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            tracing::error!(error = %e, repository_id, "repository status failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "repository status failed"})),
            )
                .into_response()
        }
    }
}
