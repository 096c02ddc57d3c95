// Thin HTTP surface: liveness plus the read-only indexing health report.

pub mod routes;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::kernel::IndexerDeps;

pub fn build_app(deps: Arc<IndexerDeps>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/health/indexing", get(routes::indexing_health))
        .route("/health/repositories/:id", get(routes::repository_health))
        .layer(TraceLayer::new_for_http())
        .with_state(deps)
}
