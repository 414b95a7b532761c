use axum::{extract::State, http::header, response::IntoResponse};

use crate::AppState;

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
