use axum::{extract::State, http::header, response::IntoResponse};

use crate::state::SharedState;

/// `GET /metrics`
///
/// Serves the Prometheus text exposition format directly from this
/// binary's HTTP router, rather than a separate exporter port.
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    let body = state.metrics.gather_text();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
