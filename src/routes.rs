//! src/routes.rs
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info};

use crate::pipeline::{run_all, AppContext};

// ── POST /run ──────────────────────────────────────────────────────────
// Invoked by the external scheduler with no body. Always 200 with the
// per-phase summary unless the run itself blows up.
pub async fn post_run(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    info!("outreach run triggered");
    let task = tokio::spawn(async move { run_all(&ctx).await });
    match task.await {
        Ok(summary) => (StatusCode::OK, summary.to_string()).into_response(),
        Err(e) => {
            error!(error = %e, "outreach run aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "outreach run failed".to_string(),
            )
                .into_response()
        }
    }
}

// ── GET /status ────────────────────────────────────────────────────────
pub async fn get_status() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
