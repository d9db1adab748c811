//! Debug side channel: liveness and a view of tenant-bound sessions.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::SessionRegistry;

#[derive(Debug, Serialize)]
struct SessionEntry {
    session_id: String,
    tenant: String,
}

#[derive(Debug, Serialize)]
struct SessionsResponse {
    count: usize,
    sessions: Vec<SessionEntry>,
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn sessions(State(registry): State<Arc<SessionRegistry>>) -> Json<SessionsResponse> {
    let sessions: Vec<SessionEntry> = registry
        .snapshot()
        .into_iter()
        .map(|(session_id, tenant)| SessionEntry {
            session_id: session_id.to_string(),
            tenant: tenant.to_string(),
        })
        .collect();

    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(sessions))
        .with_state(registry)
}

/// Serve the diagnostics endpoints on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Diagnostics listening");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
