//! Operational control endpoint.
//!
//! A small HTTP API for external tooling, bound to loopback by default:
//!
//! | Method | Path       | Effect                                   |
//! |--------|------------|------------------------------------------|
//! | GET    | `/healthz` | liveness                                 |
//! | GET    | `/status`  | mooring flag, ruleset version, sessions  |
//! | POST   | `/moor`    | set the mooring flag                     |
//! | POST   | `/unmoor`  | clear the mooring flag                   |
//! | POST   | `/reload`  | re-read the policy file                  |

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::ProxyError;
use crate::proxy::YachtProxy;

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub moored: bool,
    pub ruleset_version: u64,
    pub ruleset_loaded_at: DateTime<Utc>,
    pub classified_tables: usize,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
struct MooringResponse {
    moored: bool,
    previous: bool,
}

/// Build the control router.
pub fn create_router(proxy: Arc<YachtProxy>) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/status", get(handle_status))
        .route("/moor", post(handle_moor))
        .route("/unmoor", post(handle_unmoor))
        .route("/reload", post(handle_reload))
        .layer(TraceLayer::new_for_http())
        .with_state(proxy)
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "yacht-proxy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn handle_status(State(proxy): State<Arc<YachtProxy>>) -> Json<StatusReport> {
    let snapshot = proxy.policy().snapshot();
    Json(StatusReport {
        moored: snapshot.moored,
        ruleset_version: snapshot.ruleset.version(),
        ruleset_loaded_at: snapshot.ruleset.loaded_at(),
        classified_tables: snapshot.ruleset.len(),
        active_sessions: proxy.active_sessions(),
    })
}

async fn handle_moor(State(proxy): State<Arc<YachtProxy>>) -> impl IntoResponse {
    let previous = proxy.set_moored(true).await;
    Json(MooringResponse {
        moored: true,
        previous,
    })
}

async fn handle_unmoor(State(proxy): State<Arc<YachtProxy>>) -> impl IntoResponse {
    let previous = proxy.set_moored(false).await;
    Json(MooringResponse {
        moored: false,
        previous,
    })
}

async fn handle_reload(State(proxy): State<Arc<YachtProxy>>) -> impl IntoResponse {
    match proxy.reload().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "version": summary.version,
                "tables": summary.tables,
            })),
        ),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

/// Serve the control API until `shutdown` completes.
pub async fn serve(
    proxy: Arc<YachtProxy>,
    listen_addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ProxyError> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|e| ProxyError::BindFailed {
            address: listen_addr.to_string(),
            source: e,
        })?;

    tracing::info!(address = %listen_addr, "Control API listening");

    axum::serve(listener, create_router(proxy))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
