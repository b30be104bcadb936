//! HTTP API for data-explorer.
//!
//! JSON in, JSON out. Errors render as `{"error": "..."}`.

pub mod error;
mod issues;
mod queries;

pub use error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sqlx::sqlite::SqlitePool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::db;
use crate::error::{ExplorerError, Result};
use crate::persistence::StateDb;
use crate::query::QueryService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateDb>,
    pub service: Arc<QueryService>,
}

impl AppState {
    pub fn new(store: Arc<StateDb>, service: Arc<QueryService>) -> Self {
        Self { store, service }
    }

    fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/api/connections", get(list_connections))
        .route("/api/query", post(queries::run_query))
        .route(
            "/api/issues",
            post(issues::create_issue).get(issues::list_issues),
        )
        .route(
            "/api/issues/{issue_id}",
            get(issues::get_issue)
                .patch(issues::patch_issue)
                .delete(issues::delete_issue),
        )
        .route(
            "/api/issues/{issue_id}/sections",
            post(issues::create_section).get(issues::list_sections),
        )
        .route(
            "/api/issues/{issue_id}/sections/{section_id}",
            get(issues::get_section),
        )
        .route(
            "/api/sections/{section_id}",
            patch(issues::patch_section).delete(issues::delete_section),
        )
        .route(
            "/api/issues/{issue_id}/sections/{section_id}/queries",
            post(queries::create_query).get(queries::list_queries),
        )
        .route(
            "/api/issues/{issue_id}/sections/{section_id}/queries/{query_id}",
            get(queries::get_query),
        )
        .route(
            "/api/queries/{query_id}",
            patch(queries::patch_query).delete(queries::delete_query),
        )
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| ExplorerError::internal(format!("Failed to read listen address: {e}")))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ExplorerError::internal(format!("Server error: {e}")))
}

async fn ping() -> Json<JsonValue> {
    Json(json!({ "message": "pong" }))
}

#[derive(Debug, Serialize)]
struct ConnectionStatus {
    id: String,
    /// Backend the DSN routes to; absent when the DSN is unsupported.
    backend: Option<&'static str>,
    open: bool,
}

async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionStatus>> {
    let registry = state.service.registry();
    let statuses = registry
        .descriptors()
        .iter()
        .map(|d| ConnectionStatus {
            id: d.id.clone(),
            backend: db::route(&d.dsn).ok().map(|r| r.backend.as_str()),
            open: registry.is_open(&d.id),
        })
        .collect();
    Json(statuses)
}
