//! Health and maintenance routes.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::{reply, ApiError};
use crate::state::{run_blocking, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/admin/reconcile", post(reconcile))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = run_blocking(&state, |s| s.store.stats()).await?;
    let config = &state.services.config;
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "docvault",
        "users": stats.total_users,
        "documents": stats.total_documents,
        "staged_writes": stats.staged_writes,
        "failed_writes": stats.failed_writes,
        "collection": config.collection.name,
        "embedding_dimension": config.collection.dim,
        "embedder": state.services.embedder.name(),
    })))
}

async fn reconcile(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let report = run_blocking(&state, |s| s.reconciler().run()).await?;
    Ok(reply("reconciliation finished", report))
}
