//! HTTP route handlers.

pub mod admin;
pub mod search;
pub mod upsert;
pub mod users;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the router with every route.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(users::routes())
        .merge(upsert::routes())
        .merge(search::routes())
        .merge(admin::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
