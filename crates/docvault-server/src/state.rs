//! Shared application state.

use std::sync::Arc;

use docvault_runtime::Services;

use crate::error::ApiError;

/// State shared by all route handlers.
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

/// Run a blocking pipeline call on the blocking thread pool.
pub async fn run_blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Services) -> docvault_core::Result<T> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.services))
        .await
        .map_err(|e| ApiError::internal(format!("blocking task failed: {}", e)))?
        .map_err(ApiError::from)
}
