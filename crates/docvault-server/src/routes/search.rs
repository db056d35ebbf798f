//! Semantic search route.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{reply, ApiError};
use crate::state::{run_blocking, AppState};
use docvault_runtime::Retrieval;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/search/{user_id}", post(search))
}

fn default_top_k() -> usize {
    5
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    /// Restrict the search to these documents.
    #[serde(default)]
    doc_ids: Vec<String>,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let retrieval = run_blocking(&state, move |s| {
        s.retriever()
            .search(&user_id, &req.query, req.top_k, &req.doc_ids)
    })
    .await?;

    Ok(match retrieval {
        Retrieval::NoEntries => reply("no entries found for this user", Vec::<()>::new()),
        Retrieval::NoMatches => reply("no matches found under the distance threshold", Vec::<()>::new()),
        Retrieval::Ranked(hits) => reply(format!("found {} matches", hits.len()), hits),
    })
}
