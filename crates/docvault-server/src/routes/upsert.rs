//! Content upload routes: files, web pages and video transcripts.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::debug;

use crate::error::{reply, ApiError};
use crate::state::{run_blocking, AppState};
use docvault_ingest::{ContentSource, IngestResult};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/upsert/files/{user_id}",
            post(upsert_files).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/upsert/urls/html/{user_id}", post(upsert_html))
        .route("/upsert/urls/youtube/{user_id}", post(upsert_youtube))
}

#[derive(Deserialize)]
struct UrlsRequest {
    urls: Vec<String>,
}

async fn upsert_files(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut sources = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read {}: {}", name, e)))?;
        debug!("Received {} ({} bytes) for user {}", name, bytes.len(), user_id);
        sources.push(ContentSource::file(name, bytes.to_vec()));
    }
    ingest(state, user_id, sources, "file(s)").await
}

async fn upsert_html(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<UrlsRequest>,
) -> Result<Response, ApiError> {
    let sources = req.urls.into_iter().map(ContentSource::HtmlUrl).collect();
    ingest(state, user_id, sources, "urls").await
}

async fn upsert_youtube(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<UrlsRequest>,
) -> Result<Response, ApiError> {
    let sources = req.urls.into_iter().map(ContentSource::VideoUrl).collect();
    ingest(state, user_id, sources, "youtube transcripts from urls").await
}

async fn ingest(
    state: Arc<AppState>,
    user_id: String,
    sources: Vec<ContentSource>,
    noun: &'static str,
) -> Result<Response, ApiError> {
    if sources.is_empty() {
        return Err(ApiError::bad_request("nothing to upload"));
    }
    let result = run_blocking(&state, move |s| s.ingester().ingest_batch(&user_id, &sources)).await?;
    Ok(ingest_response(result, noun))
}

/// 200 when anything was embedded, 400 otherwise. The per-unit outcome is always returned.
fn ingest_response(result: IngestResult, noun: &str) -> Response {
    if result.embedded_count() == 0 {
        let detail = format!("uploaded {} could not be uploaded or already exist in system", noun);
        return (StatusCode::BAD_REQUEST, reply(detail, &result)).into_response();
    }

    let mut detail = format!("uploaded and embedded {} {}.", result.embedded_count(), noun);
    let left: Vec<&str> = result
        .skipped
        .iter()
        .map(String::as_str)
        .chain(result.rejected.iter().map(|f| f.unit.as_str()))
        .chain(result.failed.iter().map(|f| f.unit.as_str()))
        .collect();
    if !left.is_empty() {
        detail.push_str(&format!(" {} were not uploaded", left.join(", ")));
    }
    (StatusCode::OK, reply(detail, &result)).into_response()
}
