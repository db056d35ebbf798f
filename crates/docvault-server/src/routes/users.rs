//! User and document management routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{reply, ApiError};
use crate::state::{run_blocking, AppState};

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/users",
            get(list_users).post(register_user).delete(delete_all_users),
        )
        .route("/users/{user_id}", get(get_user).delete(unregister_user))
        .route(
            "/users/{user_id}/documents",
            get(list_documents).delete(delete_all_documents),
        )
        .route(
            "/users/{user_id}/documents/{doc_id}",
            get(get_document).delete(delete_document),
        )
}

#[derive(Deserialize)]
struct RegisterParams {
    user_id: String,
    user_name: String,
    user_email: String,
}

async fn register_user(State(state): State<Arc<AppState>>, Query(params): Query<RegisterParams>) -> ApiResult {
    let user_id = params.user_id.clone();
    let user = run_blocking(&state, move |s| {
        s.users()
            .register(&params.user_id, &params.user_name, &params.user_email)
    })
    .await?;
    Ok(reply(format!("registered user with id: {} in db", user_id), user))
}

async fn list_users(State(state): State<Arc<AppState>>) -> ApiResult {
    let users = run_blocking(&state, |s| s.users().list_users()).await?;
    Ok(reply("users currently registered in db", users))
}

async fn delete_all_users(State(state): State<Arc<AppState>>) -> ApiResult {
    let report = run_blocking(&state, |s| s.users().delete_all_users()).await?;
    Ok(reply("all users and docs removed from db", report))
}

async fn get_user(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult {
    let id = user_id.clone();
    let user = run_blocking(&state, move |s| s.users().get_user(&id)).await?;
    Ok(reply(format!("user with id {} found in db", user_id), user))
}

async fn unregister_user(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult {
    let id = user_id.clone();
    let documents = run_blocking(&state, move |s| s.users().unregister(&id)).await?;
    Ok(reply(
        format!("user with id {} removed from db", user_id),
        serde_json::json!({ "documents_removed": documents }),
    ))
}

async fn list_documents(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult {
    let id = user_id.clone();
    let docs = run_blocking(&state, move |s| s.users().list_documents(&id)).await?;
    Ok(reply(format!("documents for registered user with id: {}", user_id), docs))
}

async fn delete_all_documents(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> ApiResult {
    let id = user_id.clone();
    let report = run_blocking(&state, move |s| s.users().delete_all_documents(&id)).await?;
    Ok(reply(
        format!("deleted all documents for user with id: {}", user_id),
        serde_json::json!({ "chunks_removed": report.deleted }),
    ))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path((user_id, doc_id)): Path<(String, String)>,
) -> ApiResult {
    let (uid, did) = (user_id.clone(), doc_id.clone());
    let doc = run_blocking(&state, move |s| s.users().get_document(&uid, &did)).await?;
    Ok(reply(
        format!("doc with id {} for user with id {} found in db", doc_id, user_id),
        doc,
    ))
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path((user_id, doc_id)): Path<(String, String)>,
) -> ApiResult {
    let (uid, did) = (user_id.clone(), doc_id.clone());
    let report = run_blocking(&state, move |s| s.users().delete_document(&uid, &did)).await?;
    Ok(reply(
        format!("doc with id {} removed for user with id {}", doc_id, user_id),
        serde_json::json!({ "chunks_removed": report.deleted }),
    ))
}
