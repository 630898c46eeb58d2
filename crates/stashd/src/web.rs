//! Web endpoints for stashd.
//!
//! Maps the HTTP surface onto `stash::FileEntryService`:
//!
//! - `PUT|POST /f` — store under a generated key
//! - `PUT|POST /f/{key}` — store under a provided key
//! - `GET /f/{key}?mime=` — fetch bytes; `mime` is passed through as the
//!   Content-Type, never interpreted
//! - `GET /f?offset=&n=&q=` — paginated JSON listing
//! - `DELETE /f/{key}` — remove entry and content
//!
//! Uploads stream the request body to disk and downloads stream the file
//! back; filesystem work runs under `spawn_blocking` so it never parks an
//! executor thread.

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::TryStreamExt;
use serde::Deserialize;
use stash::{FileEntryService, ListQuery, StashError};
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};

/// Shared state for web handlers.
#[derive(Clone)]
pub struct WebState {
    pub service: Arc<FileEntryService>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route(
            "/f",
            get(list_files).put(store_anonymous).post(store_anonymous),
        )
        .route(
            "/f/{key}",
            get(download_file)
                .put(store_keyed)
                .post(store_keyed)
                .delete(delete_file),
        )
        .route("/health", get(health))
        .route("/", get(serve_root))
        .with_state(state)
}

/// Serve root discovery endpoint
async fn serve_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "stashd",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "files": "/f",
            "health": "/health",
        }
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Map an error to its status code with a JSON body.
fn error_response(err: &StashError) -> Response {
    let status = match err {
        StashError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        StashError::AlreadyExists(_) => StatusCode::CONFLICT,
        StashError::NotFound(_) => StatusCode::NOT_FOUND,
        // Divergence, I/O and index failures are all internal faults
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    }
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn join_error_response(err: tokio::task::JoinError) -> Response {
    tracing::error!(error = %err, "blocking task failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

#[tracing::instrument(name = "http.put", skip(state, body))]
async fn store_keyed(
    State(state): State<WebState>,
    Path(key): Path<String>,
    body: Body,
) -> Response {
    store_body(state, Some(key), body).await
}

#[tracing::instrument(name = "http.put_anonymous", skip(state, body))]
async fn store_anonymous(State(state): State<WebState>, body: Body) -> Response {
    store_body(state, None, body).await
}

/// Stream the request body to the store without buffering it.
async fn store_body(state: WebState, key: Option<String>, body: Body) -> Response {
    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = StreamReader::new(stream);
    // The bridge gives the synchronous service a blocking Read over the
    // async body; it must run on the blocking pool.
    let mut reader = SyncIoBridge::new(reader);

    let service = state.service.clone();
    let result =
        tokio::task::spawn_blocking(move || service.put(key.as_deref(), &mut reader)).await;

    match result {
        Ok(Ok(receipt)) => {
            tracing::info!(key = %receipt.key, size = receipt.size, "stored");
            (StatusCode::OK, format!("/f/{}", receipt.key)).into_response()
        }
        Ok(Err(err)) => error_response(&err),
        Err(err) => join_error_response(err),
    }
}

/// Query parameters for downloads.
#[derive(Debug, Deserialize)]
struct GetQuery {
    /// Explicit Content-Type override, passed through untouched.
    mime: Option<String>,
}

#[tracing::instrument(name = "http.get", skip(state))]
async fn download_file(
    State(state): State<WebState>,
    Path(key): Path<String>,
    Query(query): Query<GetQuery>,
) -> Response {
    let service = state.service.clone();
    let lookup_key = key.clone();
    let result = tokio::task::spawn_blocking(move || service.get(&lookup_key)).await;

    let retrieval = match result {
        Ok(Ok(r)) => r,
        Ok(Err(err)) => return error_response(&err),
        Err(err) => return join_error_response(err),
    };

    let mime = query
        .mime
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let file = tokio::fs::File::from_std(retrieval.file);
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CONTENT_LENGTH, retrieval.entry.size.to_string())
        .body(body)
        .unwrap_or_else(|err| {
            tracing::error!(key, error = %err, "failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

#[tracing::instrument(name = "http.delete", skip(state))]
async fn delete_file(State(state): State<WebState>, Path(key): Path<String>) -> Response {
    let service = state.service.clone();
    let delete_key = key.clone();
    let result = tokio::task::spawn_blocking(move || service.delete(&delete_key)).await;

    match result {
        Ok(Ok(())) => {
            tracing::info!(key, "deleted");
            (StatusCode::OK, "OK").into_response()
        }
        Ok(Err(err)) => error_response(&err),
        Err(err) => join_error_response(err),
    }
}

/// Query parameters for listing.
///
/// Malformed numbers are rejected by the extractor with a 400 before the
/// handler runs; a caller-input error, not a store error.
#[derive(Debug, Deserialize)]
struct ListParams {
    offset: Option<usize>,
    n: Option<usize>,
    q: Option<String>,
}

#[tracing::instrument(name = "http.list", skip(state))]
async fn list_files(
    State(state): State<WebState>,
    Query(params): Query<ListParams>,
) -> Response {
    let query = ListQuery {
        offset: params.offset.unwrap_or(0),
        limit: params.n.unwrap_or(50),
        filter: params.q,
    };

    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || service.list(&query)).await;

    match result {
        Ok(Ok(entries)) => Json(entries).into_response(),
        Ok(Err(err)) => error_response(&err),
        Err(err) => join_error_response(err),
    }
}
