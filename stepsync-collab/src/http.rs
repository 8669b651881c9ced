//! HTTP request API.
//!
//! Routes:
//! - `POST /new`     — create a document, returns its empty version-0 steps
//! - `POST /update`  — push steps; applied and rebase both answer 200
//! - `GET  /?name=&version=` — pull steps since `version`
//! - `OPTIONS *`     — CORS preflight
//! - anything else  — 405 with a short message
//!
//! Every response carries permissive CORS headers so browser editors on
//! other origins can talk to the server directly.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::coordinator::SyncCoordinator;
use crate::error::SyncError;
use crate::history::HistorySlice;
use crate::protocol::{DocumentQuery, UpdateRequest};

type Shared = Arc<SyncCoordinator>;

/// Build the request router around a shared coordinator.
pub fn router(coordinator: Shared) -> Router {
    Router::new()
        .route(
            "/",
            get(pull_updates).options(preflight).fallback(fallback),
        )
        .route(
            "/new",
            post(create_document).options(preflight).fallback(fallback),
        )
        .route(
            "/update",
            post(push_update).options(preflight).fallback(fallback),
        )
        .fallback(fallback)
        .layer(middleware::map_response(cors_headers))
        .with_state(coordinator)
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        log::warn!("Error: {self}");
        (status, self.to_string()).into_response()
    }
}

async fn create_document(State(coord): State<Shared>) -> Result<Json<HistorySlice>, SyncError> {
    let slice = coord.create_document().await?;
    Ok(Json(slice))
}

async fn push_update(
    State(coord): State<Shared>,
    body: Bytes,
) -> Result<Json<HistorySlice>, SyncError> {
    let request = UpdateRequest::decode(&body)?;
    let outcome = coord
        .push_update(
            &request.doc_id,
            request.client_id,
            request.version,
            request.steps,
        )
        .await?;
    Ok(Json(outcome.into_slice()))
}

async fn pull_updates(
    State(coord): State<Shared>,
    Query(query): Query<DocumentQuery>,
) -> Result<Json<HistorySlice>, SyncError> {
    // Unknown documents are reported before malformed versions.
    let doc_id = query.doc_id()?;
    let instance = coord.instance(doc_id).await?;
    let version = query.version()?;

    log::debug!("Pull {doc_id} since {version}");
    let slice = instance.pull_updates(version).await?;
    Ok(Json(slice))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    log::warn!("Error: invalid method: {method}");
    (
        StatusCode::METHOD_NOT_ALLOWED,
        format!("Sorry, only POST, GET, OPTIONS methods are supported: {method}\n"),
    )
        .into_response()
}

async fn cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS, PUT, DELETE"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(
            "Accept, Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization",
        ),
    );
    response
}
