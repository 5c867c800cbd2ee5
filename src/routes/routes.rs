//! Defines routes for the blob API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz`: liveness
//!   - `GET    /readyz`: readiness
//!
//! - **Files**
//!   - `POST   /files`: multipart upload, returns the content address
//!   - `GET    /files/{file_id}`: download, honours a single `Range`
//!   - `HEAD   /files/{file_id}`: headers only
//!   - `DELETE /files/{file_id}`: remove blob and sidecar
//!   - `GET    /files/{file_id}/info`: metadata as JSON

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, file_info, head_file, upload_file},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for all routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", post(upload_file))
        .route(
            "/files/{file_id}",
            get(download_file).head(head_file).delete(delete_file),
        )
        .route("/files/{file_id}/info", get(file_info))
}

/// The complete service: routes, state and body limits.
///
/// Upload size is enforced by the storage layer, so axum's default body
/// limit is lifted.
pub fn app(state: AppState) -> Router {
    routes()
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
