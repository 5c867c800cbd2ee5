//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the storage root and free space

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tracing::warn;

/// `GET /healthz`
///
/// Liveness probe: always returns 200 OK and never touches the disk.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// Readiness probe:
/// 1. The storage root must exist or be creatable, and accept a probe file.
/// 2. The volume must have at least the configured minimum free.
///
/// HTTP 200 `{status: ready}` when both hold, HTTP 503
/// `{status: degraded, reason}` otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let storage = &state.storage;

    if !storage.is_writable().await {
        return degraded("storage not writable");
    }

    let min_free = storage.min_free_bytes();
    if min_free > 0 {
        match storage.available_bytes().await {
            Ok(free) if free < min_free => return degraded("low disk"),
            Ok(_) => {}
            Err(err) => warn!("readiness could not determine free space: {}", err),
        }
    }

    (
        StatusCode::OK,
        Json(ReadyResponse {
            status: "ready",
            reason: None,
        }),
    )
}

fn degraded(reason: &'static str) -> (StatusCode, Json<ReadyResponse>) {
    warn!("readiness degraded: {}", reason);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadyResponse {
            status: "degraded",
            reason: Some(reason),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}
