//! HTTP handlers for blob operations.
//! Streams bodies in both directions and delegates storage concerns to
//! `StorageService`.

use crate::{
    errors::{AppError, ErrorCode},
    handlers::{
        auth::{Permission, authorize},
        range::parse_range,
        request_id::RequestId,
    },
    models::{
        file::{FileInfo, FileMetadata},
        wire::OCTET_STREAM,
    },
    services::storage_service::{RangeRead, StorageError, StorageResult},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tracing::debug;

/// Multipart field carrying the upload.
const UPLOAD_FIELD: &str = "file";

/// `POST /files`: store the multipart `file` field under its SHA-256.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = RequestId::from_headers(&headers);
    authorize(&state.config.api_keys, Permission::Upload, &headers)
        .map_err(|err| err.with_request_id(&request_id))?;

    let mut multipart = multipart
        .map_err(|err| AppError::bad_request(err.body_text()).with_request_id(&request_id))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()).with_request_id(&request_id))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!("skipping multipart field {:?}", field.name());
            continue;
        }

        let content_type = field.content_type().unwrap_or(OCTET_STREAM).to_string();
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        let meta = state
            .storage
            .save(stream, &content_type)
            .await
            .map_err(|err| AppError::from(err).with_request_id(&request_id))?;

        return Ok((StatusCode::CREATED, Json(meta)));
    }

    Err(AppError::bad_request("missing multipart field `file`").with_request_id(&request_id))
}

/// `HEAD /files/{file_id}`: object headers, no body.
pub async fn head_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let request_id = RequestId::from_headers(&headers);
    authorize(&state.config.api_keys, Permission::Read, &headers)
        .map_err(|err| err.with_request_id(&request_id))?;

    let meta = state
        .storage
        .head(&file_id)
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id))?;

    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &meta, meta.size_bytes);
    Ok(response)
}

/// `GET /files/{file_id}`: whole object (200) or a single range (206).
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let request_id = RequestId::from_headers(&headers);
    authorize(&state.config.api_keys, Permission::Read, &headers)
        .map_err(|err| err.with_request_id(&request_id))?;

    let result = match headers.get(header::RANGE) {
        None => download_full(&state, &file_id).await,
        Some(value) => download_range(&state, &file_id, value).await,
    };
    result.map_err(|err| err.with_request_id(&request_id))
}

async fn download_full(state: &AppState, file_id: &str) -> Result<Response, AppError> {
    let meta = state.storage.head(file_id).await?;

    let body = if meta.size_bytes == 0 {
        Body::empty()
    } else {
        let read = state.storage.open_range(file_id, 0, None).await?;
        Body::from_stream(read.body)
    };

    let mut response = Response::new(body);
    set_object_headers(response.headers_mut(), &meta, meta.size_bytes);
    Ok(response)
}

async fn download_range(
    state: &AppState,
    file_id: &str,
    value: &HeaderValue,
) -> Result<Response, AppError> {
    let raw = value
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::InvalidRange, "invalid range"))?;
    let range =
        parse_range(raw).map_err(|err| AppError::new(ErrorCode::InvalidRange, err.to_string()))?;

    let read = match state.storage.open_range(file_id, range.start, range.end).await {
        Ok(read) => read,
        Err(StorageError::Unsatisfiable) => {
            return Err(unsatisfiable(state.storage.size(file_id).await));
        }
        Err(err) => return Err(err.into()),
    };

    Ok(partial_response(read))
}

/// 416 with the object's current size, or 404 if it vanished meanwhile.
fn unsatisfiable(size: StorageResult<u64>) -> AppError {
    match size {
        Ok(size) => AppError::new(
            ErrorCode::RangeNotSatisfiable { size: Some(size) },
            "unsatisfiable range",
        ),
        Err(err) => err.into(),
    }
}

fn partial_response(read: RangeRead) -> Response {
    let content_range = format!("bytes {}-{}/{}", read.start, read.last, read.size);
    let length = read.content_length();

    let mut response = Response::new(Body::from_stream(read.body));
    *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    let headers = response.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    if let Ok(value) = HeaderValue::from_str(&content_range) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    response
}

/// `GET /files/{file_id}/info`: metadata as JSON.
pub async fn file_info(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FileInfo>, AppError> {
    let request_id = RequestId::from_headers(&headers);
    authorize(&state.config.api_keys, Permission::Read, &headers)
        .map_err(|err| err.with_request_id(&request_id))?;

    let meta = state
        .storage
        .head(&file_id)
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id))?;
    Ok(Json(meta.into()))
}

/// `DELETE /files/{file_id}`: 204 whether or not the object existed, unless
/// strict deletes are configured.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let request_id = RequestId::from_headers(&headers);
    authorize(&state.config.api_keys, Permission::Delete, &headers)
        .map_err(|err| err.with_request_id(&request_id))?;

    let deleted = state
        .storage
        .delete(&file_id)
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id))?;

    if !deleted && state.config.delete_strict_404 {
        return Err(AppError::not_found().with_request_id(&request_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &FileMetadata, length: u64) {
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
    );
    if let Ok(value) = HeaderValue::from_str(&meta.sha256) {
        headers.insert(header::ETAG, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsatisfiable_reports_size() {
        let err = unsatisfiable(Ok(33));
        assert_eq!(err.code, ErrorCode::RangeNotSatisfiable { size: Some(33) });
    }

    #[test]
    fn unsatisfiable_becomes_not_found_when_object_is_gone() {
        let err = unsatisfiable(Err(StorageError::NotFound("abcd".into())));
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
