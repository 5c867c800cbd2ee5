use crate::{
    handlers::request_id::RequestId, models::wire::ErrorBody,
    services::storage_service::StorageError,
};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;
use tracing::error;

/// Every failure the HTTP surface can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    BadRequest,
    NotFound,
    /// Malformed or unsupported `Range` header.
    InvalidRange,
    /// Well-formed range outside the object; carries the object size when known.
    RangeNotSatisfiable { size: Option<u64> },
    PayloadTooLarge,
    InsufficientStorage,
    Internal,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidRange | Self::RangeNotSatisfiable { .. } => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidRange => "INVALID_RANGE",
            Self::RangeNotSatisfiable { .. } => "RANGE_NOT_SATISFIABLE",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::InsufficientStorage => "INSUFFICIENT_STORAGE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

/// An error on its way to the wire as `{code, message, request_id}`.
#[derive(Debug)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific code and message.
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            request_id: None,
        }
    }

    /// Attach the caller's correlation id.
    pub fn with_request_id(mut self, request_id: &RequestId) -> Self {
        self.request_id = request_id.0.clone();
        self
    }

    pub fn not_found() -> Self {
        Self::new(ErrorCode::NotFound, "file not found")
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            request_id: self.request_id.clone(),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidId => Self::bad_request("invalid file_id"),
            StorageError::NotFound(_) => Self::not_found(),
            StorageError::InvalidRange => Self::new(ErrorCode::InvalidRange, "invalid range"),
            StorageError::Unsatisfiable => Self::new(
                ErrorCode::RangeNotSatisfiable { size: None },
                "unsatisfiable range",
            ),
            StorageError::TooLarge { .. } => {
                Self::new(ErrorCode::PayloadTooLarge, "file too large")
            }
            StorageError::InsufficientStorage { .. } => {
                Self::new(ErrorCode::InsufficientStorage, "insufficient storage")
            }
            StorageError::Stream(err) => Self::bad_request(err.to_string()),
            StorageError::Io(err) => Self::internal(err.to_string()),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.code == ErrorCode::Internal {
            error!(request_id = ?self.request_id, "internal error: {}", self.message);
        }

        let status = self.status();
        let mut response = (status, Json(self.body())).into_response();
        if let ErrorCode::RangeNotSatisfiable { size: Some(size) } = self.code {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}
