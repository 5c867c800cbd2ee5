//! Client error taxonomy and the single status-to-error mapping table.

use crate::models::wire::ErrorBody;
use reqwest::StatusCode;
use std::{fmt, io};
use thiserror::Error;

/// A non-2xx answer from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: u16,
    /// Parsed `{code, message, request_id}` body; absent for HEAD and for
    /// bodies that are not the service's error format.
    pub body: Option<ErrorBody>,
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn code(&self) -> Option<&str> {
        self.body.as_ref().map(|b| b.code.as_str())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Some(body) => write!(f, "HTTP {} {}: {}", self.status, body.code, body.message),
            None => write!(f, "HTTP {}", self.status),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unauthorized: {0}")]
    Authorization(ErrorResponse),
    #[error("forbidden: {0}")]
    Forbidden(ErrorResponse),
    #[error("bad request: {0}")]
    BadRequest(ErrorResponse),
    #[error("not found: {0}")]
    NotFound(ErrorResponse),
    #[error("payload too large: {0}")]
    TooLarge(ErrorResponse),
    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(ErrorResponse),
    #[error("insufficient storage: {0}")]
    InsufficientStorage(ErrorResponse),
    #[error("unexpected response: {0}")]
    Status(ErrorResponse),
    #[error("integrity check failed: expected sha256 {expected}, got {actual}")]
    Integrity { expected: String, actual: String },
    #[error("invalid content type `{0}`")]
    InvalidContentType(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Translate a non-2xx status into its typed error.
    pub fn from_response(
        status: StatusCode,
        body: Option<ErrorBody>,
        request_id: Option<String>,
    ) -> Self {
        let request_id = request_id.or_else(|| body.as_ref().and_then(|b| b.request_id.clone()));
        let response = ErrorResponse {
            status: status.as_u16(),
            body,
            request_id,
        };
        match status {
            StatusCode::UNAUTHORIZED => Self::Authorization(response),
            StatusCode::FORBIDDEN => Self::Forbidden(response),
            StatusCode::BAD_REQUEST => Self::BadRequest(response),
            StatusCode::NOT_FOUND => Self::NotFound(response),
            StatusCode::PAYLOAD_TOO_LARGE => Self::TooLarge(response),
            StatusCode::RANGE_NOT_SATISFIABLE => Self::RangeNotSatisfiable(response),
            StatusCode::INSUFFICIENT_STORAGE => Self::InsufficientStorage(response),
            _ => Self::Status(response),
        }
    }

    /// The server's answer, for errors that came from one.
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Authorization(r)
            | Self::Forbidden(r)
            | Self::BadRequest(r)
            | Self::NotFound(r)
            | Self::TooLarge(r)
            | Self::RangeNotSatisfiable(r)
            | Self::InsufficientStorage(r)
            | Self::Status(r) => Some(r),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    /// Only failures to get any response are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: &str) -> Option<ErrorBody> {
        Some(ErrorBody {
            code: code.into(),
            message: "m".into(),
            request_id: Some("from-body".into()),
        })
    }

    #[test]
    fn mapping_table() {
        let map = |status: u16| {
            ClientError::from_response(StatusCode::from_u16(status).unwrap(), body("X"), None)
        };
        assert!(matches!(map(401), ClientError::Authorization(_)));
        assert!(matches!(map(403), ClientError::Forbidden(_)));
        assert!(matches!(map(400), ClientError::BadRequest(_)));
        assert!(matches!(map(404), ClientError::NotFound(_)));
        assert!(matches!(map(413), ClientError::TooLarge(_)));
        assert!(matches!(map(416), ClientError::RangeNotSatisfiable(_)));
        assert!(matches!(map(507), ClientError::InsufficientStorage(_)));
        assert!(matches!(map(502), ClientError::Status(_)));
        assert!(matches!(map(500), ClientError::Status(_)));
        assert!(matches!(map(409), ClientError::Status(_)));
    }

    #[test]
    fn carries_status_body_and_request_id() {
        let err = ClientError::from_response(StatusCode::BAD_GATEWAY, body("ERROR"), Some("sent".into()));
        let response = err.response().unwrap();
        assert_eq!(err.status(), Some(502));
        assert_eq!(response.code(), Some("ERROR"));
        assert_eq!(response.request_id.as_deref(), Some("sent"));

        let err = ClientError::from_response(StatusCode::NOT_FOUND, body("NOT_FOUND"), None);
        assert_eq!(err.response().unwrap().request_id.as_deref(), Some("from-body"));
    }

    #[test]
    fn received_responses_are_not_retryable() {
        let err = ClientError::from_response(StatusCode::SERVICE_UNAVAILABLE, None, None);
        assert!(!err.is_retryable());
        assert!(!ClientError::Protocol("x".into()).is_retryable());
    }
}
