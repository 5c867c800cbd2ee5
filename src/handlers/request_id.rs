//! Correlation id taken from `X-Request-ID`.

use crate::models::wire::REQUEST_ID_HEADER;
use axum::http::HeaderMap;

/// The caller's `X-Request-ID`, if present and non-blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestId(pub Option<String>);

impl RequestId {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self(
            headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        )
    }
}
