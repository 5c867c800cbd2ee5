//! Header names and the error body format both sides of the protocol agree on.

use serde::{Deserialize, Serialize};

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Correlation header echoed back in error bodies.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Media type for partial responses and objects without a known type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Body of every non-2xx response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `NOT_FOUND`.
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}
