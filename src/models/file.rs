//! Metadata describing a stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a committed object.
///
/// `file_id` is the lowercase hex SHA-256 of the object's bytes, so `sha256`
/// always equals `file_id` for objects written by this service. It is kept as
/// its own field so readers can verify without knowing that invariant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    /// Content address of the object.
    pub file_id: String,

    /// Size in bytes.
    #[serde(rename = "size")]
    pub size_bytes: u64,

    /// Hex SHA-256 digest of the content.
    pub sha256: String,

    /// MIME type supplied at upload time.
    pub content_type: String,

    /// When the object was committed, if known.
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `GET /files/{file_id}/info`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub file_id: String,
    pub size: u64,
    pub sha256: String,
    pub content_type: String,
}

impl From<FileMetadata> for FileInfo {
    fn from(meta: FileMetadata) -> Self {
        Self {
            file_id: meta.file_id,
            size: meta.size_bytes,
            sha256: meta.sha256,
            content_type: meta.content_type,
        }
    }
}
