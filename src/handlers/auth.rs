//! Per-capability API key checks.

use crate::{
    config::ApiKeys,
    errors::{AppError, ErrorCode},
    models::wire::API_KEY_HEADER,
};
use axum::http::HeaderMap;
use std::collections::BTreeSet;

/// Capability a request exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Upload,
    Read,
    Delete,
}

impl ApiKeys {
    pub fn for_permission(&self, permission: Permission) -> &BTreeSet<String> {
        match permission {
            Permission::Upload => &self.upload,
            Permission::Read => &self.read,
            Permission::Delete => &self.delete,
        }
    }
}

/// Check the `X-API-Key` header against the tier for `permission`.
///
/// An empty tier lets everything through. Otherwise a missing or blank key
/// is 401 and an unknown key is 403.
pub fn authorize(keys: &ApiKeys, permission: Permission, headers: &HeaderMap) -> Result<(), AppError> {
    let allowed = keys.for_permission(permission);
    if allowed.is_empty() {
        return Ok(());
    }

    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match key {
        None => Err(AppError::new(ErrorCode::Unauthorized, "missing API key")),
        Some(key) if allowed.contains(key) => Ok(()),
        Some(_) => Err(AppError::new(
            ErrorCode::Forbidden,
            "invalid API key for permission",
        )),
    }
}
