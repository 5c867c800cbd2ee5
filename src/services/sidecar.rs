//! Sidecar metadata stored next to each blob as `key=value` lines.
//!
//! ```text
//! sha256=<64 hex chars>
//! content_type=<mime>
//! created_at=<rfc3339>
//! ```
//!
//! Parsing never fails: unknown lines are skipped and malformed values are
//! treated as absent so callers can fall back to recomputing them.

use crate::digest::is_sha256_hex;
use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sidecar {
    pub sha256: Option<String>,
    pub content_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Sidecar {
    pub fn new(sha256: &str, content_type: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            sha256: Some(sha256.to_string()),
            content_type: Some(content_type.to_string()),
            created_at: Some(created_at),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut sidecar = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "sha256" if is_sha256_hex(value) => {
                    sidecar.sha256 = Some(value.to_ascii_lowercase());
                }
                "content_type" if !value.is_empty() => {
                    sidecar.content_type = Some(value.to_string());
                }
                "created_at" => {
                    sidecar.created_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|ts| ts.with_timezone(&Utc));
                }
                _ => {}
            }
        }
        sidecar
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(sha) = &self.sha256 {
            out.push_str(&format!("sha256={}\n", sha));
        }
        if let Some(ct) = &self.content_type {
            // a newline would end the record early
            let ct: String = ct.chars().filter(|c| *c != '\n' && *c != '\r').collect();
            out.push_str(&format!("content_type={}\n", ct));
        }
        if let Some(ts) = &self.created_at {
            out.push_str(&format!(
                "created_at={}\n",
                ts.to_rfc3339_opts(SecondsFormat::Micros, true)
            ));
        }
        out
    }
}
