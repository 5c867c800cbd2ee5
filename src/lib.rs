//! data-bank: a content-addressed blob store and its client.
//!
//! - [`services::storage_service`] owns the on-disk layout (hash-addressed
//!   paths, atomic commits, sidecar metadata, ranged reads).
//! - [`handlers`] and [`routes`] expose it over HTTP with per-capability API
//!   keys and single-range `Range` support.
//! - [`client`] speaks the same protocol, adding retries, resumable downloads
//!   and SHA-256 verification.

pub mod client;
pub mod config;
pub mod digest;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use client::{
    ClientBuilder, ClientError, DataBankClient, DownloadOptions, RemoteHead, RetryPolicy,
};
pub use config::{ApiKeys, AppConfig};
pub use services::storage_service::{StorageError, StorageService};
pub use state::AppState;
