pub mod disk;
pub mod sidecar;
pub mod storage_service;
