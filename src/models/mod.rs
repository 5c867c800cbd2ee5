//! Data models shared by the server and the client.
//!
//! Everything here is serialized with `serde` and appears on the wire
//! exactly as declared.

pub mod file;
pub mod wire;
