// Path: crates/download/src/lib.rs
#![forbid(unsafe_code)]

//! # ARCA Download
//!
//! The read side of the pipeline: permission-checked dataset and file
//! listings, and a ranged streaming reader that reconstructs the encrypted
//! stream (archive body prefixed with the stored header), optionally
//! rewraps the header for the requesting client, and serves either
//! encrypted or decrypted bytes.

/// The HTTP endpoints and the ranged read algorithm.
pub mod api;
/// Bearer-token validation and the per-request permission cache.
pub mod auth;

pub use api::{run_server, set_backend, AppState};
pub use auth::{PermissionCache, TokenVerifier};
