// Path: crates/reencrypt/src/lib.rs
#![forbid(unsafe_code)]

//! # ARCA Reencrypt
//!
//! The header rewrap boundary. The service half is the only process holding
//! the installation's long-term secret key; every other service that needs a
//! header rewrapped goes through the [`client::ReencryptClient`], one RPC
//! with an enforced deadline and no retry.

/// The rewrap client used by the download service.
pub mod client;
/// The rewrap service router and listener.
pub mod server;

pub use client::ReencryptClient;
