// Path: crates/api/src/lib.rs

//! # ARCA API Crate Lints
//!
//! This crate enforces a strict set of lints to ensure high-quality,
//! panic-free, and well-documented code. Panics are disallowed in non-test
//! code to promote robust error handling.
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! # ARCA API
//!
//! Core traits and interfaces for the ARCA pipeline. This crate defines the
//! stable contract between the services and their pluggable backends.

/// The rewrap seam towards the out-of-process key-custody service.
pub mod reencrypt;
/// An API for streaming byte storage over posix or object stores.
pub mod storage;

/// A curated set of the most commonly used traits and types.
pub mod prelude {
    pub use crate::reencrypt::HeaderRewrap;
    pub use crate::storage::{FileWriter, StorageBackend, StorageError};
}
