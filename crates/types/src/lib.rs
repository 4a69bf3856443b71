// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # ARCA Types
//!
//! This crate is the foundational library for the ARCA pipeline, containing
//! all core data structures, error types, and configuration objects.
//!
//! ## Architectural Role
//!
//! As the base crate, `arca-types` has minimal dependencies and is itself a
//! dependency for almost every other crate in the workspace. This structure
//! prevents circular dependencies and provides a stable, canonical definition
//! for shared types like `FileEvent`, `FileInfo`, the message envelopes, and
//! the error enums.

/// Shared configuration structures for every ARCA service.
pub mod config;
/// A unified set of all error types used across the workspace.
pub mod error;
/// Message envelopes carried over the broker.
pub mod message;
/// Core domain records: files, events, datasets, accessions, key hashes.
pub mod model;

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::StoreError> = std::result::Result<T, E>;
