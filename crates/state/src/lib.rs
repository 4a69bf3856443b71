// Path: crates/state/src/lib.rs
#![forbid(unsafe_code)]

//! # ARCA State
//!
//! The pipeline's registry: files, their append-only event log,
//! archive/verify metadata, accession assignment, dataset mapping with its
//! own event log, and the encryption-key registry.
//!
//! Everything persists in one `redb` database. Each write operation is a
//! single transaction; the relational rules of the schema — foreign keys
//! from metadata rows to files, the `(file_id, correlation_id)` uniqueness
//! fences, accession uniqueness — are enforced inside that transaction. A
//! file's status is never stored: it is the projection of the most recent
//! row in its event log.

mod store;

pub use store::{StateStore, REQUIRED_SCHEMA_VERSION};
