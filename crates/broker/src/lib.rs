// Path: crates/broker/src/lib.rs
#![forbid(unsafe_code)]

//! # ARCA Broker
//!
//! A durable topic-exchange message transport with at-least-once delivery.
//!
//! Messages are journaled per queue in a `redb` database before a delivery
//! is handed to a consumer; a delivery disappears from the journal only when
//! it is acked. Unacked deliveries — including those of a crashed process —
//! are delivered again on the next subscription, so every handler body must
//! be idempotent. Back-pressure is the bounded delivery channel: at most
//! `prefetch` deliveries are outstanding per consumer.
//!
//! The crate also carries the JSON-schema validator every inbound and
//! outbound body passes through.

mod exchange;
/// Validation of message bodies against named JSON schemas.
pub mod schema;

pub use exchange::{Broker, Delivery};
pub use schema::SchemaValidator;
