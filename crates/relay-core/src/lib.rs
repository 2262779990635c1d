//! Shared core abstractions for the relay.
//!
//! This crate defines the cross-crate contracts used by the gateway and the binary: domain
//! types for workers/tasks/sessions, the HMAC spawn-gate primitives, the sliding-window rate
//! limiter, and the `ApexClient`/`OperatorNotifier` traits that keep the gateway's business
//! logic independent of any concrete HTTP client.
//!
//! # API notes
//! `relay-core` is an internal crate (`publish = false`). Its public API uses a few third-party
//! types (`uuid::Uuid`, `chrono::DateTime<Utc>`, `serde_json::Value`) as part of the relay
//! contract.

pub mod apex;
pub mod audit;
pub mod availability;
pub mod error;
pub mod gate;
pub mod notify;
pub mod rate_limit;
pub mod session;
pub mod task;
pub mod worker;

pub use error::{Error, Result};
