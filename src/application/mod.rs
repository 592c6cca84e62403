//! Orchestration of payment requests, incoming fulfillment and outgoing settlement.
//!
//! Every incoming transfer runs through its own `tokio` task; the listener cache owns
//! the lifetime of per-account subscriptions.

pub mod cache;
pub mod fulfillment;
pub mod issuer;
pub mod service;
pub mod settlement;
