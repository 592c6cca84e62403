//! Domain types and the ports the service talks to.

pub mod addressing;
pub mod ipr;
pub mod notification;
pub mod payment_request;
pub mod ports;
pub mod transfer;
