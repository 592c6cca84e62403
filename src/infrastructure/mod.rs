//! Adapters for the domain ports.

pub mod http_backend;
pub mod in_memory;
