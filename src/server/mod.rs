//! # Server Layer
//!
//! Socket ownership: the listener, the per-connection lifecycle, and the
//! live-connection set the broadcast coordinator fans out over.

pub mod connection;
#[allow(clippy::module_inception)]
pub mod server;
