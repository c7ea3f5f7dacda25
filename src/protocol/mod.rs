//! # Protocol Layer
//!
//! Packet semantics on top of the core wire format.
//!
//! ## Components
//! - **Packet**: the envelope triple and the typed packet trait
//! - **Error codes**: the fixed `ec` enumeration for error responses
//! - **Channel**: per-sub-protocol registry, dispatch, and correlation
//! - **Extension**: command-keyed custom messages tunneled over channel 1

pub mod channel;
pub mod error_code;
pub mod extension;
pub mod packet;
