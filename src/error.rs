//! # Error Types
//!
//! Comprehensive error handling for the protocol core.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level I/O errors to high-level wire-format violations.
//!
//! ## Error Categories
//! - **I/O Errors**: Network and socket failures
//! - **Wire Errors**: Bad magic bytes, unknown type tags, truncated frames
//! - **Payload Errors**: Missing or mistyped fields
//! - **Lifecycle Errors**: Handshake failures and closed connections
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use smartfox_protocol::error::{ProtocolError, Result};
//!
//! fn check_magic(byte: u8) -> Result<()> {
//!     if byte != 18 {
//!         return Err(ProtocolError::InvalidMagic(byte));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_magic(18).is_ok());
//! assert!(check_magic(0).is_err());
//! ```

use std::io;
use thiserror::Error;

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid magic byte: {0}")]
    InvalidMagic(u8),

    #[error("Unknown wire type tag: {0}")]
    UnknownTag(u8),

    #[error("Negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("Truncated frame: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("String too long: {0} bytes (limit 32767)")]
    OversizedString(usize),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Invalid packet envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Missing payload field: {0}")]
    MissingField(String),

    #[error("Payload field {key:?} is not a {expected}")]
    FieldType { key: String, expected: &'static str },

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Channel is not bound to a connection")]
    ChannelUnbound,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
