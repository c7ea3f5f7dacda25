//! # Core Protocol Components
//!
//! The tagged binary wire format and the typed payload built on it.
//!
//! This module is the foundation of the protocol: it knows how bytes become
//! values and values become bytes, and nothing about packet semantics.
//!
//! ## Components
//! - **Value**: the tagged union of wire values and the ordered object map
//! - **Codec**: object encode/decode plus the Tokio frame codec
//! - **Payload**: typed field access used by packet definitions
//!
//! ## Wire Format
//! ```text
//! message:  [Magic(1)=18] [Object]
//! object:   [FieldCount(2)] ( [KeyLen(2)] [Key] [Tag(1)] [Value] )*
//! frame:    [Type(1)] ( [Length(4)] [Body(N)] )    body only when Type >= 2
//! ```
//!
//! ## Safety
//! - Frame body size capped before allocation
//! - Negative counts and unknown tags rejected outright
//! - String lengths bounded by the 16-bit wire prefix

pub mod codec;
pub mod payload;
pub mod value;
