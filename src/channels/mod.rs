//! # Built-in Channels
//!
//! The two channel types every connection carries: the system channel
//! (handshake, login, rooms, variables) and the extension channel that
//! tunnels command-keyed custom messages to registered hubs.

pub mod ext;
pub mod system;
