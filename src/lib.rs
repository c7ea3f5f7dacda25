//! # SmartFox Protocol
//!
//! A server-side implementation of the SmartFox binary multiplayer
//! protocol: magic-byte object serialization, packet-channel dispatch,
//! request/response correlation, extension messaging, and room-aware
//! fan-out over TCP.
//!
//! ## Architecture
//! - **core**: Wire values, the magic-byte object codec, and framing
//! - **protocol**: Packet channels, dispatch, correlation, extension hubs
//! - **channels**: The built-in system and extension channel catalogs
//! - **room**: Room/user snapshots and the broadcast coordinator
//! - **server**: TCP listener, per-connection lifecycle, keep-alive
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use smartfox_protocol::config::ServerConfig;
//! use smartfox_protocol::room::{RoomSnapshot, ZoneView};
//! use smartfox_protocol::server::server::Server;
//!
//! struct EmptyZone;
//!
//! impl ZoneView for EmptyZone {
//!     fn is_subscribed(&self, _player_id: &str, _group: &str) -> bool {
//!         false
//!     }
//!     fn rooms_of(&self, _player_id: &str) -> Vec<RoomSnapshot> {
//!         Vec::new()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> smartfox_protocol::error::Result<()> {
//!     let config = ServerConfig::default();
//!     let server = Arc::new(Server::new(config, Arc::new(EmptyZone)));
//!     server.start().await
//! }
//! ```

pub mod channels;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod room;
pub mod server;

pub use config::ServerConfig;
pub use core::codec::{Frame, FrameCodec};
pub use core::payload::Payload;
pub use core::value::{SfsObject, SfsValue};
pub use error::{ProtocolError, Result};
pub use protocol::channel::{Channel, ChannelContext, ChannelRegistry, ChannelSpec, PacketHandler};
pub use protocol::error_code::SfsErrorCode;
pub use protocol::extension::{
    ExtensionHub, ExtensionMessage, ExtensionRegistry, ExtensionSpec, MessageHandler,
};
pub use protocol::packet::{PacketData, SfsPacket};
pub use room::broadcast::BroadcastCoordinator;
pub use room::{PlayerBinding, RoomEvent, RoomSnapshot, UserSnapshot, VariableSnapshot, ZoneView};
pub use server::connection::{Connection, ConnectionState, SessionMemory};
pub use server::server::{Server, ServerEvent};
