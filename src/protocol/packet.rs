//! # Packet Model
//!
//! The envelope that identifies one logical message, and the trait every
//! typed packet definition implements.
//!
//! [`PacketData`] is the (channelId, packetId, payload) triple. On the wire
//! it travels as the body of a data frame: channel id and packet id as
//! big-endian int32, then a 32-bit length and the codec-encoded payload.
//! A legacy object form (keys `c`, `a`, `p`) survives for the handshake
//! hello, which arrives before steady-state framing is established.
//!
//! [`SfsPacket`] is a prototype: registered instances act as schema
//! (id, `matches`, `synchronized`) and stamp out fresh instances via
//! [`SfsPacket::create`] when a frame matches.

use std::any::Any;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::codec;
use crate::core::payload::Payload;
use crate::core::value::{SfsObject, SfsValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::error_code::SfsErrorCode;

/// Channel id of the system channel (login, rooms, variables).
pub const SYSTEM_CHANNEL_ID: i32 = 0;

/// Channel id of the extension-message channel.
pub const EXTENSION_CHANNEL_ID: i32 = 1;

/// Reserved channel id; such frames are handled by the framing layer,
/// never by channel dispatch.
pub const RESERVED_CHANNEL_ID: i32 = -1;

/// Payload key carrying an error code in error-response packets.
pub const ERROR_CODE_KEY: &str = "ec";

/// Payload key carrying error-message parameters.
pub const ERROR_PARAMS_KEY: &str = "ep";

/// One logical message: channel id, packet id, typed payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PacketData {
    pub channel_id: i32,
    pub packet_id: i32,
    pub payload: Payload,
}

impl PacketData {
    pub fn new(channel_id: i32, packet_id: i32) -> Self {
        Self {
            channel_id,
            packet_id,
            payload: Payload::new(),
        }
    }

    /// Marks this packet as an error response.
    pub fn set_error(&mut self, code: SfsErrorCode, params: Vec<String>) {
        self.payload.set_short(ERROR_CODE_KEY, code.to_short());
        if !params.is_empty() {
            self.payload.set_string_array(ERROR_PARAMS_KEY, params);
        }
    }

    /// Reads the error code, if this packet is an error response.
    pub fn error_code(&self) -> Result<Option<SfsErrorCode>> {
        if !self.payload.has(ERROR_CODE_KEY) {
            return Ok(None);
        }
        let raw = self.payload.get_short(ERROR_CODE_KEY)?;
        Ok(SfsErrorCode::from_short(raw))
    }

    /// Error-message parameters, empty when absent.
    pub fn error_params(&self) -> Vec<String> {
        self.payload
            .get_string_array(ERROR_PARAMS_KEY)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Encodes the steady-state data-frame body.
    pub fn encode_frame_body(&self) -> Result<Bytes> {
        let payload = codec::encode_object(self.payload.as_object())?;
        let mut buf = BytesMut::with_capacity(12 + payload.len());
        buf.put_i32(self.channel_id);
        buf.put_i32(self.packet_id);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decodes a steady-state data-frame body.
    pub fn decode_frame_body(mut body: &[u8]) -> Result<Self> {
        if body.len() < 12 {
            return Err(ProtocolError::Truncated {
                needed: 12 - body.len(),
            });
        }
        let channel_id = body.get_i32();
        let packet_id = body.get_i32();
        let len = body.get_u32() as usize;
        if body.len() != len {
            return Err(ProtocolError::InvalidEnvelope(format!(
                "payload length prefix {len} does not match remaining {} bytes",
                body.len()
            )));
        }
        let payload = Payload::from_object(codec::decode_object(body)?);
        Ok(Self {
            channel_id,
            packet_id,
            payload,
        })
    }

    /// Converts to the legacy envelope object: `c` (byte channel id),
    /// `a` (short packet id), `p` (payload object).
    pub fn to_legacy_object(&self) -> SfsObject {
        let mut obj = SfsObject::new();
        obj.put("c", SfsValue::Byte(self.channel_id as i8));
        obj.put("a", SfsValue::Short(self.packet_id as i16));
        obj.put("p", SfsValue::Object(self.payload.as_object().clone()));
        obj
    }

    /// Parses the legacy envelope object form.
    pub fn from_legacy_object(obj: SfsObject) -> Result<Self> {
        let envelope = Payload::from_object(obj);
        let channel_id = i32::from(envelope.get_byte("c")?);
        let packet_id = i32::from(envelope.get_short("a")?);
        let payload = envelope.get_payload("p")?;
        Ok(Self {
            channel_id,
            packet_id,
            payload,
        })
    }
}

/// A typed packet definition and instance in one.
///
/// Registered prototypes describe the schema; [`SfsPacket::create`] stamps
/// out a fresh instance which [`SfsPacket::parse`] fills from inbound data.
/// Outbound packets implement [`SfsPacket::build`]; packets that only travel
/// one direction leave the other method as a no-op.
pub trait SfsPacket: Any + Send + Sync {
    /// Numeric id this definition claims within its channel.
    fn packet_id(&self) -> i32;

    /// Synchronized packets are handled inline on the connection's read
    /// task, preserving arrival order. Others run on a spawned task.
    fn synchronized(&self) -> bool {
        false
    }

    /// Refines id-based matching when several definitions share an id.
    fn matches(&self, data: &PacketData) -> bool {
        let _ = data;
        true
    }

    /// Fills this instance from inbound packet data.
    fn parse(&mut self, data: &PacketData) -> Result<()>;

    /// Writes this instance into outbound packet data.
    fn build(&self, data: &mut PacketData) -> Result<()>;

    /// Stamps out a fresh instance for parsing.
    fn create(&self) -> Box<dyn SfsPacket>;
}

impl dyn SfsPacket {
    /// Whether the concrete type of this packet is `T`.
    pub fn is<T: SfsPacket>(&self) -> bool {
        (self as &dyn Any).is::<T>()
    }

    /// Borrow as concrete type `T` if it is one.
    pub fn downcast_ref<T: SfsPacket>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }

    /// Convert an owned packet into its concrete type.
    pub fn downcast<T: SfsPacket>(self: Box<Self>) -> Option<Box<T>> {
        (self as Box<dyn Any>).downcast::<T>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_body_round_trip() {
        let mut data = PacketData::new(SYSTEM_CHANNEL_ID, 7);
        data.payload.set_string("m", "hi").set_int("r", 3);

        let body = data.encode_frame_body().unwrap();
        let decoded = PacketData::decode_frame_body(&body).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn frame_body_length_mismatch_rejected() {
        let data = PacketData::new(0, 1);
        let mut body = data.encode_frame_body().unwrap().to_vec();
        body.push(0xFF);
        assert!(PacketData::decode_frame_body(&body).is_err());
    }

    #[test]
    fn legacy_object_round_trip() {
        let mut data = PacketData::new(EXTENSION_CHANNEL_ID, 13);
        data.payload.set_string("c", "shoot");

        let decoded = PacketData::from_legacy_object(data.to_legacy_object()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn error_fields_round_trip() {
        let mut data = PacketData::new(0, 1);
        data.set_error(SfsErrorCode::RoomFull, vec!["lobby".into()]);

        assert_eq!(data.error_code().unwrap(), Some(SfsErrorCode::RoomFull));
        assert_eq!(data.error_params(), vec!["lobby".to_owned()]);
    }

    #[test]
    fn error_code_absent_when_not_set() {
        let data = PacketData::new(0, 1);
        assert_eq!(data.error_code().unwrap(), None);
        assert!(data.error_params().is_empty());
    }
}
