//! # Wire Codec
//!
//! The tagged binary object format used on the wire, plus the connection
//! frame codec layered over it.
//!
//! ## Object format
//! A complete message is a 1-byte magic marker (18) followed by an encoded
//! object. An object is a big-endian 16-bit field count, then per field a
//! 16-bit-length-prefixed UTF-8 key and a tagged value. Each value starts
//! with a 1-byte type tag (see [`tag`]); array values carry a 16-bit element
//! count (byte arrays use 32 bits), strings a 16-bit byte count. Nested
//! objects are not magic-prefixed.
//!
//! ## Frame format
//! Steady-state connection traffic is framed as: 1 frame-type byte
//! (0 = disconnect, 1 = ping, >=2 = data), and for data frames a 4-byte
//! big-endian body length followed by that many body bytes.
//!
//! Decoding is total over well-formed input: an unknown tag, a negative
//! count, or a truncated buffer is a hard error, never a partial value.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::value::{SfsObject, SfsValue};
use crate::error::{ProtocolError, Result};

/// Magic marker preceding every top-level encoded object.
pub const MAGIC_BYTE: u8 = 18;

/// Longest string (or key) the 16-bit length prefix can carry.
pub const MAX_STRING_LEN: usize = i16::MAX as usize;

/// Frame body size ceiling enforced by [`FrameCodec`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Wire type tags, one per [`SfsValue`] variant.
pub mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const BYTE: u8 = 2;
    pub const SHORT: u8 = 3;
    pub const INT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const FLOAT: u8 = 6;
    pub const DOUBLE: u8 = 7;
    pub const STRING: u8 = 8;
    pub const BOOL_ARRAY: u8 = 9;
    pub const BYTE_ARRAY: u8 = 10;
    pub const SHORT_ARRAY: u8 = 11;
    pub const INT_ARRAY: u8 = 12;
    pub const LONG_ARRAY: u8 = 13;
    pub const FLOAT_ARRAY: u8 = 14;
    pub const DOUBLE_ARRAY: u8 = 15;
    pub const STRING_ARRAY: u8 = 16;
    pub const OBJECT_ARRAY: u8 = 17;
    pub const OBJECT: u8 = 18;
    /// Class-marked object variant. Decoded identically to [`OBJECT`].
    pub const CLASS_OBJECT: u8 = 19;
}

/// Encodes `obj` as a complete message: magic marker plus object body.
pub fn encode_object(obj: &SfsObject) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(MAGIC_BYTE);
    write_object(&mut buf, obj)?;
    Ok(buf.freeze())
}

/// Decodes a complete message produced by [`encode_object`].
///
/// The entire input must be consumed; trailing garbage is a decode error.
pub fn decode_object(bytes: &[u8]) -> Result<SfsObject> {
    let mut reader = Reader::new(bytes);
    let magic = reader.u8()?;
    if magic != MAGIC_BYTE {
        return Err(ProtocolError::InvalidMagic(magic));
    }
    let obj = read_object(&mut reader)?;
    if !reader.is_empty() {
        return Err(ProtocolError::InvalidEnvelope(format!(
            "{} trailing bytes after object",
            reader.remaining()
        )));
    }
    Ok(obj)
}

fn write_object(buf: &mut BytesMut, obj: &SfsObject) -> Result<()> {
    let count = obj.len();
    if count > i16::MAX as usize {
        return Err(ProtocolError::OversizedFrame(count));
    }
    buf.put_i16(count as i16);
    for (key, value) in obj.iter() {
        write_string(buf, key)?;
        write_value(buf, value)?;
    }
    Ok(())
}

fn write_value(buf: &mut BytesMut, value: &SfsValue) -> Result<()> {
    match value {
        SfsValue::Null => buf.put_u8(tag::NULL),
        SfsValue::Bool(v) => {
            buf.put_u8(tag::BOOL);
            buf.put_u8(u8::from(*v));
        }
        SfsValue::Byte(v) => {
            buf.put_u8(tag::BYTE);
            buf.put_i8(*v);
        }
        SfsValue::Short(v) => {
            buf.put_u8(tag::SHORT);
            buf.put_i16(*v);
        }
        SfsValue::Int(v) => {
            buf.put_u8(tag::INT);
            buf.put_i32(*v);
        }
        SfsValue::Long(v) => {
            buf.put_u8(tag::LONG);
            buf.put_i64(*v);
        }
        SfsValue::Float(v) => {
            buf.put_u8(tag::FLOAT);
            buf.put_f32(*v);
        }
        SfsValue::Double(v) => {
            buf.put_u8(tag::DOUBLE);
            buf.put_f64(*v);
        }
        SfsValue::String(v) => {
            buf.put_u8(tag::STRING);
            write_string(buf, v)?;
        }
        SfsValue::BoolArray(items) => {
            buf.put_u8(tag::BOOL_ARRAY);
            write_count16(buf, items.len())?;
            for v in items {
                buf.put_u8(u8::from(*v));
            }
        }
        SfsValue::ByteArray(items) => {
            buf.put_u8(tag::BYTE_ARRAY);
            if items.len() > i32::MAX as usize {
                return Err(ProtocolError::OversizedFrame(items.len()));
            }
            buf.put_i32(items.len() as i32);
            buf.put_slice(items);
        }
        SfsValue::ShortArray(items) => {
            buf.put_u8(tag::SHORT_ARRAY);
            write_count16(buf, items.len())?;
            for v in items {
                buf.put_i16(*v);
            }
        }
        SfsValue::IntArray(items) => {
            buf.put_u8(tag::INT_ARRAY);
            write_count16(buf, items.len())?;
            for v in items {
                buf.put_i32(*v);
            }
        }
        SfsValue::LongArray(items) => {
            buf.put_u8(tag::LONG_ARRAY);
            write_count16(buf, items.len())?;
            for v in items {
                buf.put_i64(*v);
            }
        }
        SfsValue::FloatArray(items) => {
            buf.put_u8(tag::FLOAT_ARRAY);
            write_count16(buf, items.len())?;
            for v in items {
                buf.put_f32(*v);
            }
        }
        SfsValue::DoubleArray(items) => {
            buf.put_u8(tag::DOUBLE_ARRAY);
            write_count16(buf, items.len())?;
            for v in items {
                buf.put_f64(*v);
            }
        }
        SfsValue::StringArray(items) => {
            buf.put_u8(tag::STRING_ARRAY);
            write_count16(buf, items.len())?;
            for v in items {
                write_string(buf, v)?;
            }
        }
        SfsValue::ObjectArray(items) => {
            buf.put_u8(tag::OBJECT_ARRAY);
            write_count16(buf, items.len())?;
            for v in items {
                write_value(buf, v)?;
            }
        }
        SfsValue::Object(obj) => {
            if obj.is_class_marked() {
                buf.put_u8(tag::CLASS_OBJECT);
            } else {
                buf.put_u8(tag::OBJECT);
            }
            write_object(buf, obj)?;
        }
    }
    Ok(())
}

fn write_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(ProtocolError::OversizedString(s.len()));
    }
    buf.put_i16(s.len() as i16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn write_count16(buf: &mut BytesMut, count: usize) -> Result<()> {
    if count > i16::MAX as usize {
        return Err(ProtocolError::OversizedFrame(count));
    }
    buf.put_i16(count as i16);
    Ok(())
}

fn read_object(reader: &mut Reader<'_>) -> Result<SfsObject> {
    let count = reader.count16()?;
    let mut obj = SfsObject::new();
    for _ in 0..count {
        let key = reader.string()?;
        let value = read_value(reader)?;
        obj.put(key, value);
    }
    Ok(obj)
}

fn read_value(reader: &mut Reader<'_>) -> Result<SfsValue> {
    let t = reader.u8()?;
    let value = match t {
        tag::NULL => SfsValue::Null,
        tag::BOOL => SfsValue::Bool(reader.u8()? != 0),
        tag::BYTE => SfsValue::Byte(reader.i8()?),
        tag::SHORT => SfsValue::Short(reader.i16()?),
        tag::INT => SfsValue::Int(reader.i32()?),
        tag::LONG => SfsValue::Long(reader.i64()?),
        tag::FLOAT => SfsValue::Float(reader.f32()?),
        tag::DOUBLE => SfsValue::Double(reader.f64()?),
        tag::STRING => SfsValue::String(reader.string()?),
        tag::BOOL_ARRAY => {
            let count = reader.count16()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.u8()? != 0);
            }
            SfsValue::BoolArray(items)
        }
        tag::BYTE_ARRAY => {
            let count = reader.i32()?;
            if count < 0 {
                return Err(ProtocolError::NegativeLength(count));
            }
            SfsValue::ByteArray(reader.take(count as usize)?.to_vec())
        }
        tag::SHORT_ARRAY => {
            let count = reader.count16()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.i16()?);
            }
            SfsValue::ShortArray(items)
        }
        tag::INT_ARRAY => {
            let count = reader.count16()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.i32()?);
            }
            SfsValue::IntArray(items)
        }
        tag::LONG_ARRAY => {
            let count = reader.count16()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.i64()?);
            }
            SfsValue::LongArray(items)
        }
        tag::FLOAT_ARRAY => {
            let count = reader.count16()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.f32()?);
            }
            SfsValue::FloatArray(items)
        }
        tag::DOUBLE_ARRAY => {
            let count = reader.count16()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.f64()?);
            }
            SfsValue::DoubleArray(items)
        }
        tag::STRING_ARRAY => {
            let count = reader.count16()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.string()?);
            }
            SfsValue::StringArray(items)
        }
        tag::OBJECT_ARRAY => {
            let count = reader.count16()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_value(reader)?);
            }
            SfsValue::ObjectArray(items)
        }
        tag::OBJECT | tag::CLASS_OBJECT => SfsValue::Object(read_object(reader)?),
        other => return Err(ProtocolError::UnknownTag(other)),
    };
    Ok(value)
}

/// Checked cursor over a decode buffer. Every read fails with
/// [`ProtocolError::Truncated`] instead of panicking on underrun.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(ProtocolError::Truncated {
                needed: n - self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(self.take(2)?.get_i16())
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.take(4)?.get_i32())
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(self.take(8)?.get_i64())
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(self.take(4)?.get_f32())
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(self.take(8)?.get_f64())
    }

    /// Reads a 16-bit count, rejecting negative values.
    fn count16(&mut self) -> Result<usize> {
        let count = self.i16()?;
        if count < 0 {
            return Err(ProtocolError::NegativeLength(i32::from(count)));
        }
        Ok(count as usize)
    }

    /// Reads a 16-bit-length-prefixed UTF-8 string.
    fn string(&mut self) -> Result<String> {
        let len = self.count16()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::InvalidEnvelope("string is not valid UTF-8".into()))
    }
}

/// One unit of steady-state connection traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Type 0. After receipt both sides close the socket.
    Disconnect,
    /// Type 1. Resets the receiver's keep-alive expectations, otherwise ignored.
    Ping,
    /// Type >=2. Carries an encoded packet envelope.
    Data(Bytes),
}

/// Frame-type byte values.
pub mod frame_type {
    pub const DISCONNECT: u8 = 0;
    pub const PING: u8 = 1;
    pub const DATA: u8 = 2;
}

/// Length-delimited frame codec for use with `Framed` transports.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(&frame_type) = src.first() else {
            return Ok(None);
        };
        match frame_type {
            frame_type::DISCONNECT => {
                src.advance(1);
                Ok(Some(Frame::Disconnect))
            }
            frame_type::PING => {
                src.advance(1);
                Ok(Some(Frame::Ping))
            }
            _ => {
                if src.len() < 5 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
                if len > self.max_frame_size {
                    return Err(ProtocolError::OversizedFrame(len));
                }
                if src.len() < 5 + len {
                    src.reserve(5 + len - src.len());
                    return Ok(None);
                }
                src.advance(5);
                Ok(Some(Frame::Data(src.split_to(len).freeze())))
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        match frame {
            Frame::Disconnect => dst.put_u8(frame_type::DISCONNECT),
            Frame::Ping => dst.put_u8(frame_type::PING),
            Frame::Data(body) => {
                if body.len() > self.max_frame_size {
                    return Err(ProtocolError::OversizedFrame(body.len()));
                }
                dst.reserve(5 + body.len());
                dst.put_u8(frame_type::DATA);
                dst.put_u32(body.len() as u32);
                dst.put_slice(&body);
            }
        }
        Ok(())
    }
}
