//! # Payload Model
//!
//! Typed access to a decoded wire object.
//!
//! [`Payload`] wraps an [`SfsObject`] and exposes per-type getters and
//! setters, so packet definitions never touch the raw tagged union. A getter
//! on a missing key, or on a key holding a different wire type, fails loudly
//! with [`ProtocolError::MissingField`] / [`ProtocolError::FieldType`];
//! callers check optional fields with [`Payload::has`] first.

use std::fmt;

use crate::core::value::{SfsObject, SfsValue};
use crate::error::{ProtocolError, Result};

/// Typed, keyed container decoded from / encoded to the wire format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    obj: SfsObject,
}

macro_rules! scalar_accessors {
    ($getter:ident, $setter:ident, $variant:ident, $ty:ty, $name:literal) => {
        #[doc = concat!("Reads the ", $name, " stored under `key`.")]
        pub fn $getter(&self, key: &str) -> Result<$ty> {
            match self.raw(key)? {
                SfsValue::$variant(v) => Ok(*v),
                _ => Err(self.type_error(key, $name)),
            }
        }

        #[doc = concat!("Stores a ", $name, " under `key`.")]
        pub fn $setter(&mut self, key: impl Into<String>, value: $ty) -> &mut Self {
            self.obj.put(key, SfsValue::$variant(value));
            self
        }
    };
}

impl Payload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already-decoded object.
    pub fn from_object(obj: SfsObject) -> Self {
        Self { obj }
    }

    /// Unwraps to the underlying object for encoding.
    pub fn into_object(self) -> SfsObject {
        self.obj
    }

    /// Borrow the underlying object.
    pub fn as_object(&self) -> &SfsObject {
        &self.obj
    }

    /// Whether `key` is present, regardless of its type.
    pub fn has(&self, key: &str) -> bool {
        self.obj.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.obj.keys()
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.obj.remove(key).is_some()
    }

    fn raw(&self, key: &str) -> Result<&SfsValue> {
        self.obj
            .get(key)
            .ok_or_else(|| ProtocolError::MissingField(key.to_owned()))
    }

    fn type_error(&self, key: &str, expected: &'static str) -> ProtocolError {
        ProtocolError::FieldType {
            key: key.to_owned(),
            expected,
        }
    }

    scalar_accessors!(get_bool, set_bool, Bool, bool, "bool");
    scalar_accessors!(get_byte, set_byte, Byte, i8, "byte");
    scalar_accessors!(get_short, set_short, Short, i16, "short");
    scalar_accessors!(get_int, set_int, Int, i32, "int");
    scalar_accessors!(get_long, set_long, Long, i64, "long");
    scalar_accessors!(get_float, set_float, Float, f32, "float");
    scalar_accessors!(get_double, set_double, Double, f64, "double");

    /// Reads the string stored under `key`.
    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.raw(key)? {
            SfsValue::String(v) => Ok(v),
            _ => Err(self.type_error(key, "string")),
        }
    }

    /// Stores a string under `key`.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.obj.put(key, SfsValue::String(value.into()));
        self
    }

    /// Reads the string array stored under `key`.
    pub fn get_string_array(&self, key: &str) -> Result<&[String]> {
        match self.raw(key)? {
            SfsValue::StringArray(v) => Ok(v),
            _ => Err(self.type_error(key, "string array")),
        }
    }

    /// Stores a string array under `key`.
    pub fn set_string_array(&mut self, key: impl Into<String>, value: Vec<String>) -> &mut Self {
        self.obj.put(key, SfsValue::StringArray(value));
        self
    }

    /// Reads the byte array stored under `key`.
    pub fn get_byte_array(&self, key: &str) -> Result<&[u8]> {
        match self.raw(key)? {
            SfsValue::ByteArray(v) => Ok(v),
            _ => Err(self.type_error(key, "byte array")),
        }
    }

    /// Stores a byte array under `key`.
    pub fn set_byte_array(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.obj.put(key, SfsValue::ByteArray(value));
        self
    }

    /// Reads the int array stored under `key`.
    pub fn get_int_array(&self, key: &str) -> Result<&[i32]> {
        match self.raw(key)? {
            SfsValue::IntArray(v) => Ok(v),
            _ => Err(self.type_error(key, "int array")),
        }
    }

    /// Stores an int array under `key`.
    pub fn set_int_array(&mut self, key: impl Into<String>, value: Vec<i32>) -> &mut Self {
        self.obj.put(key, SfsValue::IntArray(value));
        self
    }

    /// Reads the heterogeneous value sequence stored under `key`.
    pub fn get_object_array(&self, key: &str) -> Result<&[SfsValue]> {
        match self.raw(key)? {
            SfsValue::ObjectArray(v) => Ok(v),
            _ => Err(self.type_error(key, "object array")),
        }
    }

    /// Stores a heterogeneous value sequence under `key`.
    pub fn set_object_array(&mut self, key: impl Into<String>, value: Vec<SfsValue>) -> &mut Self {
        self.obj.put(key, SfsValue::ObjectArray(value));
        self
    }

    /// Reads the nested object stored under `key` as a payload view.
    pub fn get_payload(&self, key: &str) -> Result<Payload> {
        match self.raw(key)? {
            SfsValue::Object(v) => Ok(Payload::from_object(v.clone())),
            _ => Err(self.type_error(key, "object")),
        }
    }

    /// Stores a nested payload under `key`.
    pub fn set_payload(&mut self, key: impl Into<String>, value: Payload) -> &mut Self {
        self.obj.put(key, SfsValue::Object(value.into_object()));
        self
    }

    /// Stores an explicit null under `key`.
    pub fn set_null(&mut self, key: impl Into<String>) -> &mut Self {
        self.obj.put(key, SfsValue::Null);
        self
    }
}

impl From<SfsObject> for Payload {
    fn from(obj: SfsObject) -> Self {
        Payload::from_object(obj)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.obj.fmt(f)
    }
}
