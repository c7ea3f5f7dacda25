//! # Wire Value Model
//!
//! Dynamically typed values carried by the tagged binary wire format.
//!
//! Every value that crosses the wire is one of the [`SfsValue`] variants:
//! scalars, homogeneous arrays, a heterogeneous sequence, or a nested
//! key/value object. [`SfsObject`] preserves insertion order so that
//! re-encoding a decoded object produces the original byte sequence.

use std::fmt;

/// A single dynamically typed wire value.
///
/// Variants map one-to-one onto the wire type tags used by the binary
/// codec (see [`crate::core::codec`]).
#[derive(Debug, Clone, PartialEq)]
pub enum SfsValue {
    /// Absent value (tag 0)
    Null,
    /// Boolean (tag 1)
    Bool(bool),
    /// Signed 8-bit integer (tag 2)
    Byte(i8),
    /// Signed 16-bit integer (tag 3)
    Short(i16),
    /// Signed 32-bit integer (tag 4)
    Int(i32),
    /// Signed 64-bit integer (tag 5)
    Long(i64),
    /// IEEE-754 single precision (tag 6)
    Float(f32),
    /// IEEE-754 double precision (tag 7)
    Double(f64),
    /// UTF-8 string, at most 32767 encoded bytes (tag 8)
    String(String),
    /// Homogeneous boolean array (tag 9)
    BoolArray(Vec<bool>),
    /// Raw byte array (tag 10)
    ByteArray(Vec<u8>),
    /// Homogeneous i16 array (tag 11)
    ShortArray(Vec<i16>),
    /// Homogeneous i32 array (tag 12)
    IntArray(Vec<i32>),
    /// Homogeneous i64 array (tag 13)
    LongArray(Vec<i64>),
    /// Homogeneous f32 array (tag 14)
    FloatArray(Vec<f32>),
    /// Homogeneous f64 array (tag 15)
    DoubleArray(Vec<f64>),
    /// Homogeneous string array (tag 16)
    StringArray(Vec<String>),
    /// Heterogeneous sequence of arbitrary values (tag 17)
    ObjectArray(Vec<SfsValue>),
    /// Nested key/value object (tag 18, or 19 when class-marked)
    Object(SfsObject),
}

impl SfsValue {
    /// Short name of the variant, used in error messages and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            SfsValue::Null => "null",
            SfsValue::Bool(_) => "bool",
            SfsValue::Byte(_) => "byte",
            SfsValue::Short(_) => "short",
            SfsValue::Int(_) => "int",
            SfsValue::Long(_) => "long",
            SfsValue::Float(_) => "float",
            SfsValue::Double(_) => "double",
            SfsValue::String(_) => "string",
            SfsValue::BoolArray(_) => "bool array",
            SfsValue::ByteArray(_) => "byte array",
            SfsValue::ShortArray(_) => "short array",
            SfsValue::IntArray(_) => "int array",
            SfsValue::LongArray(_) => "long array",
            SfsValue::FloatArray(_) => "float array",
            SfsValue::DoubleArray(_) => "double array",
            SfsValue::StringArray(_) => "string array",
            SfsValue::ObjectArray(_) => "object array",
            SfsValue::Object(_) => "object",
        }
    }
}

impl From<bool> for SfsValue {
    fn from(v: bool) -> Self {
        SfsValue::Bool(v)
    }
}

impl From<i8> for SfsValue {
    fn from(v: i8) -> Self {
        SfsValue::Byte(v)
    }
}

impl From<i16> for SfsValue {
    fn from(v: i16) -> Self {
        SfsValue::Short(v)
    }
}

impl From<i32> for SfsValue {
    fn from(v: i32) -> Self {
        SfsValue::Int(v)
    }
}

impl From<i64> for SfsValue {
    fn from(v: i64) -> Self {
        SfsValue::Long(v)
    }
}

impl From<f32> for SfsValue {
    fn from(v: f32) -> Self {
        SfsValue::Float(v)
    }
}

impl From<f64> for SfsValue {
    fn from(v: f64) -> Self {
        SfsValue::Double(v)
    }
}

impl From<&str> for SfsValue {
    fn from(v: &str) -> Self {
        SfsValue::String(v.to_owned())
    }
}

impl From<String> for SfsValue {
    fn from(v: String) -> Self {
        SfsValue::String(v)
    }
}

impl From<SfsObject> for SfsValue {
    fn from(v: SfsObject) -> Self {
        SfsValue::Object(v)
    }
}

impl From<Vec<SfsValue>> for SfsValue {
    fn from(v: Vec<SfsValue>) -> Self {
        SfsValue::ObjectArray(v)
    }
}

/// An ordered key/value map of wire values.
///
/// Keys are UTF-8 strings limited to 32767 encoded bytes, the same limit
/// the wire format places on string values. Insertion order is preserved;
/// setting an existing key replaces the value in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SfsObject {
    entries: Vec<(String, SfsValue)>,
}

impl SfsObject {
    /// Creates an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the object has no fields.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets `key` to `value`, replacing any existing value in place.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<SfsValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&SfsValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<SfsValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Removes all fields.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SfsValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Whether the object carries the class-marker keys `$C` and `$F`.
    ///
    /// Class-marked objects are written with wire tag 19 instead of 18;
    /// their contents are encoded identically.
    pub fn is_class_marked(&self) -> bool {
        self.contains_key("$C") && self.contains_key("$F")
    }
}

impl FromIterator<(String, SfsValue)> for SfsObject {
    fn from_iter<T: IntoIterator<Item = (String, SfsValue)>>(iter: T) -> Self {
        let mut obj = SfsObject::new();
        for (k, v) in iter {
            obj.put(k, v);
        }
        obj
    }
}

impl fmt::Display for SfsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {}", v.type_name())?;
        }
        write!(f, "}}")
    }
}
