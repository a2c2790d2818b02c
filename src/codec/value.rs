//! The wire value union and its stable one-byte type tags.
//!
//! Every value crossing the channel is one of these kinds. The codec is
//! data-preserving: a decoded value reproduces the exact originating kind
//! (integer vs float, short vs long string, each reference kind), never a
//! lossy approximation.

use bytes::Bytes;

/// Identifier for an executor-side object, issued optimistically by the
/// producer before the creation record is even sent.
///
/// Zero is reserved for "no handle".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u32);

/// Identifier for a mirrored tree node.
///
/// Zero is reserved for "no node" (e.g. an absent sibling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub u32);

/// Capability interface for types that can stand in for themselves on the
/// wire as a reference, instead of being serialized by content.
///
/// Implemented by every remote-backed type; the encoder only ever consumes
/// [`WireValue`], so there is no property probing anywhere in the codec.
pub trait AsWireReference {
    /// The reference value that represents this object on the wire.
    fn as_wire_ref(&self) -> WireValue;
}

impl AsWireReference for ObjectHandle {
    fn as_wire_ref(&self) -> WireValue {
        WireValue::Remote(*self)
    }
}

impl AsWireReference for NodeHandle {
    fn as_wire_ref(&self) -> WireValue {
        WireValue::Node(*self)
    }
}

/// Tagged union over every value kind the protocol can carry.
///
/// Integer width and string interning are chosen at encode time; the
/// in-memory representation keeps the widest form.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Absent / undefined. Skipped entirely in object entries.
    Absent,
    /// Explicit null.
    Null,
    /// Integer; encoded in the smallest of 8/16/32 bits by sign and
    /// magnitude.
    Int(i64),
    /// Non-integer number; encoded as Float32 when within ±f32::MAX,
    /// Float64 otherwise.
    Float(f64),
    /// Boolean; true and false are distinct tags with no payload.
    Bool(bool),
    /// String; interned by table index, or inlined length-prefixed when
    /// longer than [`LONG_STRING_THRESHOLD`](super::LONG_STRING_THRESHOLD).
    String(String),
    /// Nested array; the empty array has its own tag and no length.
    Array(Vec<WireValue>),
    /// Plain object as ordered (key, value) pairs. Entries whose value is
    /// `Absent` are skipped at encode time.
    Object(Vec<(String, WireValue)>),
    /// Raw byte buffer.
    Buffer(Bytes),
    /// Typed numeric arrays, one kind per element type.
    Int8Array(Vec<i8>),
    Int16Array(Vec<i16>),
    Int32Array(Vec<i32>),
    Uint8Array(Vec<u8>),
    Uint16Array(Vec<u16>),
    Uint32Array(Vec<u32>),
    Uint8ClampedArray(Vec<u8>),
    Float32Array(Vec<f32>),
    Float64Array(Vec<f64>),
    /// Reference to an executor-side object.
    Remote(ObjectHandle),
    /// Reference to a mirrored tree node.
    Node(NodeHandle),
    /// "This execution context" sentinel.
    ExecutionContext,
    /// The mirrored tree's root sentinel.
    TreeRoot,
}

impl WireValue {
    /// Short kind name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            WireValue::Absent => "absent",
            WireValue::Null => "null",
            WireValue::Int(_) => "int",
            WireValue::Float(_) => "float",
            WireValue::Bool(_) => "bool",
            WireValue::String(_) => "string",
            WireValue::Array(_) => "array",
            WireValue::Object(_) => "object",
            WireValue::Buffer(_) => "buffer",
            WireValue::Int8Array(_) => "int8-array",
            WireValue::Int16Array(_) => "int16-array",
            WireValue::Int32Array(_) => "int32-array",
            WireValue::Uint8Array(_) => "uint8-array",
            WireValue::Uint16Array(_) => "uint16-array",
            WireValue::Uint32Array(_) => "uint32-array",
            WireValue::Uint8ClampedArray(_) => "uint8-clamped-array",
            WireValue::Float32Array(_) => "float32-array",
            WireValue::Float64Array(_) => "float64-array",
            WireValue::Remote(_) => "remote",
            WireValue::Node(_) => "node",
            WireValue::ExecutionContext => "execution-context",
            WireValue::TreeRoot => "tree-root",
        }
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::String(s.to_string())
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::Int(v)
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

/// Stable wire tags. These are protocol constants: changing a code is a
/// breaking wire change.
pub mod tag {
    pub const UNDEFINED: u8 = 0;
    pub const NULL: u8 = 1;
    pub const INT8: u8 = 2;
    pub const INT16: u8 = 3;
    pub const INT32: u8 = 4;
    pub const UINT8: u8 = 5;
    pub const UINT16: u8 = 6;
    pub const UINT32: u8 = 7;
    pub const FLOAT32: u8 = 8;
    pub const FLOAT64: u8 = 9;
    /// String by table index (u16).
    pub const STRING: u8 = 10;
    /// Inlined string: u32 byte length + UTF-8 bytes.
    pub const ENCODED_STRING: u8 = 11;
    pub const TRUE: u8 = 12;
    pub const FALSE: u8 = 13;
    /// Non-empty array: u32 count + values.
    pub const ARRAY: u8 = 14;
    /// Empty array, no payload.
    pub const ARRAY_EMPTY: u8 = 15;
    /// Plain object: u32 pair count + (key, value) pairs.
    pub const OBJECT: u8 = 16;
    /// Raw buffer: u32 byte length + bytes.
    pub const BUFFER: u8 = 17;
    pub const INT8_ARRAY: u8 = 18;
    pub const INT16_ARRAY: u8 = 19;
    pub const INT32_ARRAY: u8 = 20;
    pub const UINT8_ARRAY: u8 = 21;
    pub const UINT16_ARRAY: u8 = 22;
    pub const UINT32_ARRAY: u8 = 23;
    pub const UINT8_CLAMPED_ARRAY: u8 = 24;
    pub const FLOAT32_ARRAY: u8 = 25;
    pub const FLOAT64_ARRAY: u8 = 26;
    /// Remote object reference: u32 handle.
    pub const REMOTE_OBJECT: u8 = 27;
    /// Mirrored node reference: u32 handle.
    pub const MIRROR_NODE: u8 = 28;
    /// "This execution context" sentinel, no payload.
    pub const EXECUTION_CONTEXT: u8 = 29;
    /// Mirrored tree root sentinel, no payload.
    pub const TREE_ROOT: u8 = 30;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_wire_refs() {
        assert_eq!(
            ObjectHandle(7).as_wire_ref(),
            WireValue::Remote(ObjectHandle(7))
        );
        assert_eq!(NodeHandle(3).as_wire_ref(), WireValue::Node(NodeHandle(3)));
    }

    #[test]
    fn test_tags_are_distinct() {
        let all = [
            tag::UNDEFINED,
            tag::NULL,
            tag::INT8,
            tag::INT16,
            tag::INT32,
            tag::UINT8,
            tag::UINT16,
            tag::UINT32,
            tag::FLOAT32,
            tag::FLOAT64,
            tag::STRING,
            tag::ENCODED_STRING,
            tag::TRUE,
            tag::FALSE,
            tag::ARRAY,
            tag::ARRAY_EMPTY,
            tag::OBJECT,
            tag::BUFFER,
            tag::INT8_ARRAY,
            tag::INT16_ARRAY,
            tag::INT32_ARRAY,
            tag::UINT8_ARRAY,
            tag::UINT16_ARRAY,
            tag::UINT32_ARRAY,
            tag::UINT8_CLAMPED_ARRAY,
            tag::FLOAT32_ARRAY,
            tag::FLOAT64_ARRAY,
            tag::REMOTE_OBJECT,
            tag::MIRROR_NODE,
            tag::EXECUTION_CONTEXT,
            tag::TREE_ROOT,
        ];
        let mut seen = std::collections::HashSet::new();
        for t in all {
            assert!(seen.insert(t), "duplicate tag {}", t);
        }
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(WireValue::from("hi"), WireValue::String("hi".to_string()));
        assert_eq!(WireValue::from(42i64), WireValue::Int(42));
        assert_eq!(WireValue::from(true), WireValue::Bool(true));
    }
}
