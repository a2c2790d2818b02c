//! Wire encoding with an exact size-estimation pass.
//!
//! `estimate_size` mirrors the encoding dispatch rule-for-rule (same type
//! tests, same width selection), so `encode` allocates exactly one buffer of
//! the right size and never grows it. All multi-byte scalars are Big Endian.

use bytes::{BufMut, Bytes, BytesMut};

use super::strings::StringTable;
use super::value::{tag, WireValue};
use crate::error::Result;

/// Strings longer than this (in UTF-16 code units) bypass interning and are
/// inlined length-prefixed, bounding string table growth.
pub const LONG_STRING_THRESHOLD: usize = 128;

/// Width class for an integer value, chosen by sign and magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntWidth {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    /// Outside 32-bit range; carried as a 64-bit float.
    Float64,
}

fn int_width(v: i64) -> IntWidth {
    if v >= 0 {
        if v <= u8::MAX as i64 {
            IntWidth::Uint8
        } else if v <= u16::MAX as i64 {
            IntWidth::Uint16
        } else if v <= u32::MAX as i64 {
            IntWidth::Uint32
        } else {
            IntWidth::Float64
        }
    } else if v >= i8::MIN as i64 {
        IntWidth::Int8
    } else if v >= i16::MIN as i64 {
        IntWidth::Int16
    } else if v >= i32::MIN as i64 {
        IntWidth::Int32
    } else {
        IntWidth::Float64
    }
}

fn float_fits_f32(v: f64) -> bool {
    v.is_finite() && v.abs() <= f32::MAX as f64
}

fn is_long_string(s: &str) -> bool {
    s.encode_utf16().count() > LONG_STRING_THRESHOLD
}

/// Exact encoded size in bytes of a value list, including the leading count.
pub fn estimate_size(values: &[WireValue]) -> usize {
    4 + values.iter().map(value_size).sum::<usize>()
}

fn value_size(value: &WireValue) -> usize {
    match value {
        WireValue::Absent
        | WireValue::Null
        | WireValue::Bool(_)
        | WireValue::ExecutionContext
        | WireValue::TreeRoot => 1,
        WireValue::Int(v) => match int_width(*v) {
            IntWidth::Uint8 | IntWidth::Int8 => 2,
            IntWidth::Uint16 | IntWidth::Int16 => 3,
            IntWidth::Uint32 | IntWidth::Int32 => 5,
            IntWidth::Float64 => 9,
        },
        WireValue::Float(v) => {
            if float_fits_f32(*v) {
                5
            } else {
                9
            }
        }
        WireValue::String(s) => {
            if is_long_string(s) {
                1 + 4 + s.len()
            } else {
                1 + 2
            }
        }
        WireValue::Array(items) => {
            if items.is_empty() {
                1
            } else {
                1 + 4 + items.iter().map(value_size).sum::<usize>()
            }
        }
        WireValue::Object(entries) => {
            1 + 4
                + entries
                    .iter()
                    .filter(|(_, v)| !matches!(v, WireValue::Absent))
                    .map(|(k, v)| {
                        let key_size = if is_long_string(k) { 1 + 4 + k.len() } else { 3 };
                        key_size + value_size(v)
                    })
                    .sum::<usize>()
        }
        WireValue::Buffer(b) => 1 + 4 + b.len(),
        WireValue::Int8Array(v) => 1 + 4 + v.len(),
        WireValue::Int16Array(v) => 1 + 4 + v.len() * 2,
        WireValue::Int32Array(v) => 1 + 4 + v.len() * 4,
        WireValue::Uint8Array(v) => 1 + 4 + v.len(),
        WireValue::Uint16Array(v) => 1 + 4 + v.len() * 2,
        WireValue::Uint32Array(v) => 1 + 4 + v.len() * 4,
        WireValue::Uint8ClampedArray(v) => 1 + 4 + v.len(),
        WireValue::Float32Array(v) => 1 + 4 + v.len() * 4,
        WireValue::Float64Array(v) => 1 + 4 + v.len() * 8,
        WireValue::Remote(_) | WireValue::Node(_) => 1 + 4,
    }
}

/// Encode a value list into a single exactly-sized buffer.
///
/// Short strings are interned through `table`; the resulting indices are
/// only meaningful to a receiver that has absorbed the table's snapshots.
pub fn encode(values: &[WireValue], table: &mut StringTable) -> Result<Bytes> {
    let size = estimate_size(values);
    let mut buf = BytesMut::with_capacity(size);

    buf.put_u32(values.len() as u32);
    for value in values {
        write_value(&mut buf, value, table)?;
    }

    debug_assert_eq!(buf.len(), size, "size estimate must match encoded bytes");
    Ok(buf.freeze())
}

fn write_string(buf: &mut BytesMut, s: &str, table: &mut StringTable) -> Result<()> {
    if is_long_string(s) {
        buf.put_u8(tag::ENCODED_STRING);
        buf.put_u32(s.len() as u32);
        buf.put_slice(s.as_bytes());
    } else {
        let index = table.intern(s)?;
        buf.put_u8(tag::STRING);
        buf.put_u16(index);
    }
    Ok(())
}

fn write_value(buf: &mut BytesMut, value: &WireValue, table: &mut StringTable) -> Result<()> {
    match value {
        WireValue::Absent => buf.put_u8(tag::UNDEFINED),
        WireValue::Null => buf.put_u8(tag::NULL),
        WireValue::Int(v) => match int_width(*v) {
            IntWidth::Uint8 => {
                buf.put_u8(tag::UINT8);
                buf.put_u8(*v as u8);
            }
            IntWidth::Uint16 => {
                buf.put_u8(tag::UINT16);
                buf.put_u16(*v as u16);
            }
            IntWidth::Uint32 => {
                buf.put_u8(tag::UINT32);
                buf.put_u32(*v as u32);
            }
            IntWidth::Int8 => {
                buf.put_u8(tag::INT8);
                buf.put_i8(*v as i8);
            }
            IntWidth::Int16 => {
                buf.put_u8(tag::INT16);
                buf.put_i16(*v as i16);
            }
            IntWidth::Int32 => {
                buf.put_u8(tag::INT32);
                buf.put_i32(*v as i32);
            }
            IntWidth::Float64 => {
                buf.put_u8(tag::FLOAT64);
                buf.put_f64(*v as f64);
            }
        },
        WireValue::Float(v) => {
            if float_fits_f32(*v) {
                buf.put_u8(tag::FLOAT32);
                buf.put_f32(*v as f32);
            } else {
                buf.put_u8(tag::FLOAT64);
                buf.put_f64(*v);
            }
        }
        WireValue::Bool(b) => buf.put_u8(if *b { tag::TRUE } else { tag::FALSE }),
        WireValue::String(s) => write_string(buf, s, table)?,
        WireValue::Array(items) => {
            if items.is_empty() {
                buf.put_u8(tag::ARRAY_EMPTY);
            } else {
                buf.put_u8(tag::ARRAY);
                buf.put_u32(items.len() as u32);
                for item in items {
                    write_value(buf, item, table)?;
                }
            }
        }
        WireValue::Object(entries) => {
            buf.put_u8(tag::OBJECT);
            let present: Vec<_> = entries
                .iter()
                .filter(|(_, v)| !matches!(v, WireValue::Absent))
                .collect();
            buf.put_u32(present.len() as u32);
            for (key, val) in present {
                write_string(buf, key, table)?;
                write_value(buf, val, table)?;
            }
        }
        WireValue::Buffer(b) => {
            buf.put_u8(tag::BUFFER);
            buf.put_u32(b.len() as u32);
            buf.put_slice(b);
        }
        WireValue::Int8Array(v) => {
            buf.put_u8(tag::INT8_ARRAY);
            buf.put_u32(v.len() as u32);
            for x in v {
                buf.put_i8(*x);
            }
        }
        WireValue::Int16Array(v) => {
            buf.put_u8(tag::INT16_ARRAY);
            buf.put_u32(v.len() as u32);
            for x in v {
                buf.put_i16(*x);
            }
        }
        WireValue::Int32Array(v) => {
            buf.put_u8(tag::INT32_ARRAY);
            buf.put_u32(v.len() as u32);
            for x in v {
                buf.put_i32(*x);
            }
        }
        WireValue::Uint8Array(v) => {
            buf.put_u8(tag::UINT8_ARRAY);
            buf.put_u32(v.len() as u32);
            buf.put_slice(v);
        }
        WireValue::Uint16Array(v) => {
            buf.put_u8(tag::UINT16_ARRAY);
            buf.put_u32(v.len() as u32);
            for x in v {
                buf.put_u16(*x);
            }
        }
        WireValue::Uint32Array(v) => {
            buf.put_u8(tag::UINT32_ARRAY);
            buf.put_u32(v.len() as u32);
            for x in v {
                buf.put_u32(*x);
            }
        }
        WireValue::Uint8ClampedArray(v) => {
            buf.put_u8(tag::UINT8_CLAMPED_ARRAY);
            buf.put_u32(v.len() as u32);
            buf.put_slice(v);
        }
        WireValue::Float32Array(v) => {
            buf.put_u8(tag::FLOAT32_ARRAY);
            buf.put_u32(v.len() as u32);
            for x in v {
                buf.put_f32(*x);
            }
        }
        WireValue::Float64Array(v) => {
            buf.put_u8(tag::FLOAT64_ARRAY);
            buf.put_u32(v.len() as u32);
            for x in v {
                buf.put_f64(*x);
            }
        }
        WireValue::Remote(h) => {
            buf.put_u8(tag::REMOTE_OBJECT);
            buf.put_u32(h.0);
        }
        WireValue::Node(h) => {
            buf.put_u8(tag::MIRROR_NODE);
            buf.put_u32(h.0);
        }
        WireValue::ExecutionContext => buf.put_u8(tag::EXECUTION_CONTEXT),
        WireValue::TreeRoot => buf.put_u8(tag::TREE_ROOT),
    }
    Ok(())
}
