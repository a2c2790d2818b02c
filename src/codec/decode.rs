//! Wire decoding.
//!
//! Recursive tagged-union decode over a cursor. Arrays and objects recurse
//! to the input's actual nesting depth, bounded only by the configured
//! recursion guard, which converts pathological nesting into a reported
//! `Decode` error instead of a stack overflow. Unknown tags are fatal for
//! the whole buffer.

use bytes::Bytes;

use super::strings::StringCache;
use super::value::{tag, NodeHandle, ObjectHandle, WireValue};
use crate::error::{Result, TreewireError};

/// Decoder configuration.
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Maximum array/object nesting depth before decoding aborts.
    pub max_depth: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self { max_depth: 128 }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(TreewireError::Decode(format!(
                "truncated buffer: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Decode a value list previously produced by [`encode`](super::encode).
///
/// Interned string indices are resolved through `cache`, which must have
/// absorbed the sender's table snapshots up to this buffer's flush.
pub fn decode(buf: &[u8], cache: &StringCache, config: &DecodeConfig) -> Result<Vec<WireValue>> {
    let mut cursor = Cursor::new(buf);
    let count = cursor.u32()? as usize;

    let mut values = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        values.push(read_value(&mut cursor, cache, config, 0)?);
    }

    if cursor.remaining() != 0 {
        return Err(TreewireError::Decode(format!(
            "{} trailing bytes after value list",
            cursor.remaining()
        )));
    }
    Ok(values)
}

fn read_string(cursor: &mut Cursor<'_>, cache: &StringCache) -> Result<String> {
    match cursor.u8()? {
        tag::STRING => {
            let index = cursor.u16()?;
            Ok(cache.get(index)?.to_string())
        }
        tag::ENCODED_STRING => {
            let len = cursor.u32()? as usize;
            let raw = cursor.take(len)?;
            String::from_utf8(raw.to_vec())
                .map_err(|e| TreewireError::Decode(format!("invalid UTF-8 in string: {}", e)))
        }
        other => Err(TreewireError::Decode(format!(
            "expected string tag, found {}",
            other
        ))),
    }
}

fn read_value(
    cursor: &mut Cursor<'_>,
    cache: &StringCache,
    config: &DecodeConfig,
    depth: usize,
) -> Result<WireValue> {
    if depth > config.max_depth {
        return Err(TreewireError::Decode(format!(
            "nesting exceeds maximum depth {}",
            config.max_depth
        )));
    }

    let t = cursor.u8()?;
    let value = match t {
        tag::UNDEFINED => WireValue::Absent,
        tag::NULL => WireValue::Null,
        tag::INT8 => WireValue::Int(cursor.u8()? as i8 as i64),
        tag::INT16 => WireValue::Int(cursor.u16()? as i16 as i64),
        tag::INT32 => WireValue::Int(cursor.u32()? as i32 as i64),
        tag::UINT8 => WireValue::Int(cursor.u8()? as i64),
        tag::UINT16 => WireValue::Int(cursor.u16()? as i64),
        tag::UINT32 => WireValue::Int(cursor.u32()? as i64),
        tag::FLOAT32 => {
            let b = cursor.take(4)?;
            WireValue::Float(f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64)
        }
        tag::FLOAT64 => {
            let b = cursor.take(8)?;
            WireValue::Float(f64::from_be_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))
        }
        tag::STRING => {
            let index = cursor.u16()?;
            WireValue::String(cache.get(index)?.to_string())
        }
        tag::ENCODED_STRING => {
            let len = cursor.u32()? as usize;
            let raw = cursor.take(len)?;
            WireValue::String(String::from_utf8(raw.to_vec()).map_err(|e| {
                TreewireError::Decode(format!("invalid UTF-8 in string: {}", e))
            })?)
        }
        tag::TRUE => WireValue::Bool(true),
        tag::FALSE => WireValue::Bool(false),
        tag::ARRAY => {
            let count = cursor.u32()? as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(read_value(cursor, cache, config, depth + 1)?);
            }
            WireValue::Array(items)
        }
        tag::ARRAY_EMPTY => WireValue::Array(Vec::new()),
        tag::OBJECT => {
            let count = cursor.u32()? as usize;
            let mut entries = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let key = read_string(cursor, cache)?;
                let val = read_value(cursor, cache, config, depth + 1)?;
                entries.push((key, val));
            }
            WireValue::Object(entries)
        }
        tag::BUFFER => {
            let len = cursor.u32()? as usize;
            WireValue::Buffer(Bytes::copy_from_slice(cursor.take(len)?))
        }
        tag::INT8_ARRAY => {
            let count = cursor.u32()? as usize;
            let raw = cursor.take(count)?;
            WireValue::Int8Array(raw.iter().map(|&b| b as i8).collect())
        }
        tag::INT16_ARRAY => {
            let count = cursor.u32()? as usize;
            let raw = cursor.take(count * 2)?;
            WireValue::Int16Array(
                raw.chunks_exact(2)
                    .map(|c| i16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            )
        }
        tag::INT32_ARRAY => {
            let count = cursor.u32()? as usize;
            let raw = cursor.take(count * 4)?;
            WireValue::Int32Array(
                raw.chunks_exact(4)
                    .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            )
        }
        tag::UINT8_ARRAY => {
            let count = cursor.u32()? as usize;
            WireValue::Uint8Array(cursor.take(count)?.to_vec())
        }
        tag::UINT16_ARRAY => {
            let count = cursor.u32()? as usize;
            let raw = cursor.take(count * 2)?;
            WireValue::Uint16Array(
                raw.chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            )
        }
        tag::UINT32_ARRAY => {
            let count = cursor.u32()? as usize;
            let raw = cursor.take(count * 4)?;
            WireValue::Uint32Array(
                raw.chunks_exact(4)
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            )
        }
        tag::UINT8_CLAMPED_ARRAY => {
            let count = cursor.u32()? as usize;
            WireValue::Uint8ClampedArray(cursor.take(count)?.to_vec())
        }
        tag::FLOAT32_ARRAY => {
            let count = cursor.u32()? as usize;
            let raw = cursor.take(count * 4)?;
            WireValue::Float32Array(
                raw.chunks_exact(4)
                    .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            )
        }
        tag::FLOAT64_ARRAY => {
            let count = cursor.u32()? as usize;
            let raw = cursor.take(count * 8)?;
            WireValue::Float64Array(
                raw.chunks_exact(8)
                    .map(|c| {
                        f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                    })
                    .collect(),
            )
        }
        tag::REMOTE_OBJECT => WireValue::Remote(ObjectHandle(cursor.u32()?)),
        tag::MIRROR_NODE => WireValue::Node(NodeHandle(cursor.u32()?)),
        tag::EXECUTION_CONTEXT => WireValue::ExecutionContext,
        tag::TREE_ROOT => WireValue::TreeRoot,
        unknown => {
            return Err(TreewireError::Decode(format!(
                "unknown value tag {}",
                unknown
            )))
        }
    };
    Ok(value)
}
