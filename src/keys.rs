//! Unsigned-byte sort keys.
//!
//! Every index compares keys as unsigned byte strings. Values that have a
//! natural order (signed integers, strings) are encoded so that the byte
//! order matches it: integers are written big-endian with the sign bit
//! flipped, so `-1 < 0 < 1` still holds after encoding.

use std::fmt;

use crate::error::{Error, Result};
use crate::types::Key;

/// Incrementally assembles a sort key from typed components.
#[derive(Debug, Default, Clone)]
pub struct KeyBuilder {
    buf: Vec<u8>,
}

impl KeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        KeyBuilder {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn append_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&((v as u32) ^ 0x8000_0000).to_be_bytes());
        self
    }

    pub fn append_i64(&mut self, v: i64) -> &mut Self {
        self.buf
            .extend_from_slice(&((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes());
        self
    }

    pub fn append_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn append_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Appends UTF-8 bytes. Only safe as the last component of a key since
    /// no terminator is written.
    pub fn append_str(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn append_bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn reset(&mut self) -> &mut Self {
        self.buf.clear();
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns a copy of the key built so far. The builder may be reused.
    pub fn key(&self) -> Key {
        self.buf.clone()
    }

    pub fn build(self) -> Key {
        self.buf
    }
}

/// Sort key for a single `i32`.
pub fn i32_key(v: i32) -> Key {
    KeyBuilder::with_capacity(4).append_i32(v).key()
}

/// Sort key for a single `i64`.
pub fn i64_key(v: i64) -> Key {
    KeyBuilder::with_capacity(8).append_i64(v).key()
}

pub fn decode_i32(key: &[u8]) -> Result<i32> {
    let raw: [u8; 4] = key
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::invalid(format!("key too short for i32: {} bytes", key.len())))?;
    Ok((u32::from_be_bytes(raw) ^ 0x8000_0000) as i32)
}

pub fn decode_i64(key: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = key
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::invalid(format!("key too short for i64: {} bytes", key.len())))?;
    Ok((u64::from_be_bytes(raw) ^ 0x8000_0000_0000_0000) as i64)
}

/// Describes how the relation layer encoded keys or values, so that
/// diagnostics can render them. The engine itself treats both as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyFormat {
    #[default]
    Bytes = 0,
    Int32 = 1,
    Int64 = 2,
    Utf8 = 3,
}

impl KeyFormat {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(KeyFormat::Bytes),
            1 => Ok(KeyFormat::Int32),
            2 => Ok(KeyFormat::Int64),
            3 => Ok(KeyFormat::Utf8),
            _ => Err(Error::corruption(format!("invalid key format: {b}"))),
        }
    }

    /// Renders `data` for display. Falls back to hex when the bytes do not
    /// decode under this format.
    pub fn render(self, data: &[u8]) -> String {
        let decoded = match self {
            KeyFormat::Bytes => None,
            KeyFormat::Int32 if data.len() == 4 => decode_i32(data).ok().map(|v| v.to_string()),
            KeyFormat::Int64 if data.len() == 8 => decode_i64(data).ok().map(|v| v.to_string()),
            KeyFormat::Utf8 => std::str::from_utf8(data).ok().map(|s| format!("{s:?}")),
            _ => None,
        };
        decoded.unwrap_or_else(|| hex(data))
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyFormat::Bytes => "bytes",
            KeyFormat::Int32 => "int32",
            KeyFormat::Int64 => "int64",
            KeyFormat::Utf8 => "utf8",
        };
        f.write_str(name)
    }
}

fn hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
