//! Lua value encoder and decoder
//!
//! Wire layout of a value:
//! ```text
//! 0x00 - Number (f32, little endian)
//! 0x01 - String (bytes up to a NUL terminator)
//! 0x02 - Nil (one padding byte)
//! 0x03 - Bool (one byte, nonzero = true)
//! 0x04 - Table (key, value pairs until 0x05)
//! 0x05 - Table end
//! ```
//!
//! Tables are decoded with an explicit stack so hostile nesting cannot blow
//! the native stack; depth is still capped at [`MAX_NESTING_DEPTH`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::LuaValue;
use crate::error::CodecError;

// Lua value type tags
const TAG_NUMBER: u8 = 0x00;
const TAG_STRING: u8 = 0x01;
const TAG_NIL: u8 = 0x02;
const TAG_BOOL: u8 = 0x03;
const TAG_TABLE: u8 = 0x04;

/// Sentinel closing a table
pub const TABLE_END: u8 = 0x05;

/// Maximum table nesting depth
pub const MAX_NESTING_DEPTH: usize = 64;

/// Read bytes up to (and consuming) a NUL terminator
///
/// Invalid UTF-8 is replaced rather than rejected; the raw bytes are kept
/// verbatim elsewhere for relay.
pub fn read_nul_string<B: Buf>(buf: &mut B) -> Result<String, CodecError> {
    let mut bytes = Vec::new();
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::TruncatedStream);
        }
        match buf.get_u8() {
            0 => break,
            b => bytes.push(b),
        }
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// A table under construction
struct PendingTable {
    entries: Vec<(LuaValue, LuaValue)>,
    key: Option<LuaValue>,
}

/// Decode one Lua value
pub fn read_lua_value<B: Buf>(buf: &mut B) -> Result<LuaValue, CodecError> {
    let mut stack: Vec<PendingTable> = Vec::new();

    loop {
        // A table waiting for its next key may be closed instead
        let awaiting_key = stack.last().is_some_and(|t| t.key.is_none());
        let value = if awaiting_key && peek_u8(buf)? == TABLE_END {
            buf.advance(1);
            let table = stack.pop().ok_or(CodecError::TruncatedStream)?;
            LuaValue::Table(table.entries)
        } else {
            let tag = read_u8(buf)?;
            match tag {
                TAG_NUMBER => {
                    if buf.remaining() < 4 {
                        return Err(CodecError::TruncatedStream);
                    }
                    LuaValue::Number(buf.get_f32_le())
                }
                TAG_STRING => LuaValue::String(read_nul_string(buf)?),
                TAG_NIL => {
                    read_u8(buf)?;
                    LuaValue::Nil
                }
                TAG_BOOL => LuaValue::Bool(read_u8(buf)? != 0),
                TAG_TABLE => {
                    if stack.len() >= MAX_NESTING_DEPTH {
                        return Err(CodecError::NestingTooDeep);
                    }
                    stack.push(PendingTable {
                        entries: Vec::new(),
                        key: None,
                    });
                    continue;
                }
                other => return Err(CodecError::UnknownLuaType(other)),
            }
        };

        match stack.last_mut() {
            None => return Ok(value),
            Some(parent) => match parent.key.take() {
                None => parent.key = Some(value),
                Some(key) => parent.entries.push((key, value)),
            },
        }
    }
}

fn peek_u8<B: Buf>(buf: &B) -> Result<u8, CodecError> {
    buf.chunk()
        .first()
        .copied()
        .ok_or(CodecError::TruncatedStream)
}

fn read_u8<B: Buf>(buf: &mut B) -> Result<u8, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::TruncatedStream);
    }
    Ok(buf.get_u8())
}

/// Lua value encoder
///
/// Produces the exact layout [`read_lua_value`] consumes. Nil is written with
/// a zero padding byte.
pub struct LuaEncoder {
    buf: BytesMut,
}

impl LuaEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Get current encoded length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if encoder is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a NUL-terminated string
    pub fn encode_nul_string(&mut self, s: &str) {
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
    }

    /// Encode a single value
    pub fn encode(&mut self, value: &LuaValue) {
        match value {
            LuaValue::Number(n) => {
                self.buf.put_u8(TAG_NUMBER);
                self.buf.put_f32_le(*n);
            }
            LuaValue::String(s) => {
                self.buf.put_u8(TAG_STRING);
                self.encode_nul_string(s);
            }
            LuaValue::Nil => {
                self.buf.put_u8(TAG_NIL);
                self.buf.put_u8(0);
            }
            LuaValue::Bool(b) => {
                self.buf.put_u8(TAG_BOOL);
                self.buf.put_u8(u8::from(*b));
            }
            LuaValue::Table(entries) => {
                self.buf.put_u8(TAG_TABLE);
                for (k, v) in entries {
                    self.encode(k);
                    self.encode(v);
                }
                self.buf.put_u8(TABLE_END);
            }
        }
    }
}

impl Default for LuaEncoder {
    fn default() -> Self {
        Self::new()
    }
}
