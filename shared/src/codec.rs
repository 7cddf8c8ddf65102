//! Binary wire codec used for packet headers and payloads
//!
//! All fixed-width integers are little-endian. Variable-length data (byte
//! slices, strings, serde values) is prefixed with its length encoded as an
//! unsigned LEB128 `varu32`. There are no delimiters and no schema
//! negotiation: both ends must agree on the field order for a given
//! protocol version.
//!
//! Decoding never panics on malformed input. Reading past the end of the
//! buffer yields [`CodecError::UnexpectedEof`], which the server treats as a
//! malformed packet.

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Largest number of bytes a `varu32` can occupy on the wire.
const MAX_VARU32_LEN: usize = 5;

/// Errors raised while encoding or decoding wire data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("varu32 does not terminate within 5 bytes")]
    VarIntOverflow,

    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("length {0} does not fit in a varu32 prefix")]
    LengthOverflow(usize),

    #[error("serde value: {0}")]
    Serde(String),
}

/// Appends wire-encoded values to a growable buffer
pub struct Writer<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// Number of bytes in the underlying buffer
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Writes an unsigned LEB128 integer (1 to 5 bytes)
    pub fn varu32(&mut self, mut value: u32) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    /// Writes a `varu32` length prefix followed by the raw bytes
    pub fn byte_slice(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::LengthOverflow(bytes.len()))?;
        self.varu32(len);
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn string(&mut self, value: &str) -> Result<(), CodecError> {
        self.byte_slice(value.as_bytes())
    }

    /// Writes any serde value as a length-prefixed bincode blob
    pub fn serde_value<T: Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        let encoded = bincode::serialize(value).map_err(|e| CodecError::Serde(e.to_string()))?;
        self.byte_slice(&encoded)
    }
}

/// Reads wire-encoded values from a borrowed byte slice
pub struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Offset of the next byte to be read
    pub fn position(&self) -> usize {
        self.total - self.buf.len()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(CodecError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn f32(&mut self) -> Result<f32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn f64(&mut self) -> Result<f64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64_le())
    }

    pub fn varu32(&mut self) -> Result<u32, CodecError> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARU32_LEN {
            let byte = self.u8()?;
            // The fifth byte only has room for the top 4 bits.
            if i == MAX_VARU32_LEN - 1 && byte > 0x0f {
                return Err(CodecError::VarIntOverflow);
            }
            value |= ((byte & 0x7f) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarIntOverflow)
    }

    /// Borrows a length-prefixed byte slice without copying
    pub fn bytes_ref(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.varu32()? as usize;
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn byte_slice(&mut self) -> Result<Vec<u8>, CodecError> {
        self.bytes_ref().map(<[u8]>::to_vec)
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        let bytes = self.bytes_ref()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn serde_value<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        let bytes = self.bytes_ref()?;
        bincode::deserialize(bytes).map_err(|e| CodecError::Serde(e.to_string()))
    }
}
