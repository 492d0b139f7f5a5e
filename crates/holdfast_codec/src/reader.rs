//! Binary reader for entity blobs.

use crate::error::{CodecError, CodecResult};

/// Maximum allowed length for a single string, byte string, or sequence.
///
/// This bounds allocations when decoding untrusted bytes; 256 MB is far
/// beyond any legitimate record.
pub const MAX_LENGTH: u64 = 256 * 1024 * 1024;

/// A binary reader over the Holdfast wire format.
///
/// Mirrors [`crate::Writer`]: fixed-width big-endian integers and `u32`
/// length prefixes. All reads validate bounds before consuming.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader over the given bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset into the input.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns true if all bytes have been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Number of unconsumed bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails unless every input byte has been consumed.
    pub fn expect_end(&self) -> CodecResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                remaining: self.remaining(),
            })
        }
    }

    /// Reads a single byte.
    pub fn take_u8(&mut self) -> CodecResult<u8> {
        let slice = self.take_raw(1)?;
        Ok(slice[0])
    }

    /// Reads a big-endian `u16`.
    pub fn take_u16(&mut self) -> CodecResult<u16> {
        let slice = self.take_raw(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    /// Reads a big-endian `u32`.
    pub fn take_u32(&mut self) -> CodecResult<u32> {
        let slice = self.take_raw(4)?;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    /// Reads a big-endian `i64`.
    pub fn take_i64(&mut self) -> CodecResult<i64> {
        let slice = self.take_raw(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(slice);
        Ok(i64::from_be_bytes(buf))
    }

    /// Reads a length prefix, validating it against [`MAX_LENGTH`].
    pub fn take_len(&mut self) -> CodecResult<usize> {
        let len = u64::from(self.take_u32()?);
        if len > MAX_LENGTH {
            return Err(CodecError::LengthOverflow {
                claimed: len,
                max_allowed: MAX_LENGTH,
            });
        }
        Ok(len as usize)
    }

    /// Reads a length-prefixed byte string.
    pub fn take_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.take_len()?;
        self.take_raw(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn take_str(&mut self) -> CodecResult<&'a str> {
        let bytes = self.take_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads `len` raw bytes.
    pub fn take_raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof {
            offset: self.pos,
        })?;
        if end > self.data.len() {
            return Err(CodecError::UnexpectedEof { offset: self.pos });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}
