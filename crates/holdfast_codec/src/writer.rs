//! Binary writer for entity blobs.

/// A binary writer producing the Holdfast wire format.
///
/// The format is deliberately simple and deterministic:
/// - fixed-width big-endian integers
/// - `u32` length prefixes for strings, byte strings, and sequences
///
/// Deterministic output matters because identity keys are hashes of
/// encoded bytes; the same logical value must always produce the same
/// encoding.
#[derive(Debug, Default)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with preallocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Writes a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a big-endian `u16`.
    pub fn put_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian `i64`.
    pub fn put_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a length prefix.
    ///
    /// Lengths are `u32`; blobs approaching 4 GiB are far beyond any
    /// supported record size.
    #[allow(clippy::cast_possible_truncation)]
    pub fn put_len(&mut self, len: usize) {
        debug_assert!(len <= u32::MAX as usize);
        self.put_u32(len as u32);
    }

    /// Writes a length-prefixed byte string.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_len(bytes.len());
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, text: &str) {
        self.put_bytes(text.as_bytes());
    }

    /// Appends raw bytes without a length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Returns the number of bytes written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes the writer and returns the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut w = Writer::new();
        w.put_u16(0x0102);
        w.put_u32(0x0304_0506);
        w.put_i64(-1);
        assert_eq!(
            w.into_bytes(),
            vec![1, 2, 3, 4, 5, 6, 255, 255, 255, 255, 255, 255, 255, 255]
        );
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut w = Writer::new();
        w.put_str("hi");
        assert_eq!(w.into_bytes(), vec![0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn empty_bytes() {
        let mut w = Writer::new();
        w.put_bytes(&[]);
        assert_eq!(w.into_bytes(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn raw_has_no_prefix() {
        let mut w = Writer::new();
        w.put_raw(&[9, 9]);
        assert_eq!(w.len(), 2);
    }
}
