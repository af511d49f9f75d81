//! Positional big-endian reader over a borrowed byte range.

use crate::error::{CodecError, CodecResult};

/// A positional big-endian reader over a caller-supplied byte range.
///
/// All reads advance the position; reading past the end fails with
/// [`CodecError::BufferUnderflow`] and leaves the position unchanged.
#[derive(Debug)]
pub struct SerializeInput<'a> {
    buf: &'a [u8],
    position: usize,
}

impl<'a> SerializeInput<'a> {
    /// Creates a reader over the full byte range.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, position: 0 }
    }

    /// Returns the current read position.
    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the number of unread bytes.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.position
    }

    /// Borrows the next `n` bytes and advances past them.
    pub fn read_bytes(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::BufferUnderflow {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    /// Advances past `n` bytes without reading them.
    pub fn skip(&mut self, n: usize) -> CodecResult<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Reads a single byte.
    pub fn read_i8(&mut self) -> CodecResult<i8> {
        Ok(self.read_bytes(1)?[0] as i8)
    }

    /// Reads a big-endian i16.
    pub fn read_i16(&mut self) -> CodecResult<i16> {
        let bytes = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a big-endian i32.
    pub fn read_i32(&mut self) -> CodecResult<i32> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a big-endian u32.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a big-endian i64.
    pub fn read_i64(&mut self) -> CodecResult<i64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(raw))
    }

    /// Reads a big-endian f64.
    pub fn read_f64(&mut self) -> CodecResult<f64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(raw))
    }

    /// Reads an i32-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> CodecResult<String> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::Malformed(format!(
                "negative string length {len}"
            )));
        }
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CodecError::Malformed(format!("invalid UTF-8 string: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let mut buf = Vec::new();
        buf.push(0x7f);
        buf.extend_from_slice(&0x0102i16.to_be_bytes());
        buf.extend_from_slice(&0x01020304i32.to_be_bytes());
        buf.extend_from_slice(&0x0102030405060708i64.to_be_bytes());
        buf.extend_from_slice(&2.5f64.to_be_bytes());

        let mut input = SerializeInput::new(&buf);
        assert_eq!(input.read_i8().unwrap(), 0x7f);
        assert_eq!(input.read_i16().unwrap(), 0x0102);
        assert_eq!(input.read_i32().unwrap(), 0x01020304);
        assert_eq!(input.read_i64().unwrap(), 0x0102030405060708);
        assert_eq!(input.read_f64().unwrap(), 2.5);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_underflow_preserves_position() {
        let buf = [1u8, 2];
        let mut input = SerializeInput::new(&buf);
        input.read_i8().unwrap();
        let err = input.read_i32().unwrap_err();
        assert!(matches!(
            err,
            CodecError::BufferUnderflow {
                needed: 4,
                remaining: 1
            }
        ));
        assert_eq!(input.position(), 1);
    }

    #[test]
    fn test_read_string() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&5i32.to_be_bytes());
        buf.extend_from_slice(b"hello");
        let mut input = SerializeInput::new(&buf);
        assert_eq!(input.read_string().unwrap(), "hello");
    }

    #[test]
    fn test_negative_string_length_rejected() {
        let buf = (-1i32).to_be_bytes();
        let mut input = SerializeInput::new(&buf);
        assert!(matches!(
            input.read_string().unwrap_err(),
            CodecError::Malformed(_)
        ));
    }
}
