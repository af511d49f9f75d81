//! Bounded and fallback big-endian writers.

use crate::error::{CodecError, CodecResult};

/// Common surface of the bounded and fallback writers.
///
/// All multi-byte writes are big-endian. `write_i32_at` back-patches a
/// previously reserved slot (length and count headers are written after
/// their contents).
pub trait Output {
    /// Appends raw bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> CodecResult<()>;

    /// Returns the number of bytes written since the last reset.
    fn position(&self) -> usize;

    /// Overwrites 4 bytes at `offset` with a big-endian i32.
    fn write_i32_at(&mut self, offset: usize, value: i32) -> CodecResult<()>;

    /// Writes a single byte.
    fn write_i8(&mut self, value: i8) -> CodecResult<()> {
        self.write_bytes(&[value as u8])
    }

    /// Writes a big-endian i16.
    fn write_i16(&mut self, value: i16) -> CodecResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes a big-endian i32.
    fn write_i32(&mut self, value: i32) -> CodecResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes a big-endian u32.
    fn write_u32(&mut self, value: u32) -> CodecResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes a big-endian i64.
    fn write_i64(&mut self, value: i64) -> CodecResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes a big-endian f64.
    fn write_f64(&mut self, value: f64) -> CodecResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes an i32-length-prefixed UTF-8 string.
    fn write_string(&mut self, value: &str) -> CodecResult<()> {
        self.write_i32(value.len() as i32)?;
        self.write_bytes(value.as_bytes())
    }
}

/// A bounded big-endian writer.
///
/// Writes that would exceed the fixed capacity fail with
/// [`CodecError::BufferOverflow`] without partially writing. Used for the
/// exception, per-fragment-stats, and UDF buffers, whose capacities are a
/// hard contract with the host.
#[derive(Debug)]
pub struct SerializeOutput {
    data: Vec<u8>,
    capacity: usize,
}

impl SerializeOutput {
    /// Creates an empty writer with the given capacity.
    ///
    /// The capacity is a logical limit; backing memory grows on demand.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clears the buffer.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// Clears the buffer and advances the position to `position`,
    /// zero-filling the reserved prefix.
    pub fn reset_with_position(&mut self, position: usize) {
        self.data.clear();
        self.data.resize(position.min(self.capacity), 0);
    }

    /// Returns the written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Output for SerializeOutput {
    fn write_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        let attempted = self.data.len() + bytes.len();
        if attempted > self.capacity {
            return Err(CodecError::BufferOverflow {
                capacity: self.capacity,
                attempted,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn position(&self) -> usize {
        self.data.len()
    }

    fn write_i32_at(&mut self, offset: usize, value: i32) -> CodecResult<()> {
        let end = offset + 4;
        if end > self.data.len() {
            return Err(CodecError::BufferOverflow {
                capacity: self.capacity,
                attempted: end,
            });
        }
        self.data[offset..end].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}

/// The result-buffer writer.
///
/// Behaves like [`SerializeOutput`] up to its primary capacity; a write
/// that would overflow instead switches the buffer into fallback mode and
/// keeps growing on the heap. The oversized allocation is released again on
/// the next [`reset`](FallbackOutput::reset).
#[derive(Debug)]
pub struct FallbackOutput {
    data: Vec<u8>,
    primary_capacity: usize,
    fallback: bool,
}

impl FallbackOutput {
    /// Creates an empty writer with the given primary capacity.
    #[must_use]
    pub fn new(primary_capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            primary_capacity,
            fallback: false,
        }
    }

    /// Returns the primary (pre-fallback) capacity.
    #[must_use]
    pub fn primary_capacity(&self) -> usize {
        self.primary_capacity
    }

    /// Returns true once a write has spilled past the primary capacity.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Clears the buffer and releases any fallback allocation.
    pub fn reset(&mut self) {
        if self.fallback {
            self.data = Vec::new();
            self.fallback = false;
        } else {
            self.data.clear();
        }
    }

    /// Clears the buffer and advances the position to `position`,
    /// zero-filling the reserved prefix.
    pub fn reset_with_position(&mut self, position: usize) {
        self.reset();
        self.data.resize(position, 0);
    }

    /// Returns the written bytes, from whichever buffer is active.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Output for FallbackOutput {
    fn write_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        if !self.fallback && self.data.len() + bytes.len() > self.primary_capacity {
            self.fallback = true;
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn position(&self) -> usize {
        self.data.len()
    }

    fn write_i32_at(&mut self, offset: usize, value: i32) -> CodecResult<()> {
        let end = offset + 4;
        if end > self.data.len() {
            return Err(CodecError::BufferOverflow {
                capacity: self.data.len(),
                attempted: end,
            });
        }
        self.data[offset..end].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}

/// An unbounded writer over a plain `Vec<u8>`.
///
/// Used for payload assembly where no host-facing capacity contract
/// applies; writes never fail.
#[derive(Debug, Default)]
pub struct VecOutput {
    data: Vec<u8>,
}

impl VecOutput {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the writer and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Output for VecOutput {
    fn write_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn position(&self) -> usize {
        self.data.len()
    }

    fn write_i32_at(&mut self, offset: usize, value: i32) -> CodecResult<()> {
        let end = offset + 4;
        if end > self.data.len() {
            return Err(CodecError::BufferOverflow {
                capacity: self.data.len(),
                attempted: end,
            });
        }
        self.data[offset..end].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}
