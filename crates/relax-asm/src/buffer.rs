//! Growable byte store for assembled machine code.
//!
//! One [`CodeBuffer`] is owned exclusively by one assembler instance.
//! Instructions are appended during emission; the relaxation engine later
//! patches and shifts already-written ranges in place. All multi-byte
//! accesses are little-endian.
//!
//! Out-of-bounds access is an internal bug in the assembler, never a
//! recoverable condition, and panics unconditionally.

use alloc::vec::Vec;

/// Append-only, positionally patchable byte store with an overlap-safe
/// bulk move.
#[derive(Debug, Clone, Default)]
pub struct CodeBuffer {
    data: Vec<u8>,
}

impl CodeBuffer {
    /// Create a new, empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a buffer with preallocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Current size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reserve room for at least `additional` more bytes.
    pub fn ensure_capacity(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    /// Grow (or shrink) the buffer to `new_size`, zero-filling new bytes.
    pub fn resize(&mut self, new_size: u32) {
        self.data.resize(new_size as usize, 0);
    }

    /// Append a single byte.
    pub fn push_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Append a little-endian 32-bit word.
    pub fn push_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append raw bytes.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append `count` zero bytes (placeholder space for a not-yet-resolved
    /// instruction sequence).
    pub fn push_zeros(&mut self, count: u32) {
        self.data.resize(self.data.len() + count as usize, 0);
    }

    /// Read one byte at `offset`.
    #[must_use]
    pub fn load_u8(&self, offset: u32) -> u8 {
        self.data[offset as usize]
    }

    /// Read a little-endian u16 at `offset`.
    #[must_use]
    pub fn load_u16(&self, offset: u32) -> u16 {
        let offset = offset as usize;
        assert!(
            offset + 2 <= self.data.len(),
            "CodeBuffer load_u16: offset {} out of bounds (size {})",
            offset,
            self.data.len()
        );
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Read a little-endian u32 at `offset`.
    #[must_use]
    pub fn load_u32(&self, offset: u32) -> u32 {
        let offset = offset as usize;
        assert!(
            offset + 4 <= self.data.len(),
            "CodeBuffer load_u32: offset {} out of bounds (size {})",
            offset,
            self.data.len()
        );
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write one byte at an already-written `offset`.
    pub fn store_u8(&mut self, offset: u32, value: u8) {
        self.data[offset as usize] = value;
    }

    /// Write a little-endian u16 at an already-written `offset`.
    pub fn store_u16(&mut self, offset: u32, value: u16) {
        let offset = offset as usize;
        assert!(
            offset + 2 <= self.data.len(),
            "CodeBuffer store_u16: offset {} out of bounds (size {})",
            offset,
            self.data.len()
        );
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian u32 at an already-written `offset`.
    pub fn store_u32(&mut self, offset: u32, value: u32) {
        let offset = offset as usize;
        assert!(
            offset + 4 <= self.data.len(),
            "CodeBuffer store_u32: offset {} out of bounds (size {})",
            offset,
            self.data.len()
        );
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Move `len` bytes from `src` to `dest` with memmove semantics: the
    /// ranges may overlap and the source is fully read before any byte of
    /// it is overwritten.
    pub fn move_bytes(&mut self, dest: u32, src: u32, len: u32) {
        if len == 0 || dest == src {
            return;
        }
        let (dest, src, len) = (dest as usize, src as usize, len as usize);
        assert!(
            src + len <= self.data.len() && dest + len <= self.data.len(),
            "CodeBuffer move_bytes: dest={} src={} len={} out of bounds (size {})",
            dest,
            src,
            len,
            self.data.len()
        );
        self.data.copy_within(src..src + len, dest);
    }

    /// View the buffer contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer, returning the bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl AsRef<[u8]> for CodeBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
