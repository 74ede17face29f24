//! Growable byte buffer with read and write cursors, and a borrowed view.
//!
//! ```text
//! +-----------+-------------------+------------------+
//! | consumed  |     readable      |     writable     |
//! +-----------+-------------------+------------------+
//! 0       read_pos            write_pos          capacity
//! ```

use bytes::Buf;

/// Capacity used when a buffer is created with size zero.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Owning, resizable byte region with read and write cursors.
///
/// Invariant: `read_pos <= write_pos <= capacity`.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    close: bool,
    bytes: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Buffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer with `capacity` bytes of writable space.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            data: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
            close: false,
            bytes: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of readable bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Number of bytes that can be written without growing.
    #[inline]
    #[must_use]
    pub fn writable_len(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Bytes already read but not yet reclaimed.
    #[inline]
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.read_pos
    }

    #[inline]
    #[must_use]
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    #[inline]
    pub fn readable_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.read_pos..self.write_pos]
    }

    #[inline]
    pub fn writable_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.write_pos..]
    }

    /// Mark `n` readable bytes as consumed. Clamped to the readable length.
    pub fn advance_read(&mut self, n: usize) {
        self.read_pos += n.min(self.len());
    }

    /// Mark `n` writable bytes as filled. Clamped to the writable length.
    pub fn advance_write(&mut self, n: usize) {
        self.write_pos += n.min(self.writable_len());
    }

    /// Append `src`, growing as needed.
    pub fn append(&mut self, src: &[u8]) {
        self.ensure_writable(src.len());
        self.data[self.write_pos..self.write_pos + src.len()].copy_from_slice(src);
        self.write_pos += src.len();
    }

    /// Make room for at least `n` writable bytes.
    ///
    /// Does nothing if there is already room, compacts the readable region
    /// to the front if the consumed prefix plus the writable tail is enough,
    /// and otherwise reallocates to `max(capacity * 2, readable + n)`.
    pub fn ensure_writable(&mut self, n: usize) {
        if self.writable_len() >= n {
            return;
        }
        let readable = self.len();
        if self.consumed() + self.writable_len() >= n {
            self.data.copy_within(self.read_pos..self.write_pos, 0);
        } else {
            let new_cap = (self.capacity() * 2).max(readable + n);
            let mut data = vec![0; new_cap];
            data[..readable].copy_from_slice(self.readable());
            self.data = data;
        }
        self.read_pos = 0;
        self.write_pos = readable;
    }

    /// Drop all readable bytes and rewind both cursors.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.close = false;
        self.bytes = 0;
    }

    /// Give back memory beyond `capacity` if the buffer grew past it and the
    /// readable region fits.
    pub fn shrink_to(&mut self, capacity: usize) {
        let capacity = capacity.max(self.len()).max(1);
        if self.capacity() <= capacity {
            return;
        }
        let readable = self.len();
        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.data.truncate(capacity);
        self.data.shrink_to_fit();
        self.read_pos = 0;
        self.write_pos = readable;
    }

    #[inline]
    pub fn set_close(&mut self, close: bool) {
        self.close = close;
    }

    /// Whether the bytes in this buffer carry a close frame.
    #[inline]
    #[must_use]
    pub fn is_close(&self) -> bool {
        self.close
    }

    #[inline]
    pub fn set_bytes(&mut self, bytes: usize) {
        self.bytes = bytes;
    }

    /// Logical payload byte count recorded alongside the raw bytes.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Borrowed byte slice with its own read cursor.
///
/// Copying a view is cheap; advancing a copy leaves the original untouched,
/// which is how parsers retry on short input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteView<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteView<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Remaining bytes, without advancing.
    #[must_use]
    pub fn as_slice(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl Buf for ByteView<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past end of view: {cnt} > {}",
            self.remaining()
        );
        self.pos += cnt;
    }
}
