//! Circular sample buffer
//!
//! Bytes are addressed by a monotonically increasing 32-bit index; the
//! physical offset is `index % capacity`. The writer owns `write_index`, the
//! flusher owns `saved_index`. Overflow is detected, not prevented: a write
//! always lands, and reports [`Overflow`] when it has clobbered bytes the
//! flusher has not saved yet.

use thiserror::Error;

/// The writer is more than one buffer ahead of the flusher
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("ring buffer overflow: {distance} bytes pending, capacity {capacity}")]
pub struct Overflow {
    pub distance: u32,
    pub capacity: u32,
}

/// Fixed-size ring with independent writer and flusher indices
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    write_index: u32,
    saved_index: u32,
}

impl RingBuffer {
    /// Create a ring of at least `capacity` bytes.
    ///
    /// The capacity is rounded up to a power of two so the physical offset
    /// stays continuous when the 32-bit index wraps.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two().min(1 << 31);
        Self {
            buf: vec![0; capacity],
            write_index: 0,
            saved_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes written since the last reset
    pub fn write_index(&self) -> u32 {
        self.write_index
    }

    /// Total bytes handed to storage since the last reset
    pub fn saved_index(&self) -> u32 {
        self.saved_index
    }

    /// Bytes written but not yet saved
    pub fn pending(&self) -> u32 {
        self.write_index.wrapping_sub(self.saved_index)
    }

    /// Check the writer/flusher distance against the capacity
    pub fn check(&self) -> Result<(), Overflow> {
        let distance = self.pending();
        if distance as usize > self.buf.len() {
            Err(Overflow {
                distance,
                capacity: self.buf.len() as u32,
            })
        } else {
            Ok(())
        }
    }

    /// Append bytes at the write index.
    ///
    /// The bytes are always committed; the error only reports that unsaved
    /// data has been overwritten.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), Overflow> {
        let cap = self.buf.len();
        let mut offset = self.physical(self.write_index);
        let mut rest = bytes;
        while !rest.is_empty() {
            let n = rest.len().min(cap - offset);
            self.buf[offset..offset + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            offset = 0;
        }
        self.write_index = self.write_index.wrapping_add(bytes.len() as u32);
        self.check()
    }

    /// Borrow `len` bytes starting at logical index `start`.
    ///
    /// The second slice is non-empty when the span crosses the physical end
    /// of the buffer. `len` is clamped to the capacity.
    pub fn read_chunk(&self, start: u32, len: usize) -> (&[u8], &[u8]) {
        let cap = self.buf.len();
        let len = len.min(cap);
        let offset = self.physical(start);
        if offset + len <= cap {
            (&self.buf[offset..offset + len], &[])
        } else {
            let head = cap - offset;
            (&self.buf[offset..], &self.buf[..len - head])
        }
    }

    /// Byte at a logical index, if it is still resident
    pub fn byte_at(&self, index: u32) -> Option<u8> {
        let behind = self.write_index.wrapping_sub(index);
        if behind == 0 || behind as usize > self.buf.len() {
            return None;
        }
        Some(self.buf[self.physical(index)])
    }

    /// Advance the saved index after `n` bytes reached storage
    pub fn mark_saved(&mut self, n: u32) {
        self.saved_index = self.saved_index.wrapping_add(n);
    }

    /// Drop everything and restart both indices at zero
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.saved_index = 0;
    }

    fn physical(&self, index: u32) -> usize {
        index as usize & (self.buf.len() - 1)
    }
}
