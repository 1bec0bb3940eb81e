//! Bit-packed writer over the ring buffer
//!
//! Bits are packed MSB first. Callers flush pending bits before any
//! byte-aligned value and at the end of every row.

use super::ring::{Overflow, RingBuffer};

const FIRST_BIT: u8 = 0x80;

/// Appends bits, integers and floats to a [`RingBuffer`]
#[derive(Debug)]
pub struct BitWriter {
    ring: RingBuffer,
    bits: u8,
    mask: u8,
}

impl BitWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            bits: 0,
            mask: FIRST_BIT,
        }
    }

    /// Total bytes written since reset
    pub fn buffer_index(&self) -> u32 {
        self.ring.write_index()
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut RingBuffer {
        &mut self.ring
    }

    /// Whether bits are waiting for a byte boundary
    pub fn has_pending_bits(&self) -> bool {
        self.mask != FIRST_BIT
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<(), Overflow> {
        if bit {
            self.bits |= self.mask;
        }
        if self.mask == 1 {
            let byte = self.bits;
            self.bits = 0;
            self.mask = FIRST_BIT;
            self.ring.write(&[byte])
        } else {
            self.mask >>= 1;
            Ok(())
        }
    }

    /// Pad pending bits with zeros up to the next byte boundary
    pub fn flush_bits(&mut self) -> Result<(), Overflow> {
        if !self.has_pending_bits() {
            return Ok(());
        }
        let byte = self.bits;
        self.bits = 0;
        self.mask = FIRST_BIT;
        self.ring.write(&[byte])
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Overflow> {
        self.ring.write(bytes)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), Overflow> {
        self.ring.write(&[value])
    }

    /// Big-endian 16-bit value
    pub fn write_i16(&mut self, value: i16) -> Result<(), Overflow> {
        self.ring.write(&value.to_be_bytes())
    }

    /// Big-endian 24-bit value (low three bytes of `value`)
    pub fn write_i24(&mut self, value: i32) -> Result<(), Overflow> {
        let b = value.to_be_bytes();
        self.ring.write(&b[1..])
    }

    /// Little-endian IEEE 754 single
    pub fn write_float(&mut self, value: f32) -> Result<(), Overflow> {
        self.ring.write(&value.to_le_bytes())
    }

    /// Clear pending bits and restart the index at zero
    pub fn reset(&mut self) {
        self.ring.reset();
        self.bits = 0;
        self.mask = FIRST_BIT;
    }
}
