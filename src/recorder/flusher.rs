//! Chunked flush from the ring buffer to storage
//!
//! A write is due when it is forced, when the sync interval has elapsed, or
//! when a full chunk is pending. Each chunk is staged in a linear buffer,
//! appended to the destination and synced before the saved index advances.

use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::bit_writer::BitWriter;
use super::file::DlogFile;
use super::ring::{Overflow, RingBuffer};
use super::storage::Storage;
use crate::common::{OverflowSource, RecorderCounters, RecorderError, RecorderResult};
use crate::config::RecorderConfig;

/// Flush thresholds and time budgets
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub chunk_size: usize,
    pub sync_interval: Duration,
    pub write_timeout: Duration,
    pub flush_timeout: Duration,
}

impl From<&RecorderConfig> for FlushPolicy {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            sync_interval: config.sync_interval(),
            write_timeout: config.write_timeout(),
            flush_timeout: config.flush_timeout(),
        }
    }
}

pub struct ChunkedFlusher {
    policy: FlushPolicy,
    staging: Vec<u8>,
    last_sync: Instant,
}

impl ChunkedFlusher {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            staging: vec![0; policy.chunk_size],
            policy,
            last_sync: Instant::now(),
        }
    }

    /// Restart the sync interval
    pub fn reset(&mut self) {
        self.last_sync = Instant::now();
    }

    /// Stage the next chunk that is due for writing.
    ///
    /// Returns the number of staged bytes (0 when nothing is due), or the
    /// overflow when unsaved bytes were already overwritten.
    pub fn next_write_chunk(&mut self, ring: &RingBuffer, force: bool) -> Result<usize, Overflow> {
        ring.check()?;

        let pending = ring.pending() as usize;
        if pending == 0 {
            return Ok(0);
        }
        let due = force
            || pending >= self.policy.chunk_size
            || self.last_sync.elapsed() >= self.policy.sync_interval;
        if !due {
            return Ok(0);
        }

        let n = pending.min(self.policy.chunk_size);
        let (head, tail) = ring.read_chunk(ring.saved_index(), n);
        self.staging[..head.len()].copy_from_slice(head);
        self.staging[head.len()..n].copy_from_slice(tail);
        Ok(n)
    }

    /// Write due chunks until none is left or the write timeout expires.
    ///
    /// A failed write reinitializes storage and is returned without retry.
    pub fn file_write(
        &mut self,
        ring: &mut RingBuffer,
        file: &mut DlogFile,
        storage: &mut dyn Storage,
        force: bool,
        counters: &RecorderCounters,
    ) -> RecorderResult<()> {
        let deadline = Instant::now() + self.policy.write_timeout;
        loop {
            let n = match self.next_write_chunk(ring, force) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(overflow) => {
                    error!(
                        pending = overflow.distance,
                        capacity = overflow.capacity,
                        "Buffer overflow detected by flusher"
                    );
                    return Err(RecorderError::BufferOverflow(OverflowSource::Master));
                }
            };

            if let Err(e) = file.append(&self.staging[..n]).and_then(|_| file.sync()) {
                storage.reinitialize();
                return Err(RecorderError::mass_storage(format!(
                    "write to {} failed: {}",
                    file.path().display(),
                    e
                )));
            }

            ring.mark_saved(n as u32);
            self.last_sync = Instant::now();
            counters.add_chunk(n as u64);
            debug!(bytes = n, saved = ring.saved_index(), "Chunk written");

            if Instant::now() >= deadline {
                return Ok(());
            }
        }
    }

    /// Flush pending bits and force every buffered byte to storage
    pub fn flush_data(
        &mut self,
        writer: &mut BitWriter,
        file: &mut DlogFile,
        storage: &mut dyn Storage,
        counters: &RecorderCounters,
    ) -> RecorderResult<()> {
        writer
            .flush_bits()
            .map_err(|_| RecorderError::BufferOverflow(OverflowSource::Master))?;

        let deadline = Instant::now() + self.policy.flush_timeout;
        while writer.ring().pending() > 0 {
            self.file_write(writer.ring_mut(), file, storage, true, counters)?;
            if writer.ring().pending() > 0 && Instant::now() >= deadline {
                warn!(pending = writer.ring().pending(), "Flush timed out");
                return Err(RecorderError::mass_storage("flush timed out"));
            }
        }
        Ok(())
    }
}
