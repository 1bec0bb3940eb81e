//! Recorder counters
//!
//! Lock-free atomic counters updated by the engine and read through
//! snapshots by status queries. Relaxed ordering throughout: the values are
//! for monitoring only.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters accumulated across recording sessions
#[derive(Debug)]
pub struct RecorderCounters {
    /// Sample rows appended to the ring buffer
    pub rows: AtomicU64,
    /// Rows written as invalid markers
    pub invalid_rows: AtomicU64,
    /// Bytes durably written to the destination file
    pub bytes_flushed: AtomicU64,
    /// Chunks written by the flusher
    pub chunks: AtomicU64,
    /// Bookmarks recorded
    pub bookmarks: AtomicU64,
    /// Sessions aborted by a buffer overflow
    pub overflows: AtomicU64,
    /// Sessions aborted by a storage error
    pub storage_errors: AtomicU64,
    /// Sessions finalized normally
    pub sessions: AtomicU64,
}

impl RecorderCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self {
            rows: AtomicU64::new(0),
            invalid_rows: AtomicU64::new(0),
            bytes_flushed: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            bookmarks: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            storage_errors: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_rows(&self) {
        self.rows.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_invalid_rows(&self) {
        self.invalid_rows.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one flushed chunk of `n` bytes
    #[inline]
    pub fn add_chunk(&self, n: u64) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_bookmarks(&self) {
        self.bookmarks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_overflows(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_storage_errors(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_sessions(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            rows: self.rows.load(Ordering::Relaxed),
            invalid_rows: self.invalid_rows.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            bookmarks: self.bookmarks.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }
}

impl Default for RecorderCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub rows: u64,
    pub invalid_rows: u64,
    pub bytes_flushed: u64,
    pub chunks: u64,
    pub bookmarks: u64,
    pub overflows: u64,
    pub storage_errors: u64,
    pub sessions: u64,
}

impl CounterSnapshot {
    /// Format flushed bytes as human-readable string (KB, MB, etc.)
    pub fn format_bytes_flushed(&self) -> String {
        let bytes = self.bytes_flushed as f64;
        if bytes >= 1_000_000_000.0 {
            format!("{:.2} GB", bytes / 1_000_000_000.0)
        } else if bytes >= 1_000_000.0 {
            format!("{:.2} MB", bytes / 1_000_000.0)
        } else if bytes >= 1_000.0 {
            format!("{:.2} KB", bytes / 1_000.0)
        } else {
            format!("{:.0} B", bytes)
        }
    }
}
