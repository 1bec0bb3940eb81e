//! dlog-recorder: data-logging (DLOG) recording engine for programmable
//! power-supply instruments
//!
//! Samples channel measurements (or externally supplied values) into a
//! bit-packed ring buffer, flushes it to storage in chunks and finalizes a
//! self-describing DLOG file with bookmarks.

pub mod common;
pub mod config;
pub mod recorder;
pub mod simulator;
