//! The live recording session
//!
//! Created when the engine enters EXECUTING, dropped when it returns to
//! IDLE. Rows are stored in the ring buffer from index 0, so row `n` starts
//! at byte `n * row_size` and stays readable until the writer laps it.

use std::path::Path;

use serde::Serialize;

use super::bookmark::BookmarkRecorder;
use super::format::{RowLayout, ScaleType};
use super::params::{RecordingParameters, SamplingMode};
use super::ring::RingBuffer;

/// A value prepared for live display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SampleValue {
    Invalid,
    Value(f64),
}

pub struct ActiveRecording {
    pub params: RecordingParameters,
    pub mode: SamplingMode,
    pub layout: RowLayout,
    /// File offset of the first sample row
    pub data_offset: u32,
    /// Rows written so far
    pub rows: u32,
    pub x_offset: f64,
    pub x_step: f64,
    /// Set when the hardware module stores the file
    pub module_slot: Option<u8>,
    /// File length reported by the module
    pub module_file_length: u64,
    pub bookmarks: BookmarkRecorder,
}

impl ActiveRecording {
    pub fn new(params: RecordingParameters, mode: SamplingMode, live_bookmarks_max: usize) -> Self {
        let layout = RowLayout::new(
            params.validity_bit(),
            params.y_axes.iter().map(|y| y.data_type),
        );
        let x_step = match mode {
            SamplingMode::Trace => params.x_axis.step as f64,
            _ => params.period,
        };
        let x_offset = match mode {
            SamplingMode::Trace => params.x_axis.range.min as f64,
            _ => 0.0,
        };
        let module_slot = params.module_local_slot();
        let bookmarks = BookmarkRecorder::new(Path::new(&params.file_path), live_bookmarks_max);
        Self {
            params,
            mode,
            layout,
            data_offset: 0,
            rows: 0,
            x_offset,
            x_step,
            module_slot,
            module_file_length: 0,
            bookmarks,
        }
    }

    /// Whether samples go through the local buffer and file
    pub fn is_buffered(&self) -> bool {
        self.module_slot.is_none()
    }

    /// Total duration limit, if this mode has one
    pub fn duration_limit(&self) -> Option<f64> {
        self.mode
            .has_duration_limit()
            .then_some(self.params.duration)
    }

    /// X coordinate of a row
    pub fn x_value(&self, row: u32) -> f64 {
        self.x_offset + row as f64 * self.x_step
    }

    /// Decode one axis of a row still resident in `ring`.
    ///
    /// `None` when the row has not been written or was overwritten.
    pub fn value(&self, ring: &RingBuffer, row: u32, axis: usize) -> Option<SampleValue> {
        if row >= self.rows || axis >= self.layout.num_values() {
            return None;
        }
        let row_size = self.layout.row_size();
        let start = row.wrapping_mul(row_size as u32);
        let bytes = (0..row_size as u32)
            .map(|i| ring.byte_at(start.wrapping_add(i)))
            .collect::<Option<Vec<u8>>>()?;
        let decoded = self.layout.decode(&bytes)?;
        if !decoded.valid {
            return Some(SampleValue::Invalid);
        }

        let y = self.params.y_axes.get(axis)?;
        let value = y.physical(decoded.values[axis]);
        if value.is_nan() {
            return Some(SampleValue::Invalid);
        }
        Some(match self.params.y_scale {
            ScaleType::Logarithmic => SampleValue::Value(value.log10()),
            ScaleType::Linear => SampleValue::Value(value),
        })
    }
}
