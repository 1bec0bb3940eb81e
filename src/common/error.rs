//! Error types for the recording engine
//!
//! # Taxonomy
//! - Parameter validation: rejected at INITIATE/START, no state change, no I/O
//! - Mass storage: open/write/sync failure, aborts the session
//! - Buffer overflow: producer outran the flusher (master) or a module
//!   dropped samples (slave), aborts the session
//!
//! Text that exceeds a length limit (comment, label, bookmark) is truncated
//! and never reported as an error.

use thiserror::Error;

use super::command::{OverflowSource, RecorderEvent, RecordingState};
use crate::recorder::FileFormatError;

/// Parameter validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("No monitored item is enabled")]
    NothingToLog,

    #[error("Destination file path is empty")]
    MissingFilePath,

    #[error("X axis step must be positive")]
    InvalidXAxisStep,

    #[error("X axis range is degenerate (min >= max)")]
    InvalidXAxisRange,

    #[error("At least one Y axis is required")]
    NoYAxes,

    #[error("Y axis {axis} range is degenerate (min >= max)")]
    InvalidYAxisRange { axis: usize },

    #[error("Too many Y axes: {count} (max {max})")]
    TooManyYAxes { count: usize, max: usize },

    #[error("Sample period must be positive")]
    InvalidPeriod,

    #[error("Duration must be at least one sample period")]
    InvalidDuration,
}

/// Recording engine errors
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Rejected parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(#[from] ParameterError),

    /// Event not accepted in the current state
    #[error("Cannot handle {event} in {state} state")]
    InvalidTransition {
        state: RecordingState,
        event: RecorderEvent,
    },

    /// Parameters may only change while idle
    #[error("Parameters cannot change in {0} state")]
    ParametersLocked(RecordingState),

    /// Storage open/write/sync failure
    #[error("Mass storage error: {0}")]
    MassStorage(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Producer overwrote data the flusher had not saved yet
    #[error("Buffer overflow ({0})")]
    BufferOverflow(OverflowSource),

    /// Recording file could not be parsed
    #[error("File format error: {0}")]
    Format(#[from] FileFormatError),

    /// Recorder task is gone
    #[error("Recorder channel closed")]
    ChannelClosed,
}

impl RecorderError {
    /// Create a mass storage error
    pub fn mass_storage(msg: impl Into<String>) -> Self {
        Self::MassStorage(msg.into())
    }

    /// Whether this error aborts an active session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecorderError::MassStorage(_) | RecorderError::Io(_) | RecorderError::BufferOverflow(_)
        )
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_error_wraps() {
        let err: RecorderError = ParameterError::NothingToLog.into();
        assert!(err.to_string().contains("Invalid parameters"));
        assert!(err.to_string().contains("No monitored item"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = RecorderError::InvalidTransition {
            state: RecordingState::Idle,
            event: RecorderEvent::Start,
        };
        let msg = err.to_string();
        assert!(msg.contains("Start"));
        assert!(msg.contains("Idle"));
    }

    #[test]
    fn test_mass_storage_error() {
        let err = RecorderError::mass_storage("write failed");
        assert!(err.to_string().contains("Mass storage error"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_overflow_error() {
        let err = RecorderError::BufferOverflow(OverflowSource::Slave);
        assert!(err.to_string().contains("slave"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RecorderError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_y_axis_range_error() {
        let err = ParameterError::InvalidYAxisRange { axis: 2 };
        assert!(err.to_string().contains("Y axis 2"));
    }
}
