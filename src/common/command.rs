//! Recording events and states
//!
//! Every control input (command layer, trigger source, sampling loop,
//! flusher) reaches the recording engine as a [`RecorderEvent`].
//!
//! ## State Machine
//! ```text
//!            INITIATE (trigger != immediate)
//!   ┌──────┐ ──────────────────────────► ┌───────────┐
//!   │ Idle │                             │ Initiated │
//!   └──────┘ ◄────────────────────────── └───────────┘
//!     ▲  │      ABORT / RESET / ABORT_AFTER_*   │
//!     │  │                                      │ START / TRIGGER / TOGGLE_START
//!     │  │ INITIATE (immediate)                 ▼
//!     │  └──────────────────────────────► ┌───────────┐
//!     │                                   │ Executing │
//!     └────────────────────────────────── └───────────┘
//!        TOGGLE_STOP / FINISH / ABORT / RESET / ABORT_AFTER_*
//! ```

use serde::{Deserialize, Serialize};

/// Recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RecordingState {
    /// No recording; parameters may be edited
    #[default]
    Idle,
    /// Armed, waiting for a trigger
    Initiated,
    /// Actively sampling
    Executing,
}

impl RecordingState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: RecordingState) -> bool {
        use RecordingState::*;
        matches!(
            (self, target),
            (Idle, Initiated)
                | (Idle, Executing)
                | (Initiated, Executing)
                | (Initiated, Idle)
                | (Executing, Idle)
        )
    }

    /// Get events that cause a transition from the current state
    pub fn valid_events(&self) -> &'static [&'static str] {
        use RecordingState::*;
        match self {
            Idle => &["Initiate", "InitiateTrace", "ToggleStart", "Reset"],
            Initiated => &[
                "Start",
                "Trigger",
                "ToggleStart",
                "ToggleStop",
                "Abort",
                "Reset",
                "AbortAfterBufferOverflow",
                "AbortAfterMassStorageError",
            ],
            Executing => &[
                "ToggleStop",
                "Finish",
                "Abort",
                "Reset",
                "AbortAfterBufferOverflow",
                "AbortAfterMassStorageError",
            ],
        }
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Idle => write!(f, "Idle"),
            RecordingState::Initiated => write!(f, "Initiated"),
            RecordingState::Executing => write!(f, "Executing"),
        }
    }
}

/// Who detected a buffer overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowSource {
    /// This engine's writer outran its own flusher
    Master,
    /// A cooperating hardware module reported dropped samples
    Slave,
}

impl std::fmt::Display for OverflowSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowSource::Master => write!(f, "master"),
            OverflowSource::Slave => write!(f, "slave"),
        }
    }
}

/// Events delivered to the recording state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderEvent {
    /// Arm (or start, for the immediate trigger source) a periodic recording
    Initiate,
    /// Arm a recording whose samples arrive through explicit log calls
    InitiateTrace,
    /// Start sampling now
    Start,
    /// Configured trigger source fired
    Trigger,
    /// Front-panel start key
    ToggleStart,
    /// Front-panel stop key
    ToggleStop,
    /// Total duration elapsed
    Finish,
    /// Stop and finalize
    Abort,
    /// Stop and restore default parameters
    Reset,
    /// Producer outran the flusher
    AbortAfterBufferOverflow(OverflowSource),
    /// Storage open/write failed
    AbortAfterMassStorageError,
}

impl std::fmt::Display for RecorderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderEvent::Initiate => write!(f, "Initiate"),
            RecorderEvent::InitiateTrace => write!(f, "InitiateTrace"),
            RecorderEvent::Start => write!(f, "Start"),
            RecorderEvent::Trigger => write!(f, "Trigger"),
            RecorderEvent::ToggleStart => write!(f, "ToggleStart"),
            RecorderEvent::ToggleStop => write!(f, "ToggleStop"),
            RecorderEvent::Finish => write!(f, "Finish"),
            RecorderEvent::Abort => write!(f, "Abort"),
            RecorderEvent::Reset => write!(f, "Reset"),
            RecorderEvent::AbortAfterBufferOverflow(source) => {
                write!(f, "AbortAfterBufferOverflow({})", source)
            }
            RecorderEvent::AbortAfterMassStorageError => write!(f, "AbortAfterMassStorageError"),
        }
    }
}
