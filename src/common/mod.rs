//! Common types shared across the recorder components
//!
//! Events and states of the recording state machine, the error taxonomy,
//! collaborator hooks, counters, shutdown handling and CLI argument structs.

// Re-export command types
pub mod command;
pub use command::{OverflowSource, RecorderEvent, RecordingState};

pub mod error;
pub use error::{ParameterError, RecorderError, RecorderResult};

pub mod hooks;
pub use hooks::{LoggingHooks, RecorderHooks};

pub mod metrics;
pub use metrics::{CounterSnapshot, RecorderCounters};

pub mod cli;
pub mod shutdown;
