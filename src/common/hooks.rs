//! Collaborator notifications
//!
//! The engine reports to the rest of the instrument through [`RecorderHooks`].
//! The default implementations do nothing, so collaborators override only
//! the notifications they care about.

use std::path::Path;

use super::command::RecordingState;
use super::error::RecorderError;

/// Notifications raised by the recording engine
pub trait RecorderHooks: Send {
    /// Error surfaced through the instrument's general error/event path.
    ///
    /// Called for every I/O and overflow abort, and for validation errors
    /// raised by events that carried no reply channel.
    fn on_error(&mut self, _error: &RecorderError) {}

    /// State changed
    fn on_state_changed(&mut self, _from: RecordingState, _to: RecordingState) {}

    /// A file on removable storage was created or changed
    fn on_storage_changed(&mut self, _path: &Path) {}

    /// Sampling started (module-controlled sources may arm here)
    fn on_recording_started(&mut self) {}

    /// Sampling stopped (module-controlled sources disarm here)
    fn on_recording_stopped(&mut self) {}
}

/// Hooks that only log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl RecorderHooks for LoggingHooks {
    fn on_error(&mut self, error: &RecorderError) {
        tracing::error!(error = %error, "Recorder error");
    }

    fn on_state_changed(&mut self, from: RecordingState, to: RecordingState) {
        tracing::debug!(%from, %to, "Recorder state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ParameterError;

    #[derive(Default)]
    struct CountingHooks {
        errors: usize,
        stopped: usize,
    }

    impl RecorderHooks for CountingHooks {
        fn on_error(&mut self, _error: &RecorderError) {
            self.errors += 1;
        }

        fn on_recording_stopped(&mut self) {
            self.stopped += 1;
        }
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let mut hooks = CountingHooks::default();
        hooks.on_state_changed(RecordingState::Idle, RecordingState::Executing);
        hooks.on_storage_changed(Path::new("/tmp/x.dlog"));
        hooks.on_recording_started();
        assert_eq!(hooks.errors, 0);
        assert_eq!(hooks.stopped, 0);
    }

    #[test]
    fn test_overridden_hooks() {
        let mut hooks = CountingHooks::default();
        hooks.on_error(&ParameterError::NoYAxes.into());
        hooks.on_recording_stopped();
        assert_eq!(hooks.errors, 1);
        assert_eq!(hooks.stopped, 1);
    }
}
