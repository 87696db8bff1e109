//! Pipeline tracker: an observer of step and edge events.
//!
//! Recording never blocks or fails a run; tracker errors are logged and dropped.

use std::fmt;
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("tracker failed: {message}")]
pub struct TrackerError {
    pub message: String,
}

/// Structured events emitted by controllers and operators.
///
/// `layer` is the depth of the emitting pipe in the pipe stack, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A pipe turned its inputs into a result.
    PipeStep {
        pipe_code: String,
        layer: usize,
        from_stuff: Vec<String>,
        to_stuff: String,
    },
    /// One item of a list was handed to a batch branch.
    BatchStep {
        pipe_code: String,
        layer: usize,
        list_stuff: String,
        item_index: usize,
        item_stuff: String,
    },
    /// Several branch results were merged into one.
    AggregateStep {
        pipe_code: String,
        layer: usize,
        from_stuff: Vec<String>,
        to_stuff: String,
    },
    /// A condition expression was evaluated.
    ConditionStep {
        pipe_code: String,
        layer: usize,
        expression: String,
        evaluated: String,
    },
    /// A condition chose an outcome.
    ChoiceStep {
        pipe_code: String,
        layer: usize,
        evaluated: String,
        chosen: String,
    },
}

impl TrackerEvent {
    pub fn pipe_code(&self) -> &str {
        match self {
            TrackerEvent::PipeStep { pipe_code, .. }
            | TrackerEvent::BatchStep { pipe_code, .. }
            | TrackerEvent::AggregateStep { pipe_code, .. }
            | TrackerEvent::ConditionStep { pipe_code, .. }
            | TrackerEvent::ChoiceStep { pipe_code, .. } => pipe_code,
        }
    }
}

pub trait PipelineTracker: Send + Sync + fmt::Debug {
    fn record(&self, event: TrackerEvent) -> Result<(), TrackerError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl PipelineTracker for NoopTracker {
    fn record(&self, _event: TrackerEvent) -> Result<(), TrackerError> {
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<TrackerEvent>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl PipelineTracker for RecordingTracker {
    fn record(&self, event: TrackerEvent) -> Result<(), TrackerError> {
        let mut events = self.events.lock().map_err(|error| TrackerError {
            message: error.to_string(),
        })?;
        events.push(event);
        Ok(())
    }
}

/// Records `event`, logging instead of failing when the tracker errors.
pub(crate) fn emit(tracker: &dyn PipelineTracker, event: TrackerEvent) {
    let pipe_code = event.pipe_code().to_string();
    if let Err(error) = tracker.record(event) {
        warn!(pipe_code = %pipe_code, error = %error, "pipeline tracker rejected an event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FailingTracker;

    impl PipelineTracker for FailingTracker {
        fn record(&self, _event: TrackerEvent) -> Result<(), TrackerError> {
            Err(TrackerError {
                message: "disk full".to_string(),
            })
        }
    }

    fn event() -> TrackerEvent {
        TrackerEvent::ChoiceStep {
            pipe_code: "route".to_string(),
            layer: 1,
            evaluated: "yes".to_string(),
            chosen: "answer".to_string(),
        }
    }

    #[test]
    fn emit_swallows_tracker_errors() {
        emit(&FailingTracker, event());
    }

    #[test]
    fn recording_tracker_keeps_events_in_order() {
        let tracker = RecordingTracker::new();
        emit(&tracker, event());
        emit(&NoopTracker, event());
        assert_eq!(tracker.events(), vec![event()]);
    }
}
