//! Step reporting sink
//!
//! Every phase of a run (server creation, drain, bootstrap, ...) reports
//! start/success/failure through a [`StepReporter`] before errors
//! propagate, so the surrounding CLI can show progress without the core
//! knowing anything about terminals.

use std::sync::Mutex;
use std::time::Duration;

/// Sink for per-step progress events.
///
/// Implementations must be cheap: reporting happens on the hot path of
/// every reconciliation phase.
pub trait StepReporter: Send + Sync {
    /// A step has started, e.g. "create server web-2".
    fn step_started(&self, step: &str);

    /// The step finished successfully.
    fn step_succeeded(&self, step: &str, duration: Duration);

    /// The step failed. The error is reported here *and* propagated by
    /// the caller; reporting never replaces error handling.
    fn step_failed(&self, step: &str, error: &str, duration: Duration);
}

/// Default reporter that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StepReporter for TracingReporter {
    fn step_started(&self, step: &str) {
        tracing::info!(step, "step started");
    }

    fn step_succeeded(&self, step: &str, duration: Duration) {
        tracing::info!(step, elapsed_ms = duration.as_millis() as u64, "step succeeded");
    }

    fn step_failed(&self, step: &str, error: &str, duration: Duration) {
        tracing::warn!(
            step,
            error,
            elapsed_ms = duration.as_millis() as u64,
            "step failed"
        );
    }
}

/// A reported event, as recorded by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    Started(String),
    Succeeded(String),
    Failed { step: String, error: String },
}

/// Test reporter that records every event in order.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<StepEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Step names that were reported as failed.
    pub fn failed_steps(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StepEvent::Failed { step, .. } => Some(step),
                _ => None,
            })
            .collect()
    }
}

impl StepReporter for RecordingReporter {
    fn step_started(&self, step: &str) {
        self.events
            .lock()
            .unwrap()
            .push(StepEvent::Started(step.to_string()));
    }

    fn step_succeeded(&self, step: &str, _duration: Duration) {
        self.events
            .lock()
            .unwrap()
            .push(StepEvent::Succeeded(step.to_string()));
    }

    fn step_failed(&self, step: &str, error: &str, _duration: Duration) {
        self.events.lock().unwrap().push(StepEvent::Failed {
            step: step.to_string(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_order() {
        let reporter = RecordingReporter::new();
        reporter.step_started("create web-1");
        reporter.step_succeeded("create web-1", Duration::from_secs(1));
        reporter.step_started("create web-2");
        reporter.step_failed("create web-2", "quota exceeded", Duration::from_secs(2));

        assert_eq!(
            reporter.events(),
            vec![
                StepEvent::Started("create web-1".to_string()),
                StepEvent::Succeeded("create web-1".to_string()),
                StepEvent::Started("create web-2".to_string()),
                StepEvent::Failed {
                    step: "create web-2".to_string(),
                    error: "quota exceeded".to_string(),
                },
            ]
        );
        assert_eq!(reporter.failed_steps(), vec!["create web-2".to_string()]);
    }
}
