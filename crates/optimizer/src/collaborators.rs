//! Collaborator seams — the traits the optimization loop pulls telemetry
//! from and pushes chosen actions through.
//!
//! Modules register implementations by name before the loop starts; the
//! loop treats every collaborator as fallible and skips failures.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use revpilot_core::{Action, Telemetry};

/// A named source of business telemetry, polled on every state-update tick.
///
/// Returning an empty group means "nothing new"; errors are logged by the
/// loop and skipped.
pub trait TelemetrySource: Send + Sync {
    fn collect(&self) -> anyhow::Result<Telemetry>;
}

/// Executes a chosen action against a live system (pricing engine, ad
/// platform, CMS, ...). Invoked once per matching trigger key.
pub trait ActionHandler: Send + Sync {
    fn execute(&self, action: &Action, experiment_id: Uuid) -> anyhow::Result<HandlerReport>;
}

/// Result descriptor returned by an action handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerReport {
    pub handler: String,
    pub detail: String,
}

/// Telemetry source that always returns a fixed snapshot. Useful for tests
/// and wiring demos.
pub struct StaticSource {
    snapshot: Telemetry,
}

impl StaticSource {
    pub fn new(snapshot: Telemetry) -> Self {
        Self { snapshot }
    }
}

impl TelemetrySource for StaticSource {
    fn collect(&self) -> anyhow::Result<Telemetry> {
        Ok(self.snapshot.clone())
    }
}

/// Handler that records every dispatched action for later inspection.
/// Useful for tests and wiring demos.
#[derive(Default)]
pub struct RecordingHandler {
    name: String,
    calls: Mutex<Vec<(Action, Uuid)>>,
}

impl RecordingHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Action, Uuid)> {
        self.calls.lock().expect("handler mutex poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("handler mutex poisoned").len()
    }
}

impl ActionHandler for RecordingHandler {
    fn execute(&self, action: &Action, experiment_id: Uuid) -> anyhow::Result<HandlerReport> {
        self.calls
            .lock()
            .expect("handler mutex poisoned")
            .push((action.clone(), experiment_id));
        Ok(HandlerReport {
            handler: self.name.clone(),
            detail: format!("recorded action for experiment {experiment_id}"),
        })
    }
}
