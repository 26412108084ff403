//! In-memory event log, the default `EventSink`
//!
//! Keeps every emitted event grouped by instance. Useful as an audit
//! trail in tests and single-process deployments; production consumers
//! plug their own sink in. Emission never fails: if the log's lock is
//! poisoned the event is dropped with a warning, since a sink must not
//! take down the transition that produced the event.

use caseflow_types::{EventSink, InstanceId, WorkflowEvent};
use std::collections::HashMap;
use std::sync::RwLock;

/// Records emitted events per instance
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<HashMap<InstanceId, Vec<WorkflowEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded for an instance, in emission order
    pub fn events_for(&self, instance_id: &InstanceId) -> Vec<WorkflowEvent> {
        self.events
            .read()
            .map(|events| events.get(instance_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of events recorded for an instance
    pub fn event_count(&self, instance_id: &InstanceId) -> usize {
        self.events
            .read()
            .map(|events| events.get(instance_id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total events across all instances
    pub fn total_events(&self) -> usize {
        self.events
            .read()
            .map(|events| events.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.write() {
            events.clear();
        }
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: WorkflowEvent) {
        match self.events.write() {
            Ok(mut events) => {
                tracing::debug!(instance = %event.instance_id, kind = %event.kind, "Event recorded");
                events
                    .entry(event.instance_id.clone())
                    .or_default()
                    .push(event);
            }
            Err(_) => {
                tracing::warn!(instance = %event.instance_id, "Event log poisoned, event dropped");
            }
        }
    }
}
