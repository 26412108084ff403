//! Workflow events: fire-and-forget notifications of state changes
//!
//! Consumers (notification dispatch, audit log, entity-status sync)
//! subscribe through an `EventSink`. Emission must never block or fail
//! the state transition that produced the event.

use crate::{InstanceId, StageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event emitted by the lifecycle manager
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// The instance the event concerns
    pub instance_id: InstanceId,
    /// What happened
    pub kind: WorkflowEventKind,
    /// Who caused it
    pub actor: String,
    /// When it happened
    pub at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(instance_id: InstanceId, kind: WorkflowEventKind, actor: impl Into<String>) -> Self {
        Self {
            instance_id,
            kind,
            actor: actor.into(),
            at: Utc::now(),
        }
    }
}

/// The kinds of lifecycle events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEventKind {
    /// An instance was started
    InstanceCreated,
    /// The instance moved between stages
    Transitioned { from: StageId, to: StageId },
    /// The instance finished successfully
    Completed,
    /// The instance was cancelled
    Cancelled,
    /// The instance was paused
    Paused,
    /// The instance was resumed
    Resumed,
}

impl std::fmt::Display for WorkflowEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InstanceCreated => write!(f, "instance.created"),
            // The from/to stages travel in the payload; the wire name
            // stays bare so consumers can match on it
            Self::Transitioned { .. } => write!(f, "transitioned"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Paused => write!(f, "paused"),
            Self::Resumed => write!(f, "resumed"),
        }
    }
}

/// Destination for emitted events
///
/// Implementations must be cheap and infallible from the engine's point
/// of view; anything slow or fallible belongs behind the sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}

/// A sink that discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: WorkflowEvent) {}
}
