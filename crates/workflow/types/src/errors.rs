//! Error types for the workflow layer

use crate::{EntityId, EntityType, GateFailure, InstanceId, InstanceStatus, TemplateId};

/// Errors that can occur in workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Malformed template definition; nothing is persisted
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No matching edge, role not permitted, or reason missing
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// The edge exists but one or more gates did not pass
    #[error("Gate check failed: {} gate(s) not satisfied", failures.len())]
    GateFailed { failures: Vec<GateFailure> },

    /// Operation not permitted in the instance's current status
    #[error("Cannot {operation} an instance in status {status}")]
    InvalidState {
        operation: String,
        status: InstanceStatus,
    },

    #[error("Workflow template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("No active default template for entity type {0}")]
    NoDefaultTemplate(EntityType),

    /// The entity already runs a workflow
    #[error("Entity {entity_type}:{entity_id} already has a workflow instance")]
    DuplicateInstance {
        entity_type: EntityType,
        entity_id: EntityId,
    },

    /// Delete blocked while instances reference this exact version
    #[error("Template {0} is referenced by existing instances")]
    TemplateInUse(TemplateId),

    /// Concurrent mutation detected; safe to retry with fresh state
    #[error("Concurrent modification detected, retry with fresh state")]
    Conflict,

    /// Store lock poisoned by a panicking writer
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl WorkflowError {
    /// Helper for terminal/incompatible-status rejections
    pub fn invalid_state(operation: impl Into<String>, status: InstanceStatus) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            status,
        }
    }
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
