//! Transition validator: structural and authorization checks
//!
//! Runs before any gate evaluation. The validator answers three
//! questions from the instance's snapshotted template: does the edge
//! exist, is the instance in a status that permits movement, and may
//! this principal take the edge? It never mutates anything; on success
//! it hands the matched edge back so the caller can evaluate its gates.

use caseflow_types::{
    Principal, StageId, Transition, WorkflowError, WorkflowInstance, WorkflowResult,
    WorkflowTemplate,
};

/// Validates transition requests against the instance's pinned template
#[derive(Clone, Copy, Debug, Default)]
pub struct TransitionValidator;

impl TransitionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a transition request to the template edge it would take.
    ///
    /// Errors distinguish an instance that cannot move at all
    /// (`InvalidState`) from a request the template or the principal's
    /// roles do not permit (`InvalidTransition`).
    pub fn resolve<'t>(
        &self,
        instance: &WorkflowInstance,
        template: &'t WorkflowTemplate,
        target: &StageId,
        principal: &Principal,
        reason: Option<&str>,
    ) -> WorkflowResult<&'t Transition> {
        if !instance.is_active() {
            return Err(WorkflowError::invalid_state("transition", instance.status));
        }

        let edge = template
            .find_edge(&instance.current_stage, target)
            .ok_or_else(|| {
                WorkflowError::InvalidTransition(format!(
                    "No transition from '{}' to '{}' in template version {}",
                    instance.current_stage, target, template.version
                ))
            })?;

        if !edge.permits_roles(&principal.roles) {
            return Err(WorkflowError::InvalidTransition(format!(
                "Principal '{}' lacks a role permitted on '{}' → '{}'",
                principal.id, edge.from, edge.to
            )));
        }

        if edge.requires_reason && reason.map(str::trim).filter(|r| !r.is_empty()).is_none() {
            return Err(WorkflowError::InvalidTransition(format!(
                "Transition '{}' → '{}' requires a reason",
                edge.from, edge.to
            )));
        }

        Ok(edge)
    }
}
