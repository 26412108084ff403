//! Lifecycle manager: the write path for workflow instances
//!
//! Every instance mutation funnels through here. Each operation reads a
//! snapshot, checks status preconditions, builds the mutated copy, and
//! commits it with a compare-and-swap against the revision it read. A
//! transition that loses the race is retried a bounded number of times
//! with fresh state; every other conflict propagates to the caller.
//! Events go out only after the commit lands.

use crate::{EvaluationContext, GateEvaluator, TransitionValidator};
use caseflow_store::{InstanceStore, TemplateStore};
use caseflow_types::{
    ApprovalRecord, EntityId, EntitySnapshot, EntityType, EventSink, InstanceId, InstanceStatus,
    NullSink, OrgId, Principal, StageId, TemplateId, Transition, WorkflowError, WorkflowEvent,
    WorkflowEventKind, WorkflowInstance, WorkflowResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tunables for the lifecycle manager
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times a transition retries after losing a write race
    pub max_conflict_retries: u32,
    /// Days before the due date at which SLA standing turns WARNING
    pub sla_warning_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            sla_warning_days: 2,
        }
    }
}

/// A request to move an instance along one edge
///
/// Carries the evidence the gates run against: an entity field snapshot
/// and any approvals recorded for the instance. The engine never
/// fetches these itself.
#[derive(Clone, Debug)]
pub struct TransitionRequest {
    pub target: StageId,
    pub principal: Principal,
    pub reason: Option<String>,
    pub entity: EntitySnapshot,
    pub approvals: Vec<ApprovalRecord>,
}

impl TransitionRequest {
    pub fn new(target: impl Into<String>, principal: Principal) -> Self {
        Self {
            target: StageId::new(target),
            principal,
            reason: None,
            entity: EntitySnapshot::new(),
            approvals: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_entity(mut self, entity: EntitySnapshot) -> Self {
        self.entity = entity;
        self
    }

    pub fn with_approval(mut self, approval: ApprovalRecord) -> Self {
        self.approvals.push(approval);
        self
    }
}

/// Owns the instance write path
pub struct LifecycleManager {
    templates: Arc<TemplateStore>,
    instances: Arc<InstanceStore>,
    validator: TransitionValidator,
    gates: GateEvaluator,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl LifecycleManager {
    pub fn new(templates: Arc<TemplateStore>, instances: Arc<InstanceStore>) -> Self {
        Self {
            templates,
            instances,
            validator: TransitionValidator::new(),
            gates: GateEvaluator::new(),
            events: Arc::new(NullSink),
            config: EngineConfig::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Retry an operation whose commit lost a write race.
    ///
    /// `Conflict` is the only retried error; each attempt re-reads
    /// fresh state inside the closure.
    fn retry_conflicts<T>(
        &self,
        operation: &str,
        mut f: impl FnMut() -> WorkflowResult<T>,
    ) -> WorkflowResult<T> {
        let mut attempts = 0;
        loop {
            match f() {
                Err(WorkflowError::Conflict) if attempts < self.config.max_conflict_retries => {
                    attempts += 1;
                    tracing::debug!(operation, attempt = attempts, "Lost write race, retrying");
                }
                result => return result,
            }
        }
    }

    /// Start a workflow for an entity.
    ///
    /// Uses the named template when given, otherwise the organization's
    /// active default for the entity type. The instance snapshots the
    /// resolved version and never upgrades past it.
    pub fn start_workflow(
        &self,
        org_id: &OrgId,
        entity_type: EntityType,
        entity_id: EntityId,
        template_id: Option<&TemplateId>,
        principal: &Principal,
    ) -> WorkflowResult<WorkflowInstance> {
        self.retry_conflicts("start_workflow", || {
            self.try_start(org_id, entity_type, entity_id.clone(), template_id, principal)
        })
    }

    fn try_start(
        &self,
        org_id: &OrgId,
        entity_type: EntityType,
        entity_id: EntityId,
        template_id: Option<&TemplateId>,
        principal: &Principal,
    ) -> WorkflowResult<WorkflowInstance> {
        let template = match template_id {
            Some(id) => {
                let template = self.templates.get(org_id, id)?;
                if !template.is_active {
                    return Err(WorkflowError::Validation(format!(
                        "Template '{}' is not active",
                        id
                    )));
                }
                template
            }
            None => self.templates.default_for(org_id, entity_type)?,
        };

        let mut instance = WorkflowInstance::start(
            org_id.clone(),
            template.id.clone(),
            template.version,
            entity_type,
            entity_id,
            template.initial_stage.clone(),
        );
        let initial_sla = template
            .stage(&instance.current_stage)
            .and_then(|s| s.sla_days);
        instance.recompute_sla(initial_sla, self.config.sla_warning_days, Utc::now());

        let instance = self.instances.insert(instance)?;

        // The template row must not have changed between the snapshot
        // read and the insert: an edit that observed zero active
        // instances could otherwise mutate the shape this instance just
        // pinned. Any commit bumps the row revision, so a mismatch here
        // rolls the start back and retries against fresh state.
        match self.templates.get(org_id, &template.id) {
            Ok(current) if current.revision == template.revision => {}
            _ => {
                self.instances.remove(org_id, &instance.id)?;
                return Err(WorkflowError::Conflict);
            }
        }

        tracing::info!(
            instance = %instance.id,
            template = %template.id,
            version = template.version,
            entity = %instance.entity_id,
            "Workflow started"
        );
        self.events.emit(WorkflowEvent::new(
            instance.id.clone(),
            WorkflowEventKind::InstanceCreated,
            &principal.id,
        ));
        Ok(instance)
    }

    /// Move an instance along a declared edge.
    ///
    /// The request is validated against the instance's pinned template
    /// version, then the edge's gates and the target stage's entry
    /// gates run against the supplied evidence. All failures are
    /// reported together. A write conflict retries the whole sequence
    /// with fresh state, up to the configured bound.
    pub fn transition(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        request: &TransitionRequest,
    ) -> WorkflowResult<WorkflowInstance> {
        self.retry_conflicts("transition", || {
            self.try_transition(org_id, instance_id, request)
        })
    }

    fn try_transition(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        request: &TransitionRequest,
    ) -> WorkflowResult<WorkflowInstance> {
        let instance = self.instances.get(org_id, instance_id)?;
        let template = self.templates.get(org_id, &instance.template_id)?;

        let edge = self.validator.resolve(
            &instance,
            &template,
            &request.target,
            &request.principal,
            request.reason.as_deref(),
        )?;
        let target_stage = template.stage(&edge.to).ok_or_else(|| {
            WorkflowError::InvalidTransition(format!("Target stage '{}' not found", edge.to))
        })?;

        let now = Utc::now();
        let context = EvaluationContext::new(
            instance.current_stage.clone(),
            instance.current_stage_entered_at(),
        )
        .with_entity(request.entity.clone())
        .with_now(now);
        let context = request
            .approvals
            .iter()
            .cloned()
            .fold(context, |ctx, approval| ctx.with_approval(approval));

        let outcome = self
            .gates
            .evaluate(edge.gates.iter().chain(&target_stage.entry_gates), &context);
        if !outcome.passed {
            tracing::debug!(
                instance = %instance.id,
                target = %edge.to,
                failures = outcome.failures.len(),
                "Transition blocked by gates"
            );
            return Err(WorkflowError::GateFailed {
                failures: outcome.failures,
            });
        }

        let mut updated = instance.clone();
        updated.close_current_step(request.principal.id.clone(), now);
        updated.enter_stage(edge.to.clone(), now);
        updated.recompute_sla(target_stage.sla_days, self.config.sla_warning_days, now);

        let saved = self.instances.compare_and_update(instance.revision, updated)?;
        tracing::info!(
            instance = %saved.id,
            from = %instance.current_stage,
            to = %saved.current_stage,
            actor = %request.principal.id,
            "Instance transitioned"
        );
        self.events.emit(WorkflowEvent::new(
            saved.id.clone(),
            WorkflowEventKind::Transitioned {
                from: instance.current_stage.clone(),
                to: saved.current_stage.clone(),
            },
            &request.principal.id,
        ));
        Ok(saved)
    }

    /// Mark an ACTIVE instance COMPLETED, recording an outcome
    pub fn complete(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
        outcome: Option<String>,
    ) -> WorkflowResult<WorkflowInstance> {
        self.retry_conflicts("complete", || {
            self.try_complete(org_id, instance_id, principal, outcome.clone())
        })
    }

    fn try_complete(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
        outcome: Option<String>,
    ) -> WorkflowResult<WorkflowInstance> {
        let instance = self.instances.get(org_id, instance_id)?;
        if !instance.is_active() {
            return Err(WorkflowError::invalid_state("complete", instance.status));
        }

        let now = Utc::now();
        let mut updated = instance.clone();
        updated.close_current_step(principal.id.clone(), now);
        updated.status = InstanceStatus::Completed;
        updated.outcome = outcome;
        updated.completed_at = Some(now);
        updated.updated_at = now;

        let saved = self.instances.compare_and_update(instance.revision, updated)?;
        tracing::info!(instance = %saved.id, actor = %principal.id, "Instance completed");
        self.events.emit(WorkflowEvent::new(
            saved.id.clone(),
            WorkflowEventKind::Completed,
            &principal.id,
        ));
        Ok(saved)
    }

    /// Cancel an ACTIVE or PAUSED instance
    pub fn cancel(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
        reason: Option<&str>,
    ) -> WorkflowResult<WorkflowInstance> {
        self.retry_conflicts("cancel", || {
            self.try_cancel(org_id, instance_id, principal, reason)
        })
    }

    fn try_cancel(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
        reason: Option<&str>,
    ) -> WorkflowResult<WorkflowInstance> {
        let instance = self.instances.get(org_id, instance_id)?;
        if instance.is_terminal() {
            return Err(WorkflowError::invalid_state("cancel", instance.status));
        }

        let now = Utc::now();
        let mut updated = instance.clone();
        updated.status = InstanceStatus::Cancelled;
        updated.outcome = Some(match reason {
            Some(r) if !r.trim().is_empty() => format!("cancelled: {}", r.trim()),
            _ => "cancelled".into(),
        });
        updated.completed_at = Some(now);
        updated.paused_at = None;
        updated.updated_at = now;

        let saved = self.instances.compare_and_update(instance.revision, updated)?;
        tracing::info!(instance = %saved.id, actor = %principal.id, "Instance cancelled");
        self.events.emit(WorkflowEvent::new(
            saved.id.clone(),
            WorkflowEventKind::Cancelled,
            &principal.id,
        ));
        Ok(saved)
    }

    /// Pause an ACTIVE instance, freezing its SLA clock
    pub fn pause(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
    ) -> WorkflowResult<WorkflowInstance> {
        self.retry_conflicts("pause", || self.try_pause(org_id, instance_id, principal))
    }

    fn try_pause(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
    ) -> WorkflowResult<WorkflowInstance> {
        let instance = self.instances.get(org_id, instance_id)?;
        if !instance.is_active() {
            return Err(WorkflowError::invalid_state("pause", instance.status));
        }
        let template = self.templates.get(org_id, &instance.template_id)?;

        let now = Utc::now();
        let mut updated = instance.clone();
        updated.status = InstanceStatus::Paused;
        updated.paused_at = Some(now);
        updated.updated_at = now;
        let sla_days = template.stage(&updated.current_stage).and_then(|s| s.sla_days);
        updated.recompute_sla(sla_days, self.config.sla_warning_days, now);

        let saved = self.instances.compare_and_update(instance.revision, updated)?;
        tracing::info!(instance = %saved.id, actor = %principal.id, "Instance paused");
        self.events.emit(WorkflowEvent::new(
            saved.id.clone(),
            WorkflowEventKind::Paused,
            &principal.id,
        ));
        Ok(saved)
    }

    /// Resume a PAUSED instance.
    ///
    /// The current step's clock is shifted forward by the paused
    /// duration, so time spent paused never counts against the SLA.
    pub fn resume(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
    ) -> WorkflowResult<WorkflowInstance> {
        self.retry_conflicts("resume", || self.try_resume(org_id, instance_id, principal))
    }

    fn try_resume(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
    ) -> WorkflowResult<WorkflowInstance> {
        let instance = self.instances.get(org_id, instance_id)?;
        if instance.status != InstanceStatus::Paused {
            return Err(WorkflowError::invalid_state("resume", instance.status));
        }
        let template = self.templates.get(org_id, &instance.template_id)?;

        let now = Utc::now();
        let mut updated = instance.clone();
        if let Some(paused_at) = updated.paused_at.take() {
            let paused_for = now.signed_duration_since(paused_at);
            let stage = updated.current_stage.clone();
            if let Some(step) = updated.step_states.get_mut(&stage) {
                step.entered_at += paused_for;
            }
        }
        updated.status = InstanceStatus::Active;
        updated.updated_at = now;
        let sla_days = template.stage(&updated.current_stage).and_then(|s| s.sla_days);
        updated.recompute_sla(sla_days, self.config.sla_warning_days, now);

        let saved = self.instances.compare_and_update(instance.revision, updated)?;
        tracing::info!(instance = %saved.id, actor = %principal.id, "Instance resumed");
        self.events.emit(WorkflowEvent::new(
            saved.id.clone(),
            WorkflowEventKind::Resumed,
            &principal.id,
        ));
        Ok(saved)
    }

    /// Edges the principal could take from the instance's current stage.
    ///
    /// Structural and role checks only; gates are not evaluated, since
    /// the evidence they need arrives with the actual transition request.
    pub fn allowed_transitions(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
        principal: &Principal,
    ) -> WorkflowResult<Vec<Transition>> {
        let instance = self.instances.get(org_id, instance_id)?;
        if !instance.is_active() {
            return Ok(Vec::new());
        }
        let template = self.templates.get(org_id, &instance.template_id)?;
        Ok(template
            .outgoing(&instance.current_stage)
            .into_iter()
            .filter(|t| t.permits_roles(&principal.roles))
            .cloned()
            .collect())
    }

    /// Recompute an instance's SLA standing against the wall clock.
    ///
    /// Terminal instances are returned untouched. The refreshed standing
    /// is persisted only when it changed.
    pub fn refresh_sla(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
    ) -> WorkflowResult<WorkflowInstance> {
        self.retry_conflicts("refresh_sla", || self.try_refresh_sla(org_id, instance_id))
    }

    fn try_refresh_sla(
        &self,
        org_id: &OrgId,
        instance_id: &InstanceId,
    ) -> WorkflowResult<WorkflowInstance> {
        let instance = self.instances.get(org_id, instance_id)?;
        if instance.is_terminal() {
            return Ok(instance);
        }
        let template = self.templates.get(org_id, &instance.template_id)?;

        let mut updated = instance.clone();
        let sla_days = template.stage(&updated.current_stage).and_then(|s| s.sla_days);
        updated.recompute_sla(sla_days, self.config.sla_warning_days, Utc::now());
        if updated.sla_status == instance.sla_status && updated.due_date == instance.due_date {
            return Ok(instance);
        }
        updated.updated_at = Utc::now();
        self.instances.compare_and_update(instance.revision, updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_types::{Gate, SlaStatus, Stage, TemplateDefinition};
    use chrono::Duration;
    use serde_json::json;

    fn org() -> OrgId {
        OrgId::new("org-1")
    }

    fn analyst() -> Principal {
        Principal::new("alice").with_role("ANALYST")
    }

    fn setup() -> (Arc<TemplateStore>, Arc<InstanceStore>, LifecycleManager) {
        let templates = Arc::new(TemplateStore::new());
        let instances = Arc::new(InstanceStore::new());
        let manager = LifecycleManager::new(templates.clone(), instances.clone());
        (templates, instances, manager)
    }

    fn publish(templates: &TemplateStore, definition: TemplateDefinition) -> TemplateId {
        let draft = templates.create(&org(), definition).unwrap();
        templates.publish(&org(), &draft.id).unwrap().id
    }

    fn simple_pipeline(templates: &TemplateStore) -> TemplateId {
        publish(
            templates,
            TemplateDefinition::new("Case Pipeline", EntityType::Case, "new")
                .with_stage(Stage::new("new", "New").with_sla_days(3))
                .with_stage(Stage::new("review", "Review").with_sla_days(5))
                .with_stage(Stage::new("closed", "Closed").terminal())
                .with_transition(Transition::new("new", "review"))
                .with_transition(Transition::new("review", "closed"))
                .as_default(),
        )
    }

    fn start(manager: &LifecycleManager, entity: &str) -> WorkflowInstance {
        manager
            .start_workflow(
                &org(),
                EntityType::Case,
                EntityId::new(entity),
                None,
                &analyst(),
            )
            .unwrap()
    }

    #[test]
    fn test_start_resolves_default_template() {
        let (templates, _, manager) = setup();
        let template_id = simple_pipeline(&templates);

        let instance = start(&manager, "CASE-1");
        assert_eq!(instance.template_id, template_id);
        assert_eq!(instance.template_version, 1);
        assert_eq!(instance.current_stage, StageId::new("new"));
        assert_eq!(instance.status, InstanceStatus::Active);
        assert!(instance.due_date.is_some());
    }

    #[test]
    fn test_start_without_default_fails() {
        let (_, _, manager) = setup();
        let err = manager
            .start_workflow(
                &org(),
                EntityType::Case,
                EntityId::new("CASE-1"),
                None,
                &analyst(),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NoDefaultTemplate(_)));
    }

    #[test]
    fn test_start_rejects_inactive_template() {
        let (templates, _, manager) = setup();
        let draft = templates
            .create(
                &org(),
                TemplateDefinition::new("Draft", EntityType::Case, "new")
                    .with_stage(Stage::new("new", "New")),
            )
            .unwrap();

        let err = manager
            .start_workflow(
                &org(),
                EntityType::Case,
                EntityId::new("CASE-1"),
                Some(&draft.id),
                &analyst(),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_transition_happy_path() {
        let (templates, _, manager) = setup();
        simple_pipeline(&templates);
        let instance = start(&manager, "CASE-1");

        let moved = manager
            .transition(
                &org(),
                &instance.id,
                &TransitionRequest::new("review", analyst()),
            )
            .unwrap();
        assert_eq!(moved.current_stage, StageId::new("review"));
        assert_eq!(moved.revision, instance.revision + 1);

        let prior = moved.step_states.get(&StageId::new("new")).unwrap();
        assert_eq!(prior.completed_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_transition_rejects_undeclared_edge() {
        let (templates, _, manager) = setup();
        simple_pipeline(&templates);
        let instance = start(&manager, "CASE-1");

        let err = manager
            .transition(
                &org(),
                &instance.id,
                &TransitionRequest::new("closed", analyst()),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition(_)));
    }

    #[test]
    fn test_entry_gates_block_until_satisfied() {
        let (templates, _, manager) = setup();
        publish(
            &templates,
            TemplateDefinition::new("Gated", EntityType::Case, "new")
                .with_stage(Stage::new("new", "New"))
                .with_stage(
                    Stage::new("review", "Review")
                        .with_entry_gate(Gate::required_fields(["severity"])),
                )
                .with_transition(Transition::new("new", "review"))
                .as_default(),
        );
        let instance = start(&manager, "CASE-1");

        let err = manager
            .transition(
                &org(),
                &instance.id,
                &TransitionRequest::new("review", analyst()),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::GateFailed { .. }));

        // Failed attempt left the instance untouched
        let unchanged = manager
            .allowed_transitions(&org(), &instance.id, &analyst())
            .unwrap();
        assert_eq!(unchanged.len(), 1);

        let request = TransitionRequest::new("review", analyst())
            .with_entity(EntitySnapshot::new().with_field("severity", json!("high")));
        assert!(manager.transition(&org(), &instance.id, &request).is_ok());
    }

    #[test]
    fn test_complete_and_terminal_guards() {
        let (templates, _, manager) = setup();
        simple_pipeline(&templates);
        let instance = start(&manager, "CASE-1");

        let done = manager
            .complete(&org(), &instance.id, &analyst(), Some("resolved".into()))
            .unwrap();
        assert_eq!(done.status, InstanceStatus::Completed);
        assert_eq!(done.outcome.as_deref(), Some("resolved"));
        assert!(done.completed_at.is_some());

        // Every mutating operation rejects a terminal instance
        assert!(matches!(
            manager.complete(&org(), &instance.id, &analyst(), None),
            Err(WorkflowError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.cancel(&org(), &instance.id, &analyst(), None),
            Err(WorkflowError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.pause(&org(), &instance.id, &analyst()),
            Err(WorkflowError::InvalidState { .. })
        ));
        assert!(manager
            .allowed_transitions(&org(), &instance.id, &analyst())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_cancel_records_reason() {
        let (templates, _, manager) = setup();
        simple_pipeline(&templates);
        let instance = start(&manager, "CASE-1");

        let cancelled = manager
            .cancel(&org(), &instance.id, &analyst(), Some("duplicate filing"))
            .unwrap();
        assert_eq!(cancelled.status, InstanceStatus::Cancelled);
        assert_eq!(
            cancelled.outcome.as_deref(),
            Some("cancelled: duplicate filing")
        );
    }

    #[test]
    fn test_pause_blocks_transitions_until_resume() {
        let (templates, _, manager) = setup();
        simple_pipeline(&templates);
        let instance = start(&manager, "CASE-1");

        let paused = manager.pause(&org(), &instance.id, &analyst()).unwrap();
        assert_eq!(paused.status, InstanceStatus::Paused);
        assert!(paused.paused_at.is_some());

        assert!(matches!(
            manager.transition(
                &org(),
                &instance.id,
                &TransitionRequest::new("review", analyst()),
            ),
            Err(WorkflowError::InvalidState { .. })
        ));
        // Double pause rejected; cancel from paused allowed elsewhere
        assert!(matches!(
            manager.pause(&org(), &instance.id, &analyst()),
            Err(WorkflowError::InvalidState { .. })
        ));

        let resumed = manager.resume(&org(), &instance.id, &analyst()).unwrap();
        assert_eq!(resumed.status, InstanceStatus::Active);
        assert!(resumed.paused_at.is_none());
        assert!(manager
            .transition(
                &org(),
                &instance.id,
                &TransitionRequest::new("review", analyst()),
            )
            .is_ok());
    }

    #[test]
    fn test_resume_extends_step_clock() {
        let (templates, instances, manager) = setup();
        simple_pipeline(&templates);
        let instance = start(&manager, "CASE-1");
        let entered = instance.current_stage_entered_at();

        // Simulate a pause that started two days ago
        let mut paused = instances.get(&org(), &instance.id).unwrap();
        paused.status = InstanceStatus::Paused;
        paused.paused_at = Some(Utc::now() - Duration::days(2));
        instances
            .compare_and_update(paused.revision, paused)
            .unwrap();

        let resumed = manager.resume(&org(), &instance.id, &analyst()).unwrap();
        let shifted = resumed.current_stage_entered_at();
        assert!(shifted >= entered + Duration::days(2) - Duration::seconds(5));
        // Due date moved with the step clock
        assert!(resumed.due_date.unwrap() >= entered + Duration::days(3 + 2) - Duration::seconds(5));
    }

    #[test]
    fn test_allowed_transitions_filters_by_role() {
        let (templates, _, manager) = setup();
        publish(
            &templates,
            TemplateDefinition::new("Restricted", EntityType::Case, "new")
                .with_stage(Stage::new("new", "New"))
                .with_stage(Stage::new("review", "Review"))
                .with_stage(Stage::new("closed", "Closed").terminal())
                .with_transition(Transition::new("new", "review"))
                .with_transition(
                    Transition::new("new", "closed").with_allowed_role("COMPLIANCE_OFFICER"),
                )
                .as_default(),
        );
        let instance = start(&manager, "CASE-1");

        let for_analyst = manager
            .allowed_transitions(&org(), &instance.id, &analyst())
            .unwrap();
        assert_eq!(for_analyst.len(), 1);
        assert_eq!(for_analyst[0].to, StageId::new("review"));

        let officer = Principal::new("carol").with_role("COMPLIANCE_OFFICER");
        assert_eq!(
            manager
                .allowed_transitions(&org(), &instance.id, &officer)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_refresh_sla_flags_overdue() {
        let (templates, instances, manager) = setup();
        simple_pipeline(&templates);
        let instance = start(&manager, "CASE-1");
        assert_eq!(instance.sla_status, SlaStatus::OnTrack);

        // Backdate the current step past its 3-day budget
        let mut stale = instances.get(&org(), &instance.id).unwrap();
        let stage = stale.current_stage.clone();
        if let Some(step) = stale.step_states.get_mut(&stage) {
            step.entered_at = Utc::now() - Duration::days(10);
        }
        instances.compare_and_update(stale.revision, stale).unwrap();

        let refreshed = manager.refresh_sla(&org(), &instance.id).unwrap();
        assert_eq!(refreshed.sla_status, SlaStatus::Overdue);
    }

    #[test]
    fn test_duplicate_instance_rejected() {
        let (templates, _, manager) = setup();
        simple_pipeline(&templates);
        start(&manager, "CASE-1");

        let err = manager
            .start_workflow(
                &org(),
                EntityType::Case,
                EntityId::new("CASE-1"),
                None,
                &analyst(),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateInstance { .. }));
    }
}
