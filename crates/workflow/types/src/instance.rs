//! Workflow instances: running executions pinned to a template version
//!
//! An instance snapshots `(template_id, template_version)` at start and
//! never upgrades — later template edits fork a new version and leave
//! in-flight work untouched. Step states are append-only history:
//! completed entries are never rewritten when the instance moves on.

use crate::{EntityId, EntityType, InstanceId, OrgId, StageId, TemplateId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The lifecycle status of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Actively moving through the pipeline
    Active,
    /// Frozen; only resume or cancel are permitted
    Paused,
    /// Finished successfully (terminal)
    Completed,
    /// Abandoned (terminal)
    Cancelled,
}

impl InstanceStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// SLA standing of an instance, derived from its due date
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaStatus {
    OnTrack,
    Warning,
    Overdue,
}

/// Execution status of one step in the history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// The instance is currently in this stage
    InProgress,
    /// The instance has moved past this stage
    Completed,
}

/// Per-stage execution record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    /// When the instance entered this stage
    pub entered_at: DateTime<Utc>,
    /// When the instance left this stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Who moved the instance out of this stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
}

/// A running execution of a workflow template
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance identifier
    pub id: InstanceId,
    /// Owning organization
    pub org_id: OrgId,
    /// The template version row this instance runs against
    pub template_id: TemplateId,
    /// Snapshotted version number, never upgraded
    pub template_version: u32,
    /// Kind of governed entity
    pub entity_type: EntityType,
    /// The governed entity; a weak reference, never validated here
    pub entity_id: EntityId,
    /// The stage the instance currently sits in
    pub current_stage: StageId,
    /// Lifecycle status
    pub status: InstanceStatus,
    /// Append-only per-stage history
    pub step_states: HashMap<StageId, StepState>,
    /// When the instance was started
    pub started_at: DateTime<Utc>,
    /// SLA deadline for the current stage, if it has an SLA budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Derived SLA standing, recomputed on read and transition
    pub sla_status: SlaStatus,
    /// Free-form result recorded at completion or cancellation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set while paused; the SLA clock is frozen at this point
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency counter
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a new active instance at the given initial stage
    pub fn start(
        org_id: OrgId,
        template_id: TemplateId,
        template_version: u32,
        entity_type: EntityType,
        entity_id: EntityId,
        initial_stage: StageId,
    ) -> Self {
        let now = Utc::now();
        let mut step_states = HashMap::new();
        step_states.insert(
            initial_stage.clone(),
            StepState {
                status: StepStatus::InProgress,
                entered_at: now,
                completed_at: None,
                completed_by: None,
            },
        );
        Self {
            id: InstanceId::generate(),
            org_id,
            template_id,
            template_version,
            entity_type,
            entity_id,
            current_stage: initial_stage,
            status: InstanceStatus::Active,
            step_states,
            started_at: now,
            due_date: None,
            sla_status: SlaStatus::OnTrack,
            outcome: None,
            completed_at: None,
            paused_at: None,
            revision: 0,
            updated_at: now,
        }
    }

    /// Check if the instance is in a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the instance is actively executing
    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    /// When the instance entered its current stage
    pub fn current_stage_entered_at(&self) -> DateTime<Utc> {
        self.step_states
            .get(&self.current_stage)
            .map(|s| s.entered_at)
            .unwrap_or(self.started_at)
    }

    /// Close the current step and record who moved the instance on
    pub fn close_current_step(&mut self, completed_by: impl Into<String>, now: DateTime<Utc>) {
        if let Some(step) = self.step_states.get_mut(&self.current_stage) {
            step.status = StepStatus::Completed;
            step.completed_at = Some(now);
            step.completed_by = Some(completed_by.into());
        }
        self.updated_at = now;
    }

    /// Enter a new stage, opening its step record
    pub fn enter_stage(&mut self, stage: StageId, now: DateTime<Utc>) {
        self.step_states.insert(
            stage.clone(),
            StepState {
                status: StepStatus::InProgress,
                entered_at: now,
                completed_at: None,
                completed_by: None,
            },
        );
        self.current_stage = stage;
        self.updated_at = now;
    }

    /// Recompute the due date and SLA standing for the current stage.
    ///
    /// While paused the clock is frozen: elapsed time is measured up to
    /// `paused_at` rather than `now`.
    pub fn recompute_sla(&mut self, sla_days: Option<u32>, warning_days: i64, now: DateTime<Utc>) {
        let Some(days) = sla_days else {
            self.due_date = None;
            self.sla_status = SlaStatus::OnTrack;
            return;
        };

        let due = self.current_stage_entered_at() + Duration::days(days as i64);
        self.due_date = Some(due);

        let effective_now = self.paused_at.unwrap_or(now);
        self.sla_status = if effective_now >= due {
            SlaStatus::Overdue
        } else if effective_now + Duration::days(warning_days) >= due {
            SlaStatus::Warning
        } else {
            SlaStatus::OnTrack
        };
    }
}
