//! Permanent history of application stage moves.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::application::ApplicationStatus;
use crate::audit::{self, AuditRecord};
use crate::calendar;
use crate::engine::{WorkflowError, WorkflowState};
use crate::ids::{ApplicationId, EntityKind, EntityRef, OrganizationId, StageTransitionId, UserId};
use crate::records::{ImmutableRecord, WriteOnceTable};
use crate::store::{Logged, Tables, UnitOfWork};

/// One stage move. Constructed only by [`record`]; exposes no setters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTransition {
    id: StageTransitionId,
    organization_id: OrganizationId,
    application_id: ApplicationId,
    from_stage: Option<ApplicationStatus>,
    to_stage: ApplicationStatus,
    moved_by: Option<UserId>,
    duration_hours: Option<i64>,
    created_at: DateTime<Utc>,
}

impl StageTransition {
    pub fn id(&self) -> StageTransitionId {
        self.id
    }

    pub fn application_id(&self) -> ApplicationId {
        self.application_id
    }

    /// `None` for the transition that created the application.
    pub fn from_stage(&self) -> Option<ApplicationStatus> {
        self.from_stage
    }

    pub fn to_stage(&self) -> ApplicationStatus {
        self.to_stage
    }

    /// `None` when the move was made by the system.
    pub fn moved_by(&self) -> Option<UserId> {
        self.moved_by
    }

    /// Whole hours spent in `from_stage`, when an earlier move into it exists.
    pub fn duration_hours(&self) -> Option<i64> {
        self.duration_hours
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl ImmutableRecord for StageTransition {
    type Id = StageTransitionId;
    const RECORD: &'static str = "stage_transition";

    fn record_id(&self) -> StageTransitionId {
        self.id
    }

    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

impl Logged for StageTransition {
    fn log(tables: &Tables) -> &WriteOnceTable<Self> {
        &tables.stage_transitions
    }

    fn log_mut(tables: &mut Tables) -> &mut WriteOnceTable<Self> {
        &mut tables.stage_transitions
    }
}

/// Append a stage move and its required audit entry.
pub(crate) fn record(
    uow: &mut UnitOfWork<'_>,
    application_id: ApplicationId,
    from_stage: Option<ApplicationStatus>,
    to_stage: ApplicationStatus,
) -> Result<StageTransitionId, WorkflowError> {
    if from_stage == Some(to_stage) {
        return Err(WorkflowError::invalid(
            "to_stage",
            format!("must differ from from_stage ({to_stage})"),
        ));
    }

    let now = uow.now();
    let duration_hours = from_stage.and_then(|from| {
        history(uow, application_id)
            .into_iter()
            .rev()
            .find(|transition| transition.to_stage == from)
            .map(|entered| calendar::elapsed_hours(entered.created_at, now))
    });

    let transition = StageTransition {
        id: StageTransitionId::new(),
        organization_id: uow.ctx().organization_id(),
        application_id,
        from_stage,
        to_stage,
        moved_by: uow.ctx().actor_id(),
        duration_hours,
        created_at: now,
    };
    let id = transition.id;
    uow.append(transition)?;

    let mut entry = AuditRecord::new(
        "stage_transition.created",
        EntityRef::new(EntityKind::StageTransition, id),
    )
    .with_metadata("application_id", application_id.to_string())
    .with_change(
        "stage",
        from_stage.map(WorkflowState::label),
        to_stage.label(),
    );
    if let Some(hours) = duration_hours {
        entry = entry.with_metadata("duration_hours", hours);
    }
    audit::record_required(uow, entry);
    Ok(id)
}

/// Every stage move for an application, oldest first.
pub fn history<'u>(uow: &'u UnitOfWork<'_>, application_id: ApplicationId) -> Vec<&'u StageTransition> {
    uow.records::<StageTransition>()
        .into_iter()
        .filter(|transition| transition.application_id == application_id)
        .collect()
}
