//! Interview scheduling and lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::application::Application;
use crate::audit::{self, AuditRecord};
use crate::engine::{
    fire_with, workflow_states, EventDefinition, Hook, MachineDefinition, StatusToken,
    Transition, WorkflowEntity, WorkflowError,
};
use crate::ids::{ApplicationId, EntityKind, EntityRef, InterviewId, OrganizationId, UserId};
use crate::store::{stored_entity, Stored, UnitOfWork};

workflow_states! {
    pub enum InterviewStatus {
        Scheduled => "scheduled",
        Confirmed => "confirmed",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

impl InterviewStatus {
    /// States that still occupy the calendar slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Scheduled | Self::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub user_id: UserId,
    pub feedback_submitted: bool,
    pub feedback_submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interview {
    pub id: InterviewId,
    pub organization_id: OrganizationId,
    pub application_id: ApplicationId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub location: Option<String>,
    pub participants: Vec<Participant>,
    status: InterviewStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl Interview {
    pub fn status(&self) -> InterviewStatus {
        self.status
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.scheduled_at < end && start < self.ends_at()
    }

    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| participant.user_id == user_id)
    }

    pub fn pending_feedback(&self) -> Vec<UserId> {
        self.participants
            .iter()
            .filter(|participant| !participant.feedback_submitted)
            .map(|participant| participant.user_id)
            .collect()
    }
}

stored_entity!(Interview, InterviewId, EntityKind::Interview, interviews);

impl WorkflowEntity for Interview {
    type State = InterviewStatus;

    fn status(&self) -> InterviewStatus {
        self.status
    }

    fn set_status(&mut self, status: InterviewStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &INTERVIEW_MACHINE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInterview {
    pub application_id: ApplicationId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub location: Option<String>,
    pub interviewers: Vec<UserId>,
}

use InterviewStatus::{Cancelled, Completed, Confirmed, NoShow, Scheduled};

pub static INTERVIEW_MACHINE: MachineDefinition<Interview> = MachineDefinition {
    name: "interview",
    initial: Scheduled,
    events: &[
        EventDefinition {
            name: "confirm",
            from: &[Scheduled],
            to: Confirmed,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_confirmed_at",
                run: stamp_confirmed_at,
            }],
        },
        EventDefinition {
            name: "complete",
            from: &[Scheduled, Confirmed],
            to: Completed,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_completed_at",
                    run: stamp_completed_at,
                },
                Hook {
                    name: "request_feedback",
                    run: request_feedback,
                },
            ],
        },
        EventDefinition {
            name: "cancel",
            from: &[Scheduled, Confirmed],
            to: Cancelled,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_cancelled_at",
                run: stamp_cancelled_at,
            }],
        },
        EventDefinition {
            name: "mark_no_show",
            from: &[Scheduled, Confirmed],
            to: NoShow,
            guard: None,
            then: None,
            hooks: &[],
        },
    ],
};

/// Schedule an interview. The slot must be in the future, the application active,
/// and no other scheduled or confirmed interview for it may overlap.
pub fn schedule(uow: &mut UnitOfWork<'_>, new: NewInterview) -> Result<Interview, WorkflowError> {
    if new.duration_minutes == 0 {
        return Err(WorkflowError::invalid("duration_minutes", "must be positive"));
    }
    if new.interviewers.is_empty() {
        return Err(WorkflowError::invalid(
            "interviewers",
            "at least one interviewer is required",
        ));
    }

    let application = uow.get::<Application>(new.application_id)?;
    let blocked = |reason: String| WorkflowError::GuardFailed {
        entity: application.entity_ref(),
        event: "schedule_interview",
        reason,
    };

    if new.scheduled_at <= uow.now() {
        return Err(blocked("scheduled time must be in the future".to_string()));
    }
    if !application.is_active() {
        return Err(blocked(format!(
            "application is {}, not active",
            application.status()
        )));
    }

    let end = new.scheduled_at + Duration::minutes(i64::from(new.duration_minutes));
    let conflict = uow.scan::<Interview>().into_iter().find(|existing| {
        existing.application_id == new.application_id
            && existing.status.is_active()
            && existing.overlaps(new.scheduled_at, end)
    });
    if let Some(existing) = conflict {
        return Err(blocked(format!(
            "overlaps interview {} at {}",
            existing.id,
            existing.scheduled_at.to_rfc3339()
        )));
    }

    let mut participants: Vec<Participant> = Vec::with_capacity(new.interviewers.len());
    for user_id in new.interviewers {
        if participants.iter().all(|participant| participant.user_id != user_id) {
            participants.push(Participant {
                user_id,
                feedback_submitted: false,
                feedback_submitted_at: None,
            });
        }
    }

    let interview = Interview {
        id: InterviewId::new(),
        organization_id: uow.ctx().organization_id(),
        application_id: new.application_id,
        scheduled_at: new.scheduled_at,
        duration_minutes: new.duration_minutes,
        location: new.location,
        participants,
        status: INTERVIEW_MACHINE.initial,
        confirmed_at: None,
        completed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
    };
    uow.insert(interview.clone())?;

    audit::record(
        uow,
        AuditRecord::new(
            "interview.scheduled",
            EntityRef::new(EntityKind::Interview, interview.id),
        )
        .with_metadata("application_id", interview.application_id.to_string())
        .with_metadata("scheduled_at", interview.scheduled_at.to_rfc3339()),
    );
    uow.emit(
        interview.entity_ref(),
        "interview.scheduled".to_string(),
        json!({ "application_id": interview.application_id, "scheduled_at": interview.scheduled_at }),
    );
    Ok(interview)
}

pub fn cancel(
    uow: &mut UnitOfWork<'_>,
    id: InterviewId,
    reason: Option<String>,
) -> Result<InterviewStatus, WorkflowError> {
    fire_with::<Interview, _>(uow, id, "cancel", |interview| {
        interview.cancellation_reason = reason;
        Ok(())
    })
}

/// Mark one participant's feedback as given. Used when their scorecard is submitted.
pub(crate) fn mark_feedback_submitted(
    uow: &mut UnitOfWork<'_>,
    id: InterviewId,
    user_id: UserId,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Interview, _>(id, |interview| {
        let participant = interview
            .participants
            .iter_mut()
            .find(|participant| participant.user_id == user_id)
            .ok_or_else(|| {
                WorkflowError::invalid(
                    "participant",
                    format!("{user_id} is not on interview {id}"),
                )
            })?;
        if !participant.feedback_submitted {
            participant.feedback_submitted = true;
            participant.feedback_submitted_at = Some(now);
        }
        Ok(())
    })?;
    Ok(())
}

fn stamp_confirmed_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Interview>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Interview, _>(transition.id, |interview| {
        interview.confirmed_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_completed_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Interview>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Interview, _>(transition.id, |interview| {
        interview.completed_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_cancelled_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Interview>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Interview, _>(transition.id, |interview| {
        interview.cancelled_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn request_feedback(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Interview>,
) -> Result<(), WorkflowError> {
    let pending = uow.get::<Interview>(transition.id)?.pending_feedback();
    for user_id in pending {
        uow.notify(
            "interview.feedback_requested",
            transition.subject,
            json!({ "interviewer_id": user_id }),
        );
    }
    Ok(())
}
