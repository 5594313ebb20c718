//! Candidate application pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;
use super::orchestrator;
use super::stage_transition;
use crate::audit::{self, AuditRecord};
use crate::engine::{
    fire_with, workflow_states, EventDefinition, Hook, MachineDefinition, StatusToken,
    Transition, WorkflowEntity, WorkflowError,
};
use crate::ids::{ApplicationId, CandidateId, EntityKind, EntityRef, JobId, OrganizationId};
use crate::store::{stored_entity, Stored, UnitOfWork};

workflow_states! {
    pub enum ApplicationStatus {
        New => "new",
        Screening => "screening",
        Interviewing => "interviewing",
        Assessment => "assessment",
        BackgroundCheck => "background_check",
        Offered => "offered",
        Hired => "hired",
        Rejected => "rejected",
        Withdrawn => "withdrawn",
    }
}

impl ApplicationStatus {
    pub const ACTIVE: &'static [Self] = &[
        Self::New,
        Self::Screening,
        Self::Interviewing,
        Self::Assessment,
        Self::BackgroundCheck,
        Self::Offered,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Application {
    pub id: ApplicationId,
    pub organization_id: OrganizationId,
    pub job_id: JobId,
    pub candidate_id: CandidateId,
    status: ApplicationStatus,
    pub source: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub hired_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub withdrawal_reason: Option<String>,
}

impl Application {
    pub fn status(&self) -> ApplicationStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

stored_entity!(Application, ApplicationId, EntityKind::Application, applications);

impl WorkflowEntity for Application {
    type State = ApplicationStatus;

    fn status(&self) -> ApplicationStatus {
        self.status
    }

    fn set_status(&mut self, status: ApplicationStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &APPLICATION_MACHINE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewApplication {
    pub job_id: JobId,
    pub candidate_id: CandidateId,
    #[serde(default)]
    pub source: Option<String>,
}

use ApplicationStatus::{
    Assessment, BackgroundCheck, Hired, Interviewing, New, Offered, Rejected, Screening,
    Withdrawn,
};

const STAGE: Hook<Application> = Hook {
    name: "record_stage_transition",
    run: record_stage_transition,
};

const STAGE_ONLY: &[Hook<Application>] = &[STAGE];

pub static APPLICATION_MACHINE: MachineDefinition<Application> = MachineDefinition {
    name: "application",
    initial: New,
    events: &[
        EventDefinition {
            name: "advance_to_screening",
            from: &[New],
            to: Screening,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "advance_to_interviewing",
            from: &[New, Screening],
            to: Interviewing,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "advance_to_assessment",
            from: &[Screening, Interviewing],
            to: Assessment,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "advance_to_background_check",
            from: &[Interviewing, Assessment],
            to: BackgroundCheck,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "advance_to_offer",
            from: &[Interviewing, Assessment, BackgroundCheck],
            to: Offered,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "hire",
            from: &[Offered],
            to: Hired,
            guard: None,
            then: None,
            hooks: &[
                STAGE,
                Hook {
                    name: "stamp_hired_at",
                    run: stamp_hired_at,
                },
                orchestrator::INCREMENT_JOB_FILLED_COUNT,
            ],
        },
        EventDefinition {
            name: "reject",
            from: ApplicationStatus::ACTIVE,
            to: Rejected,
            guard: None,
            then: None,
            hooks: &[
                STAGE,
                Hook {
                    name: "stamp_rejected_at",
                    run: stamp_rejected_at,
                },
            ],
        },
        EventDefinition {
            name: "withdraw",
            from: ApplicationStatus::ACTIVE,
            to: Withdrawn,
            guard: None,
            then: None,
            hooks: &[
                STAGE,
                Hook {
                    name: "stamp_withdrawn_at",
                    run: stamp_withdrawn_at,
                },
            ],
        },
        EventDefinition {
            name: "move_back_to_new",
            from: &[Screening, Interviewing],
            to: New,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "move_back_to_screening",
            from: &[Interviewing, Assessment],
            to: Screening,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "move_back_to_interviewing",
            from: &[Assessment, BackgroundCheck, Offered],
            to: Interviewing,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "move_back_to_assessment",
            from: &[BackgroundCheck, Offered],
            to: Assessment,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
        EventDefinition {
            name: "move_back_to_background_check",
            from: &[Offered],
            to: BackgroundCheck,
            guard: None,
            then: None,
            hooks: STAGE_ONLY,
        },
    ],
};

/// Create an application against an open job and record its initial stage.
pub fn create(
    uow: &mut UnitOfWork<'_>,
    new: NewApplication,
) -> Result<Application, WorkflowError> {
    let job = uow.get::<Job>(new.job_id)?;
    if !job.is_open() {
        return Err(WorkflowError::GuardFailed {
            entity: job.entity_ref(),
            event: "apply",
            reason: format!("job is {}, not open", job.status()),
        });
    }

    let duplicate = uow.scan::<Application>().into_iter().any(|existing| {
        existing.job_id == new.job_id && existing.candidate_id == new.candidate_id
    });
    if duplicate {
        return Err(WorkflowError::UniquenessViolation(format!(
            "candidate {} already applied to job {}",
            new.candidate_id, new.job_id
        )));
    }

    let application = Application {
        id: ApplicationId::new(),
        organization_id: uow.ctx().organization_id(),
        job_id: new.job_id,
        candidate_id: new.candidate_id,
        status: APPLICATION_MACHINE.initial,
        source: new.source,
        applied_at: uow.now(),
        hired_at: None,
        rejected_at: None,
        rejection_reason: None,
        withdrawn_at: None,
        withdrawal_reason: None,
    };
    uow.insert(application.clone())?;
    stage_transition::record(uow, application.id, None, application.status)?;

    audit::record(
        uow,
        AuditRecord::new(
            "application.created",
            EntityRef::new(EntityKind::Application, application.id),
        )
        .with_metadata("job_id", application.job_id.to_string())
        .with_metadata("candidate_id", application.candidate_id.to_string()),
    );
    Ok(application)
}

pub fn reject(
    uow: &mut UnitOfWork<'_>,
    id: ApplicationId,
    reason: Option<String>,
) -> Result<ApplicationStatus, WorkflowError> {
    fire_with::<Application, _>(uow, id, "reject", |application| {
        application.rejection_reason = reason;
        Ok(())
    })
}

pub fn withdraw(
    uow: &mut UnitOfWork<'_>,
    id: ApplicationId,
    reason: Option<String>,
) -> Result<ApplicationStatus, WorkflowError> {
    fire_with::<Application, _>(uow, id, "withdraw", |application| {
        application.withdrawal_reason = reason;
        Ok(())
    })
}

fn record_stage_transition(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Application>,
) -> Result<(), WorkflowError> {
    stage_transition::record(uow, transition.id, Some(transition.from), transition.to)?;
    Ok(())
}

fn stamp_hired_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Application>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Application, _>(transition.id, |application| {
        application.hired_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_rejected_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Application>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Application, _>(transition.id, |application| {
        application.rejected_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_withdrawn_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Application>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Application, _>(transition.id, |application| {
        application.withdrawn_at = Some(now);
        Ok(())
    })?;
    Ok(())
}
