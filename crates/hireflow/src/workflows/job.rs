//! Job requisition lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::approval::{self, ApprovalParent};
use crate::audit::{self, AuditRecord};
use crate::engine::{
    fire_with, workflow_states, EventDefinition, Hook, MachineDefinition, StatusToken,
    Transition, WorkflowEntity, WorkflowError, WorkflowState,
};
use crate::ids::{EntityKind, EntityRef, JobId, OrganizationId, UserId};
use crate::store::{stored_entity, UnitOfWork};

workflow_states! {
    pub enum JobStatus {
        Draft => "draft",
        PendingApproval => "pending_approval",
        Open => "open",
        OnHold => "on_hold",
        Closed => "closed",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub organization_id: OrganizationId,
    pub title: String,
    pub department: Option<String>,
    pub hiring_manager_id: Option<UserId>,
    pub headcount: u32,
    pub filled_count: u32,
    status: JobStatus,
    /// Incremented on every submission for approval.
    pub approval_round: u32,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == JobStatus::Open
    }
}

stored_entity!(Job, JobId, EntityKind::Job, jobs);

impl WorkflowEntity for Job {
    type State = JobStatus;

    fn status(&self) -> JobStatus {
        self.status
    }

    fn set_status(&mut self, status: JobStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &JOB_MACHINE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub title: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub hiring_manager_id: Option<UserId>,
    pub headcount: u32,
}

const STATUS_AUDIT: Hook<Job> = Hook {
    name: "audit_status_change",
    run: audit_status_change,
};

pub static JOB_MACHINE: MachineDefinition<Job> = MachineDefinition {
    name: "job",
    initial: JobStatus::Draft,
    events: &[
        EventDefinition {
            name: "submit_for_approval",
            from: &[JobStatus::Draft],
            to: JobStatus::PendingApproval,
            guard: None,
            then: None,
            hooks: &[STATUS_AUDIT],
        },
        EventDefinition {
            name: "approve",
            from: &[JobStatus::PendingApproval],
            to: JobStatus::Open,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_opened_at",
                    run: stamp_opened_at,
                },
                STATUS_AUDIT,
            ],
        },
        EventDefinition {
            name: "reject",
            from: &[JobStatus::PendingApproval],
            to: JobStatus::Draft,
            guard: None,
            then: None,
            hooks: &[STATUS_AUDIT],
        },
        EventDefinition {
            name: "reopen",
            from: &[JobStatus::OnHold, JobStatus::Closed],
            to: JobStatus::Open,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_opened_at",
                    run: stamp_opened_at,
                },
                STATUS_AUDIT,
            ],
        },
        EventDefinition {
            name: "put_on_hold",
            from: &[JobStatus::Open],
            to: JobStatus::OnHold,
            guard: None,
            then: None,
            hooks: &[STATUS_AUDIT],
        },
        EventDefinition {
            name: "close",
            from: &[JobStatus::Open, JobStatus::OnHold],
            to: JobStatus::Closed,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_closed_at",
                    run: stamp_closed_at,
                },
                STATUS_AUDIT,
            ],
        },
    ],
};

pub fn create(uow: &mut UnitOfWork<'_>, new: NewJob) -> Result<Job, WorkflowError> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(WorkflowError::invalid("title", "must not be blank"));
    }
    if new.headcount == 0 {
        return Err(WorkflowError::invalid("headcount", "must be at least 1"));
    }

    let job = Job {
        id: JobId::new(),
        organization_id: uow.ctx().organization_id(),
        title: title.to_string(),
        department: new.department,
        hiring_manager_id: new.hiring_manager_id,
        headcount: new.headcount,
        filled_count: 0,
        status: JOB_MACHINE.initial,
        approval_round: 0,
        created_at: uow.now(),
        opened_at: None,
        closed_at: None,
    };
    uow.insert(job.clone())?;

    audit::record(
        uow,
        AuditRecord::new("job.created", EntityRef::new(EntityKind::Job, job.id))
            .with_metadata("title", job.title.clone())
            .with_metadata("headcount", job.headcount),
    );
    Ok(job)
}

/// Submit the requisition and open a new approval round for `approvers`, in order.
/// With no approvers the job waits for a direct `approve`.
pub fn submit_for_approval(
    uow: &mut UnitOfWork<'_>,
    id: JobId,
    approvers: &[UserId],
) -> Result<JobStatus, WorkflowError> {
    let status = fire_with::<Job, _>(uow, id, "submit_for_approval", |job| {
        job.approval_round += 1;
        Ok(())
    })?;
    let round = uow.get::<Job>(id)?.approval_round;
    approval::open_round(uow, ApprovalParent::Job(id), round, approvers)?;
    Ok(status)
}

fn stamp_opened_at(uow: &mut UnitOfWork<'_>, transition: &Transition<Job>) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Job, _>(transition.id, |job| {
        job.opened_at.get_or_insert(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_closed_at(uow: &mut UnitOfWork<'_>, transition: &Transition<Job>) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Job, _>(transition.id, |job| {
        job.closed_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn audit_status_change(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Job>,
) -> Result<(), WorkflowError> {
    audit::record(
        uow,
        AuditRecord::new("job.status_changed", transition.subject)
            .with_metadata("event", transition.event)
            .with_change("status", transition.from.label(), transition.to.label()),
    );
    Ok(())
}
