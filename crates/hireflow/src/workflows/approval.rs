//! Sequential approval records for job requisitions and offers.
//!
//! Each submission of a parent opens a numbered round. An approval responds once;
//! the orchestrator resolves the parent after every response in the current round.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::orchestrator;
use crate::audit::{self, AuditRecord};
use crate::engine::{
    fire_with, workflow_states, EventDefinition, Guard, Hook, MachineDefinition, StatusToken,
    Transition, WorkflowEntity, WorkflowError,
};
use crate::ids::{ApprovalId, EntityKind, EntityRef, JobId, OfferId, OrganizationId, UserId};
use crate::store::{stored_entity, UnitOfWork};

workflow_states! {
    pub enum ApprovalStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ApprovalParent {
    Job(JobId),
    Offer(OfferId),
}

impl ApprovalParent {
    pub fn entity_ref(self) -> EntityRef {
        match self {
            Self::Job(id) => EntityRef::new(EntityKind::Job, id),
            Self::Offer(id) => EntityRef::new(EntityKind::Offer, id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub organization_id: OrganizationId,
    pub parent: ApprovalParent,
    pub round: u32,
    pub sequence: u32,
    pub approver_id: UserId,
    status: ApprovalStatus,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Approval {
    pub fn status(&self) -> ApprovalStatus {
        self.status
    }
}

stored_entity!(Approval, ApprovalId, EntityKind::Approval, approvals);

impl WorkflowEntity for Approval {
    type State = ApprovalStatus;

    fn status(&self) -> ApprovalStatus {
        self.status
    }

    fn set_status(&mut self, status: ApprovalStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &APPROVAL_MACHINE
    }
}

const ASSIGNED_APPROVER: Guard<Approval> = Guard {
    name: "assigned_approver",
    check: assigned_approver,
};

const RESPONSE_HOOKS: &[Hook<Approval>] = &[
    Hook {
        name: "stamp_responded_at",
        run: stamp_responded_at,
    },
    orchestrator::RESOLVE_APPROVAL_PARENT,
];

pub static APPROVAL_MACHINE: MachineDefinition<Approval> = MachineDefinition {
    name: "approval",
    initial: ApprovalStatus::Pending,
    events: &[
        EventDefinition {
            name: "approve",
            from: &[ApprovalStatus::Pending],
            to: ApprovalStatus::Approved,
            guard: Some(ASSIGNED_APPROVER),
            then: None,
            hooks: RESPONSE_HOOKS,
        },
        EventDefinition {
            name: "reject",
            from: &[ApprovalStatus::Pending],
            to: ApprovalStatus::Rejected,
            guard: Some(ASSIGNED_APPROVER),
            then: None,
            hooks: RESPONSE_HOOKS,
        },
    ],
};

/// Create one pending approval per approver, sequenced in the given order.
pub(crate) fn open_round(
    uow: &mut UnitOfWork<'_>,
    parent: ApprovalParent,
    round: u32,
    approvers: &[UserId],
) -> Result<Vec<ApprovalId>, WorkflowError> {
    let mut ids = Vec::with_capacity(approvers.len());
    for (index, approver_id) in approvers.iter().enumerate() {
        if approvers[..index].contains(approver_id) {
            return Err(WorkflowError::invalid(
                "approvers",
                format!("approver {approver_id} listed twice"),
            ));
        }
        let approval = Approval {
            id: ApprovalId::new(),
            organization_id: uow.ctx().organization_id(),
            parent,
            round,
            sequence: index as u32 + 1,
            approver_id: *approver_id,
            status: APPROVAL_MACHINE.initial,
            comments: None,
            created_at: uow.now(),
            responded_at: None,
        };
        ids.push(approval.id);
        uow.insert(approval.clone())?;
        audit::record(
            uow,
            AuditRecord::new(
                "approval.requested",
                EntityRef::new(EntityKind::Approval, approval.id),
            )
            .with_metadata("parent", parent.entity_ref().to_string())
            .with_metadata("round", round)
            .with_metadata("sequence", approval.sequence)
            .with_metadata("approver_id", approver_id.to_string()),
        );
    }
    Ok(ids)
}

pub fn approve(
    uow: &mut UnitOfWork<'_>,
    id: ApprovalId,
    comments: Option<String>,
) -> Result<ApprovalStatus, WorkflowError> {
    fire_with::<Approval, _>(uow, id, "approve", |approval| {
        approval.comments = comments;
        Ok(())
    })
}

pub fn reject(
    uow: &mut UnitOfWork<'_>,
    id: ApprovalId,
    comments: Option<String>,
) -> Result<ApprovalStatus, WorkflowError> {
    fire_with::<Approval, _>(uow, id, "reject", |approval| {
        approval.comments = comments;
        Ok(())
    })
}

/// Approvals for `parent` in `round`, by sequence.
pub fn for_round(uow: &UnitOfWork<'_>, parent: ApprovalParent, round: u32) -> Vec<Approval> {
    let mut approvals: Vec<Approval> = uow
        .scan::<Approval>()
        .into_iter()
        .filter(|approval| approval.parent == parent && approval.round == round)
        .cloned()
        .collect();
    approvals.sort_by_key(|approval| approval.sequence);
    approvals
}

fn assigned_approver(approval: &Approval, uow: &UnitOfWork<'_>) -> Result<(), String> {
    match uow.ctx().actor_id() {
        Some(actor) if actor != approval.approver_id => {
            Err("only the assigned approver may respond".to_string())
        }
        _ => Ok(()),
    }
}

fn stamp_responded_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Approval>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Approval, _>(transition.id, |approval| {
        approval.responded_at = Some(now);
        Ok(())
    })?;
    Ok(())
}
