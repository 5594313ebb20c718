//! Hiring decisions: a frozen decision record plus a mutable approval companion.
//!
//! [`HiringDecision`] never changes after creation. Approval progress lives in
//! [`DecisionApproval`], keyed by the same id and driven by its own machine, so the
//! decision fields stay immutable while the approval state moves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::application::Application;
use super::approval::ApprovalStatus;
use super::orchestrator;
use crate::audit::{self, AuditRecord};
use crate::engine::{
    fire, fire_with, EventDefinition, Hook, MachineDefinition, StatusToken, Transition,
    WorkflowEntity, WorkflowError,
};
use crate::ids::{ApplicationId, EntityKind, EntityRef, HiringDecisionId, OrganizationId, UserId};
use crate::records::{ImmutableRecord, WriteOnceTable};
use crate::store::{stored_entity, Logged, Tables, UnitOfWork};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hire,
    Reject,
    Hold,
}

impl Decision {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hire => "hire",
            Self::Reject => "reject",
            Self::Hold => "hold",
        }
    }

    /// Application event fired when a decision of this kind is approved.
    pub const fn application_event(self) -> Option<&'static str> {
        match self {
            Self::Hire => Some("hire"),
            Self::Reject => Some("reject"),
            Self::Hold => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HiringDecision {
    id: HiringDecisionId,
    organization_id: OrganizationId,
    application_id: ApplicationId,
    decision: Decision,
    rationale: String,
    decided_by: Option<UserId>,
    proposed_salary: Option<u64>,
    created_at: DateTime<Utc>,
}

impl HiringDecision {
    pub fn id(&self) -> HiringDecisionId {
        self.id
    }

    pub fn application_id(&self) -> ApplicationId {
        self.application_id
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn decided_by(&self) -> Option<UserId> {
        self.decided_by
    }

    pub fn proposed_salary(&self) -> Option<u64> {
        self.proposed_salary
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl ImmutableRecord for HiringDecision {
    type Id = HiringDecisionId;
    const RECORD: &'static str = "hiring_decision";

    fn record_id(&self) -> HiringDecisionId {
        self.id
    }

    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

impl Logged for HiringDecision {
    fn log(tables: &Tables) -> &WriteOnceTable<Self> {
        &tables.hiring_decisions
    }

    fn log_mut(tables: &mut Tables) -> &mut WriteOnceTable<Self> {
        &mut tables.hiring_decisions
    }
}

/// Approval sub-state of a hiring decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionApproval {
    pub id: HiringDecisionId,
    pub organization_id: OrganizationId,
    pub application_id: ApplicationId,
    status: ApprovalStatus,
    pub approver_id: Option<UserId>,
    /// Salary confirmed at approval when the decision carried none.
    pub approved_salary: Option<u64>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl DecisionApproval {
    pub fn status(&self) -> ApprovalStatus {
        self.status
    }
}

stored_entity!(
    DecisionApproval,
    HiringDecisionId,
    EntityKind::HiringDecision,
    decision_approvals
);

impl WorkflowEntity for DecisionApproval {
    type State = ApprovalStatus;

    fn status(&self) -> ApprovalStatus {
        self.status
    }

    fn set_status(&mut self, status: ApprovalStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &DECISION_APPROVAL_MACHINE
    }
}

const STAMP_DECISION_RESPONSE: Hook<DecisionApproval> = Hook {
    name: "stamp_decision_response",
    run: stamp_decision_response,
};

const AUDIT_DECISION_RESPONSE: Hook<DecisionApproval> = Hook {
    name: "audit_decision_response",
    run: audit_decision_response,
};

pub static DECISION_APPROVAL_MACHINE: MachineDefinition<DecisionApproval> = MachineDefinition {
    name: "hiring_decision",
    initial: ApprovalStatus::Pending,
    events: &[
        EventDefinition {
            name: "approve",
            from: &[ApprovalStatus::Pending],
            to: ApprovalStatus::Approved,
            guard: None,
            then: None,
            hooks: &[
                STAMP_DECISION_RESPONSE,
                AUDIT_DECISION_RESPONSE,
                orchestrator::APPLY_HIRING_DECISION,
            ],
        },
        EventDefinition {
            name: "reject",
            from: &[ApprovalStatus::Pending],
            to: ApprovalStatus::Rejected,
            guard: None,
            then: None,
            hooks: &[STAMP_DECISION_RESPONSE, AUDIT_DECISION_RESPONSE],
        },
    ],
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewHiringDecision {
    pub application_id: ApplicationId,
    pub decision: Decision,
    pub rationale: String,
    #[serde(default)]
    pub proposed_salary: Option<u64>,
}

/// Record a decision awaiting approval. At most one may be pending per application.
pub fn create(
    uow: &mut UnitOfWork<'_>,
    new: NewHiringDecision,
) -> Result<HiringDecision, WorkflowError> {
    let rationale = new.rationale.trim();
    if rationale.is_empty() {
        return Err(WorkflowError::invalid("rationale", "is required"));
    }
    if new.proposed_salary == Some(0) {
        return Err(WorkflowError::invalid("proposed_salary", "must be positive"));
    }
    uow.get::<Application>(new.application_id)?;

    if pending_for(uow, new.application_id).is_some() {
        return Err(WorkflowError::UniquenessViolation(format!(
            "application {} already has a pending hiring decision",
            new.application_id
        )));
    }

    let decision = HiringDecision {
        id: HiringDecisionId::new(),
        organization_id: uow.ctx().organization_id(),
        application_id: new.application_id,
        decision: new.decision,
        rationale: rationale.to_string(),
        decided_by: uow.ctx().actor_id(),
        proposed_salary: new.proposed_salary,
        created_at: uow.now(),
    };
    uow.append(decision.clone())?;
    uow.insert(DecisionApproval {
        id: decision.id,
        organization_id: decision.organization_id,
        application_id: decision.application_id,
        status: DECISION_APPROVAL_MACHINE.initial,
        approver_id: None,
        approved_salary: None,
        responded_at: None,
    })?;

    let mut entry = AuditRecord::new(
        "hiring_decision.created",
        EntityRef::new(EntityKind::HiringDecision, decision.id),
    )
    .with_metadata("application_id", decision.application_id.to_string())
    .with_metadata("decision", decision.decision.label())
    .with_metadata("rationale", decision.rationale.clone());
    if let Some(salary) = decision.proposed_salary {
        entry = entry.with_metadata("proposed_salary", salary);
    }
    audit::record_required(uow, entry);
    Ok(decision)
}

/// Approve a pending decision and apply it to the application. A `hire` decision
/// needs a salary, either proposed at creation or supplied here.
pub fn approve(
    uow: &mut UnitOfWork<'_>,
    id: HiringDecisionId,
    salary: Option<u64>,
) -> Result<ApprovalStatus, WorkflowError> {
    let decision = find(uow, id)?.clone();
    if salary == Some(0) {
        return Err(WorkflowError::invalid("salary", "must be positive"));
    }
    if decision.decision == Decision::Hire
        && decision.proposed_salary.is_none()
        && salary.is_none()
    {
        return Err(WorkflowError::invalid(
            "salary",
            "is required to approve a hire decision",
        ));
    }

    fire_with::<DecisionApproval, _>(uow, id, "approve", |approval| {
        approval.approved_salary = decision.proposed_salary.or(salary);
        Ok(())
    })
}

/// Reject a pending decision. The application is left where it is.
pub fn reject(
    uow: &mut UnitOfWork<'_>,
    id: HiringDecisionId,
) -> Result<ApprovalStatus, WorkflowError> {
    find(uow, id)?;
    fire::<DecisionApproval>(uow, id, "reject")
}

pub fn find<'u>(
    uow: &'u UnitOfWork<'_>,
    id: HiringDecisionId,
) -> Result<&'u HiringDecision, WorkflowError> {
    uow.get_record::<HiringDecision>(id)
        .ok_or(WorkflowError::NotFound {
            kind: EntityKind::HiringDecision,
            id: id.into(),
        })
}

/// The pending decision for an application, if any.
pub fn pending_for(uow: &UnitOfWork<'_>, application_id: ApplicationId) -> Option<HiringDecisionId> {
    uow.scan::<DecisionApproval>()
        .into_iter()
        .find(|approval| {
            approval.application_id == application_id
                && approval.status == ApprovalStatus::Pending
        })
        .map(|approval| approval.id)
}

/// Records who responded and when. An approval without a confirmed salary falls
/// back to the one proposed with the decision.
fn stamp_decision_response(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<DecisionApproval>,
) -> Result<(), WorkflowError> {
    let proposed = find(uow, transition.id)?.proposed_salary;
    let approver = uow.ctx().actor_id();
    let now = uow.now();
    let approved = transition.to == ApprovalStatus::Approved;
    uow.update::<DecisionApproval, _>(transition.id, |approval| {
        approval.approver_id = approver;
        approval.responded_at = Some(now);
        if approved {
            approval.approved_salary = approval.approved_salary.or(proposed);
        }
        Ok(())
    })?;
    Ok(())
}

fn audit_decision_response(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<DecisionApproval>,
) -> Result<(), WorkflowError> {
    let approval = uow.get::<DecisionApproval>(transition.id)?;
    let mut entry = AuditRecord::new(
        format!("hiring_decision.{}", transition.to),
        transition.subject,
    )
    .with_metadata("application_id", approval.application_id.to_string())
    .with_change("approval_status", transition.from.to_string(), transition.to.to_string());
    if let Some(salary) = approval.approved_salary {
        entry = entry.with_metadata("approved_salary", salary);
    }
    audit::record_required(uow, entry);
    Ok(())
}
