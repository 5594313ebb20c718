//! Cross-entity side effects.
//!
//! Every hook that reaches past its own entity lives here, and each one has a
//! matching row in [`effect_graph`], so the consequences of any event can be
//! listed without running it.

use serde::Serialize;

use super::adverse_action::AdverseAction;
use super::application::{self, Application, ApplicationStatus};
use super::approval::{self, Approval, ApprovalParent, ApprovalStatus};
use super::everify::EVerifyCase;
use super::hiring_decision::{self, Decision, DecisionApproval};
use super::i9::{self, I9Verification};
use super::job::{Job, JobStatus};
use super::offer::{Offer, OfferStatus};
use crate::audit::{self, AuditRecord};
use crate::engine::{fire, fire_with, Hook, Transition, WorkflowError};
use crate::ids::I9VerificationId;
use crate::store::{Stored, UnitOfWork};

pub(crate) const INCREMENT_JOB_FILLED_COUNT: Hook<Application> = Hook {
    name: "increment_job_filled_count",
    run: increment_job_filled_count,
};

pub(crate) const RESOLVE_APPROVAL_PARENT: Hook<Approval> = Hook {
    name: "resolve_approval_parent",
    run: resolve_approval_parent,
};

pub(crate) const ADVANCE_APPLICATION_TO_OFFERED: Hook<Offer> = Hook {
    name: "advance_application_to_offered",
    run: advance_application_to_offered,
};

pub(crate) const APPLY_HIRING_DECISION: Hook<DecisionApproval> = Hook {
    name: "apply_hiring_decision",
    run: apply_hiring_decision,
};

pub(crate) const I9_SUBMIT_EVERIFY: Hook<EVerifyCase> = Hook {
    name: "i9_submit_everify",
    run: i9_submit_everify,
};

pub(crate) const I9_VERIFY: Hook<EVerifyCase> = Hook {
    name: "i9_verify",
    run: i9_verify,
};

pub(crate) const I9_RECEIVE_TNC: Hook<EVerifyCase> = Hook {
    name: "i9_receive_tnc",
    run: i9_receive_tnc,
};

pub(crate) const I9_FAIL_VERIFICATION: Hook<EVerifyCase> = Hook {
    name: "i9_fail_verification",
    run: i9_fail_verification,
};

pub(crate) const REJECT_APPLICATION_AFTER_FINAL_NOTICE: Hook<AdverseAction> = Hook {
    name: "reject_application_after_final_notice",
    run: reject_application_after_final_notice,
};

/// What a cross-entity hook touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EffectTarget {
    Event {
        machine: &'static str,
        event: &'static str,
    },
    Field {
        machine: &'static str,
        field: &'static str,
    },
}

/// One edge: firing `machine.event` runs `hook`, which reaches `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectEdge {
    pub machine: &'static str,
    pub event: &'static str,
    pub hook: &'static str,
    pub target: EffectTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<&'static str>,
}

const fn edge(
    machine: &'static str,
    event: &'static str,
    hook: &'static str,
    target: EffectTarget,
    condition: Option<&'static str>,
) -> EffectEdge {
    EffectEdge {
        machine,
        event,
        hook,
        target,
        condition,
    }
}

const fn to_event(machine: &'static str, event: &'static str) -> EffectTarget {
    EffectTarget::Event { machine, event }
}

static EFFECTS: &[EffectEdge] = &[
    edge(
        "application",
        "hire",
        INCREMENT_JOB_FILLED_COUNT.name,
        EffectTarget::Field {
            machine: "job",
            field: "filled_count",
        },
        None,
    ),
    edge(
        "approval",
        "approve",
        RESOLVE_APPROVAL_PARENT.name,
        to_event("job", "approve"),
        Some("parent is a job and every approval in its current round is approved"),
    ),
    edge(
        "approval",
        "approve",
        RESOLVE_APPROVAL_PARENT.name,
        to_event("offer", "approve"),
        Some("parent is an offer and every approval in its current round is approved"),
    ),
    edge(
        "approval",
        "reject",
        RESOLVE_APPROVAL_PARENT.name,
        to_event("job", "reject"),
        Some("parent is a job pending approval in the same round"),
    ),
    edge(
        "approval",
        "reject",
        RESOLVE_APPROVAL_PARENT.name,
        to_event("offer", "reject_approval"),
        Some("parent is an offer pending approval in the same round"),
    ),
    edge(
        "offer",
        "mark_accepted",
        ADVANCE_APPLICATION_TO_OFFERED.name,
        to_event("application", "advance_to_offer"),
        Some("application is not already offered"),
    ),
    edge(
        "hiring_decision",
        "approve",
        APPLY_HIRING_DECISION.name,
        to_event("application", "hire"),
        Some("decision is hire"),
    ),
    edge(
        "hiring_decision",
        "approve",
        APPLY_HIRING_DECISION.name,
        to_event("application", "reject"),
        Some("decision is reject"),
    ),
    edge(
        "everify_case",
        "submit",
        I9_SUBMIT_EVERIFY.name,
        to_event("i9_verification", "submit_everify"),
        None,
    ),
    edge(
        "everify_case",
        "authorize",
        I9_VERIFY.name,
        to_event("i9_verification", "verify"),
        None,
    ),
    edge(
        "everify_case",
        "issue_tnc",
        I9_RECEIVE_TNC.name,
        to_event("i9_verification", "receive_tnc"),
        None,
    ),
    edge(
        "everify_case",
        "issue_fnc",
        I9_FAIL_VERIFICATION.name,
        to_event("i9_verification", "fail_verification"),
        None,
    ),
    edge(
        "everify_case",
        "resolve_tnc",
        I9_VERIFY.name,
        to_event("i9_verification", "verify"),
        None,
    ),
    edge(
        "adverse_action",
        "send_final_adverse",
        REJECT_APPLICATION_AFTER_FINAL_NOTICE.name,
        to_event("application", "reject"),
        Some("application is still active"),
    ),
];

/// Every cross-entity edge.
pub fn effect_graph() -> &'static [EffectEdge] {
    EFFECTS
}

/// Edges triggered by one event.
pub fn effects_of(machine: &str, event: &str) -> Vec<EffectEdge> {
    EFFECTS
        .iter()
        .filter(|edge| edge.machine == machine && edge.event == event)
        .copied()
        .collect()
}

fn increment_job_filled_count(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Application>,
) -> Result<(), WorkflowError> {
    let job_id = uow.get::<Application>(transition.id)?.job_id;
    let before = uow.get::<Job>(job_id)?.filled_count;
    let job = uow.update::<Job, _>(job_id, |job| {
        job.filled_count = job.filled_count.saturating_add(1);
        Ok(())
    })?;
    audit::record(
        uow,
        AuditRecord::new("job.filled_count_changed", job.entity_ref())
            .with_metadata("application_id", transition.id.to_string())
            .with_change("filled_count", before, job.filled_count),
    );
    Ok(())
}

fn resolve_approval_parent(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Approval>,
) -> Result<(), WorkflowError> {
    let approval = uow.get::<Approval>(transition.id)?;
    let (parent, round) = (approval.parent, approval.round);

    let (awaiting, current_round) = match parent {
        ApprovalParent::Job(id) => {
            let job = uow.get::<Job>(id)?;
            (job.status() == JobStatus::PendingApproval, job.approval_round)
        }
        ApprovalParent::Offer(id) => {
            let offer = uow.get::<Offer>(id)?;
            (offer.status() == OfferStatus::PendingApproval, offer.approval_round)
        }
    };
    if !awaiting || round != current_round {
        return Ok(());
    }

    if transition.to == ApprovalStatus::Rejected {
        match parent {
            ApprovalParent::Job(id) => fire::<Job>(uow, id, "reject").map(|_| ()),
            ApprovalParent::Offer(id) => fire::<Offer>(uow, id, "reject_approval").map(|_| ()),
        }
    } else {
        let all_approved = approval::for_round(uow, parent, round)
            .iter()
            .all(|approval| approval.status() == ApprovalStatus::Approved);
        if !all_approved {
            return Ok(());
        }
        match parent {
            ApprovalParent::Job(id) => fire::<Job>(uow, id, "approve").map(|_| ()),
            ApprovalParent::Offer(id) => fire::<Offer>(uow, id, "approve").map(|_| ()),
        }
    }
}

fn advance_application_to_offered(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Offer>,
) -> Result<(), WorkflowError> {
    let application_id = uow.get::<Offer>(transition.id)?.application_id;
    if uow.get::<Application>(application_id)?.status() == ApplicationStatus::Offered {
        return Ok(());
    }
    fire::<Application>(uow, application_id, "advance_to_offer")?;
    Ok(())
}

fn apply_hiring_decision(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<DecisionApproval>,
) -> Result<(), WorkflowError> {
    let decision = hiring_decision::find(uow, transition.id)?.clone();
    let Some(event) = decision.decision().application_event() else {
        return Ok(());
    };
    if decision.decision() == Decision::Hire
        && uow
            .get::<DecisionApproval>(transition.id)?
            .approved_salary
            .or(decision.proposed_salary())
            .is_none()
    {
        return Err(WorkflowError::invalid(
            "salary",
            "is required to approve a hire decision",
        ));
    }
    let rationale = decision.rationale().to_string();
    fire_with::<Application, _>(uow, decision.application_id(), event, |application| {
        if decision.decision() == Decision::Reject {
            application.rejection_reason = Some(rationale);
        }
        Ok(())
    })?;
    Ok(())
}

fn owning_i9(
    uow: &UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<I9VerificationId, WorkflowError> {
    Ok(uow.get::<EVerifyCase>(transition.id)?.i9_verification_id)
}

fn i9_submit_everify(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let i9_id = owning_i9(uow, transition)?;
    fire::<I9Verification>(uow, i9_id, "submit_everify")?;
    Ok(())
}

fn i9_verify(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let i9_id = owning_i9(uow, transition)?;
    fire::<I9Verification>(uow, i9_id, "verify")?;
    Ok(())
}

fn i9_receive_tnc(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let i9_id = owning_i9(uow, transition)?;
    fire::<I9Verification>(uow, i9_id, "receive_tnc")?;
    Ok(())
}

fn i9_fail_verification(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let case = uow.get::<EVerifyCase>(transition.id)?;
    let (i9_id, reason) = (
        case.i9_verification_id,
        case.status_reason
            .clone()
            .unwrap_or_else(|| "E-Verify final non-confirmation".to_string()),
    );
    i9::fail(uow, i9_id, Some(reason))?;
    Ok(())
}

fn reject_application_after_final_notice(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<AdverseAction>,
) -> Result<(), WorkflowError> {
    let action = uow.get::<AdverseAction>(transition.id)?;
    let (application_id, reason) = (action.application_id, action.reason.clone());
    if !uow.get::<Application>(application_id)?.is_active() {
        return Ok(());
    }
    application::reject(uow, application_id, Some(format!("Adverse action: {reason}")))?;
    Ok(())
}
