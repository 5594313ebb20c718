//! E-Verify cases and their link to the owning I-9.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use super::i9::{I9Status, I9Verification};
use super::orchestrator;
use crate::calendar;
use crate::engine::{
    fire, fire_with, workflow_states, EventDefinition, Hook, MachineDefinition, StatusToken,
    Transition, WorkflowEntity, WorkflowError,
};
use crate::ids::{EVerifyCaseId, EntityKind, I9VerificationId, OrganizationId};
use crate::integrations::{ProviderAdapter, ProviderRequest, ProviderStatus};
use crate::store::{stored_entity, Stored, UnitOfWork};

workflow_states! {
    pub enum EVerifyStatus {
        Pending => "pending",
        Submitted => "submitted",
        EmploymentAuthorized => "employment_authorized",
        TncIssued => "tnc_issued",
        FncIssued => "fnc_issued",
        Closed => "closed",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EVerifyCase {
    pub id: EVerifyCaseId,
    pub organization_id: OrganizationId,
    pub i9_verification_id: I9VerificationId,
    status: EVerifyStatus,
    pub external_case_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub tnc_issued_at: Option<DateTime<Utc>>,
    /// Candidate response deadline, set once when the TNC is issued.
    pub tnc_response_deadline: Option<DateTime<Utc>>,
    pub fnc_issued_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status_reason: Option<String>,
}

impl EVerifyCase {
    pub fn status(&self) -> EVerifyStatus {
        self.status
    }
}

stored_entity!(EVerifyCase, EVerifyCaseId, EntityKind::EVerifyCase, everify_cases);

impl WorkflowEntity for EVerifyCase {
    type State = EVerifyStatus;

    fn status(&self) -> EVerifyStatus {
        self.status
    }

    fn set_status(&mut self, status: EVerifyStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &EVERIFY_MACHINE
    }
}

use EVerifyStatus::{Closed, EmploymentAuthorized, FncIssued, Pending, Submitted, TncIssued};

pub static EVERIFY_MACHINE: MachineDefinition<EVerifyCase> = MachineDefinition {
    name: "everify_case",
    initial: Pending,
    events: &[
        EventDefinition {
            name: "submit",
            from: &[Pending],
            to: Submitted,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_submitted_at",
                    run: stamp_submitted_at,
                },
                orchestrator::I9_SUBMIT_EVERIFY,
            ],
        },
        EventDefinition {
            name: "authorize",
            from: &[Submitted],
            to: EmploymentAuthorized,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_authorized_at",
                    run: stamp_authorized_at,
                },
                orchestrator::I9_VERIFY,
            ],
        },
        EventDefinition {
            name: "issue_tnc",
            from: &[Submitted],
            to: TncIssued,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "set_tnc_deadline",
                    run: set_tnc_deadline,
                },
                orchestrator::I9_RECEIVE_TNC,
            ],
        },
        EventDefinition {
            name: "issue_fnc",
            from: &[Submitted, TncIssued],
            to: FncIssued,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_fnc_issued_at",
                    run: stamp_fnc_issued_at,
                },
                orchestrator::I9_FAIL_VERIFICATION,
            ],
        },
        EventDefinition {
            name: "resolve_tnc",
            from: &[TncIssued],
            to: EmploymentAuthorized,
            guard: None,
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_authorized_at",
                    run: stamp_authorized_at,
                },
                orchestrator::I9_VERIFY,
            ],
        },
        EventDefinition {
            name: "close",
            from: &[Pending, Submitted, EmploymentAuthorized, TncIssued, FncIssued],
            to: Closed,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_closed_at",
                run: stamp_closed_at,
            }],
        },
    ],
};

/// Open a case for an I-9 whose Section 2 is complete. One open case per I-9.
pub fn create(
    uow: &mut UnitOfWork<'_>,
    i9_verification_id: I9VerificationId,
) -> Result<EVerifyCase, WorkflowError> {
    let verification = uow.get::<I9Verification>(i9_verification_id)?;
    if verification.status() != I9Status::Section2Complete {
        return Err(WorkflowError::GuardFailed {
            entity: verification.entity_ref(),
            event: "open_everify_case",
            reason: format!("I-9 is {}, Section 2 must be complete", verification.status()),
        });
    }

    let open = uow.scan::<EVerifyCase>().into_iter().any(|existing| {
        existing.i9_verification_id == i9_verification_id && existing.status != Closed
    });
    if open {
        return Err(WorkflowError::UniquenessViolation(format!(
            "I-9 {i9_verification_id} already has an open E-Verify case"
        )));
    }

    let case = EVerifyCase {
        id: EVerifyCaseId::new(),
        organization_id: uow.ctx().organization_id(),
        i9_verification_id,
        status: EVERIFY_MACHINE.initial,
        external_case_id: None,
        created_at: uow.now(),
        submitted_at: None,
        authorized_at: None,
        tnc_issued_at: None,
        tnc_response_deadline: None,
        fnc_issued_at: None,
        closed_at: None,
        status_reason: None,
    };
    uow.insert(case.clone())?;
    Ok(case)
}

/// Submit the case to the provider and fire `submit`. If the transition is then
/// rejected, the provider case is cancelled.
pub fn submit_case(
    uow: &mut UnitOfWork<'_>,
    id: EVerifyCaseId,
    provider: &dyn ProviderAdapter,
) -> Result<EVerifyStatus, WorkflowError> {
    let case = uow.get::<EVerifyCase>(id)?;
    if case.status != Pending {
        return fire::<EVerifyCase>(uow, id, "submit");
    }

    let request = ProviderRequest::new(case.entity_ref())
        .with_field("i9_verification_id", case.i9_verification_id.to_string());
    let external_id = provider.submit(&request)?;

    let recorded = external_id.clone();
    let result = fire_with::<EVerifyCase, _>(uow, id, "submit", |case| {
        case.external_case_id = Some(recorded);
        Ok(())
    });
    if result.is_err() {
        if let Err(err) = provider.cancel(&external_id) {
            warn!(%external_id, error = %err, "failed to cancel provider case after rollback");
        }
    }
    result
}

/// Poll the provider and apply its verdict. Returns the resulting status.
pub fn poll_case(
    uow: &mut UnitOfWork<'_>,
    id: EVerifyCaseId,
    provider: &dyn ProviderAdapter,
) -> Result<EVerifyStatus, WorkflowError> {
    let case = uow.get::<EVerifyCase>(id)?;
    let current = case.status;
    let external_id = case
        .external_case_id
        .clone()
        .ok_or_else(|| WorkflowError::invalid("external_case_id", "case was never submitted"))?;

    let verdict = provider.poll(&external_id)?;
    let (event, reason) = match (&verdict, current) {
        (ProviderStatus::Pending, _) => return Ok(current),
        (ProviderStatus::Authorized, Submitted) => ("authorize", None),
        (ProviderStatus::Authorized, TncIssued) => ("resolve_tnc", None),
        (ProviderStatus::Authorized, EmploymentAuthorized) => return Ok(current),
        (ProviderStatus::TentativeNonConfirmation { .. }, TncIssued) => return Ok(current),
        (ProviderStatus::TentativeNonConfirmation { reason }, _) => ("issue_tnc", reason.clone()),
        (ProviderStatus::FinalNonConfirmation { .. }, FncIssued) => return Ok(current),
        (ProviderStatus::FinalNonConfirmation { reason }, _) => ("issue_fnc", reason.clone()),
        (ProviderStatus::Closed, Closed) => return Ok(current),
        (ProviderStatus::Closed, _) => ("close", None),
        (ProviderStatus::Authorized, _) => ("authorize", None),
    };

    fire_with::<EVerifyCase, _>(uow, id, event, |case| {
        if reason.is_some() {
            case.status_reason = reason;
        }
        Ok(())
    })
}

pub fn close(
    uow: &mut UnitOfWork<'_>,
    id: EVerifyCaseId,
    reason: Option<String>,
) -> Result<EVerifyStatus, WorkflowError> {
    fire_with::<EVerifyCase, _>(uow, id, "close", |case| {
        case.status_reason = reason;
        Ok(())
    })
}

fn stamp_submitted_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<EVerifyCase, _>(transition.id, |case| {
        case.submitted_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_authorized_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<EVerifyCase, _>(transition.id, |case| {
        case.authorized_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn set_tnc_deadline(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    let deadline = calendar::deadline_at(now, uow.config().everify_tnc_business_days);
    let case = uow.update::<EVerifyCase, _>(transition.id, |case| {
        case.tnc_issued_at = Some(now);
        case.tnc_response_deadline.get_or_insert(deadline);
        Ok(())
    })?;
    uow.notify(
        "everify.tnc_issued",
        transition.subject,
        json!({
            "i9_verification_id": case.i9_verification_id,
            "response_deadline": case.tnc_response_deadline,
        }),
    );
    Ok(())
}

fn stamp_fnc_issued_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<EVerifyCase, _>(transition.id, |case| {
        case.fnc_issued_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_closed_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<EVerifyCase>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<EVerifyCase, _>(transition.id, |case| {
        case.closed_at = Some(now);
        Ok(())
    })?;
    Ok(())
}
