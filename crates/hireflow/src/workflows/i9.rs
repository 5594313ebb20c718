//! Form I-9 employment eligibility verification.
//!
//! The Section 2 deadline is fixed when the record is created, counted in business
//! days from the employee's first day. It only changes through
//! [`correct_section2_deadline`], which leaves a required audit entry.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::application::Application;
use crate::audit::{self, AuditRecord};
use crate::calendar;
use crate::engine::{
    fire_with, workflow_states, EventDefinition, Guard, Hook, MachineDefinition, StatusToken,
    Transition, WorkflowEntity, WorkflowError,
};
use crate::ids::{ApplicationId, EntityKind, EntityRef, I9VerificationId, OrganizationId};
use crate::store::{stored_entity, Stored, UnitOfWork};

workflow_states! {
    pub enum I9Status {
        PendingSection1 => "pending_section1",
        Section1Complete => "section1_complete",
        PendingSection2 => "pending_section2",
        Section2Complete => "section2_complete",
        PendingEverify => "pending_everify",
        EverifyTnc => "everify_tnc",
        Verified => "verified",
        Failed => "failed",
        Expired => "expired",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitizenshipStatus {
    Citizen,
    NonCitizenNational,
    LawfulPermanentResident,
    AuthorizedAlien,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct I9Verification {
    pub id: I9VerificationId,
    pub organization_id: OrganizationId,
    pub application_id: ApplicationId,
    status: I9Status,
    pub employment_start_date: NaiveDate,
    pub citizenship_status: Option<CitizenshipStatus>,
    pub attestation_accepted: bool,
    pub section1_completed_at: Option<DateTime<Utc>>,
    pub section2_started_at: Option<DateTime<Utc>>,
    pub section2_completed_at: Option<DateTime<Utc>>,
    pub section2_deadline: DateTime<Utc>,
    pub section2_late: bool,
    pub documents: Vec<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl I9Verification {
    pub fn status(&self) -> I9Status {
        self.status
    }
}

stored_entity!(
    I9Verification,
    I9VerificationId,
    EntityKind::I9Verification,
    i9_verifications
);

impl WorkflowEntity for I9Verification {
    type State = I9Status;

    fn status(&self) -> I9Status {
        self.status
    }

    fn set_status(&mut self, status: I9Status, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &I9_MACHINE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewI9Verification {
    pub application_id: ApplicationId,
    pub employment_start_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Section1 {
    pub citizenship_status: Option<CitizenshipStatus>,
    pub attestation_accepted: bool,
}

use I9Status::{
    EverifyTnc, Expired, Failed, PendingEverify, PendingSection1, PendingSection2,
    Section1Complete, Section2Complete, Verified,
};

pub static I9_MACHINE: MachineDefinition<I9Verification> = MachineDefinition {
    name: "i9_verification",
    initial: PendingSection1,
    events: &[
        EventDefinition {
            name: "complete_section1",
            from: &[PendingSection1],
            to: Section1Complete,
            guard: Some(Guard {
                name: "attested",
                check: attested,
            }),
            then: None,
            hooks: &[Hook {
                name: "stamp_section1_completed_at",
                run: stamp_section1_completed_at,
            }],
        },
        EventDefinition {
            name: "begin_section2",
            from: &[Section1Complete],
            to: PendingSection2,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_section2_started_at",
                run: stamp_section2_started_at,
            }],
        },
        EventDefinition {
            name: "complete_section2",
            from: &[PendingSection2],
            to: Section2Complete,
            guard: Some(Guard {
                name: "documents_reviewed",
                check: documents_reviewed,
            }),
            then: None,
            hooks: &[Hook {
                name: "evaluate_section2_timeliness",
                run: evaluate_section2_timeliness,
            }],
        },
        EventDefinition {
            name: "submit_everify",
            from: &[Section2Complete],
            to: PendingEverify,
            guard: None,
            then: None,
            hooks: &[],
        },
        EventDefinition {
            name: "receive_tnc",
            from: &[PendingEverify],
            to: EverifyTnc,
            guard: None,
            then: None,
            hooks: &[],
        },
        EventDefinition {
            name: "verify",
            from: &[Section2Complete, PendingEverify, EverifyTnc],
            to: Verified,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_verified_at",
                run: stamp_verified_at,
            }],
        },
        EventDefinition {
            name: "fail_verification",
            from: &[
                PendingSection1,
                Section1Complete,
                PendingSection2,
                Section2Complete,
                PendingEverify,
                EverifyTnc,
                Verified,
                Expired,
            ],
            to: Failed,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_failed_at",
                run: stamp_failed_at,
            }],
        },
        EventDefinition {
            name: "expire",
            from: &[Verified],
            to: Expired,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_expired_at",
                run: stamp_expired_at,
            }],
        },
    ],
};

pub fn create(
    uow: &mut UnitOfWork<'_>,
    new: NewI9Verification,
) -> Result<I9Verification, WorkflowError> {
    uow.get::<Application>(new.application_id)?;

    let open = uow.scan::<I9Verification>().into_iter().any(|existing| {
        existing.application_id == new.application_id
            && !matches!(existing.status, Failed | Expired)
    });
    if open {
        return Err(WorkflowError::UniquenessViolation(format!(
            "application {} already has an open I-9",
            new.application_id
        )));
    }

    let business_days = uow.config().i9_section2_business_days;
    let verification = I9Verification {
        id: I9VerificationId::new(),
        organization_id: uow.ctx().organization_id(),
        application_id: new.application_id,
        status: I9_MACHINE.initial,
        employment_start_date: new.employment_start_date,
        citizenship_status: None,
        attestation_accepted: false,
        section1_completed_at: None,
        section2_started_at: None,
        section2_completed_at: None,
        section2_deadline: calendar::end_of_day(calendar::deadline(
            new.employment_start_date,
            business_days,
        )),
        section2_late: false,
        documents: Vec::new(),
        verified_at: None,
        failed_at: None,
        failure_reason: None,
        expired_at: None,
        created_at: uow.now(),
    };
    uow.insert(verification.clone())?;

    audit::record(
        uow,
        AuditRecord::new(
            "i9_verification.created",
            EntityRef::new(EntityKind::I9Verification, verification.id),
        )
        .with_metadata("section2_deadline", verification.section2_deadline.to_rfc3339())
        .with_metadata("business_days", business_days),
    );
    Ok(verification)
}

pub fn complete_section1(
    uow: &mut UnitOfWork<'_>,
    id: I9VerificationId,
    section1: Section1,
) -> Result<I9Status, WorkflowError> {
    fire_with::<I9Verification, _>(uow, id, "complete_section1", |verification| {
        verification.citizenship_status = section1.citizenship_status;
        verification.attestation_accepted = section1.attestation_accepted;
        Ok(())
    })
}

pub fn complete_section2(
    uow: &mut UnitOfWork<'_>,
    id: I9VerificationId,
    documents: Vec<String>,
) -> Result<I9Status, WorkflowError> {
    if documents.iter().all(|document| document.trim().is_empty()) {
        return Err(WorkflowError::invalid(
            "documents",
            "at least one reviewed document is required",
        ));
    }
    fire_with::<I9Verification, _>(uow, id, "complete_section2", |verification| {
        verification.documents = documents;
        Ok(())
    })
}

pub fn fail(
    uow: &mut UnitOfWork<'_>,
    id: I9VerificationId,
    reason: Option<String>,
) -> Result<I9Status, WorkflowError> {
    fire_with::<I9Verification, _>(uow, id, "fail_verification", |verification| {
        verification.failure_reason = reason;
        Ok(())
    })
}

/// Recompute the Section 2 deadline from a corrected first day of employment.
pub fn correct_section2_deadline(
    uow: &mut UnitOfWork<'_>,
    id: I9VerificationId,
    employment_start_date: NaiveDate,
    reason: &str,
) -> Result<DateTime<Utc>, WorkflowError> {
    if reason.trim().is_empty() {
        return Err(WorkflowError::invalid("reason", "a correction reason is required"));
    }
    let business_days = uow.config().i9_section2_business_days;
    let corrected = calendar::end_of_day(calendar::deadline(employment_start_date, business_days));

    let before = uow.get::<I9Verification>(id)?.clone();
    if before.section2_completed_at.is_some() {
        return Err(WorkflowError::invalid(
            "section2_deadline",
            "cannot be corrected after Section 2 is complete",
        ));
    }
    uow.update::<I9Verification, _>(id, |verification| {
        verification.employment_start_date = employment_start_date;
        verification.section2_deadline = corrected;
        Ok(())
    })?;

    audit::record_required(
        uow,
        AuditRecord::new("i9_verification.deadline_corrected", before.entity_ref())
            .with_metadata("reason", reason)
            .with_change(
                "employment_start_date",
                before.employment_start_date.to_string(),
                employment_start_date.to_string(),
            )
            .with_change(
                "section2_deadline",
                before.section2_deadline.to_rfc3339(),
                corrected.to_rfc3339(),
            ),
    );
    Ok(corrected)
}

fn attested(verification: &I9Verification, _uow: &UnitOfWork<'_>) -> Result<(), String> {
    if !verification.attestation_accepted {
        return Err("employee attestation has not been accepted".to_string());
    }
    if verification.citizenship_status.is_none() {
        return Err("citizenship status is required".to_string());
    }
    Ok(())
}

fn documents_reviewed(verification: &I9Verification, _uow: &UnitOfWork<'_>) -> Result<(), String> {
    if verification
        .documents
        .iter()
        .all(|document| document.trim().is_empty())
    {
        return Err("at least one reviewed document is required".to_string());
    }
    Ok(())
}

fn stamp_section1_completed_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<I9Verification>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<I9Verification, _>(transition.id, |verification| {
        verification.section1_completed_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_section2_started_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<I9Verification>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<I9Verification, _>(transition.id, |verification| {
        verification.section2_started_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn evaluate_section2_timeliness(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<I9Verification>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    let verification = uow.update::<I9Verification, _>(transition.id, |verification| {
        verification.section2_completed_at = Some(now);
        verification.section2_late = now > verification.section2_deadline;
        Ok(())
    })?;

    if verification.section2_late {
        audit::record_required(
            uow,
            AuditRecord::new("i9_verification.section2_late", transition.subject)
                .with_metadata("deadline", verification.section2_deadline.to_rfc3339())
                .with_metadata("completed_at", now.to_rfc3339()),
        );
    }
    Ok(())
}

fn stamp_verified_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<I9Verification>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<I9Verification, _>(transition.id, |verification| {
        verification.verified_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_failed_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<I9Verification>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<I9Verification, _>(transition.id, |verification| {
        verification.failed_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_expired_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<I9Verification>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<I9Verification, _>(transition.id, |verification| {
        verification.expired_at = Some(now);
        Ok(())
    })?;
    Ok(())
}
