use chrono::{Duration, TimeZone, Utc};

use super::common::*;
use crate::calendar;
use crate::engine::{fire, WorkflowError};
use crate::ids::ApplicationId;
use crate::integrations::{ProviderAdapter, ProviderStatus, ScriptedProvider};
use crate::workflows::application::ApplicationStatus;
use crate::workflows::everify::{self, EVerifyCase, EVerifyStatus};
use crate::workflows::fire_by_name;
use crate::workflows::i9::{
    self, CitizenshipStatus, I9Status, I9Verification, NewI9Verification, Section1,
};

fn start_i9(h: &Harness, application_id: ApplicationId) -> I9Verification {
    h.run(|uow| {
        i9::create(
            uow,
            NewI9Verification {
                application_id,
                employment_start_date: date(2025, 1, 6),
            },
        )
    })
    .expect("I-9 created")
}

fn attest(h: &Harness, verification: &I9Verification) {
    h.run(|uow| {
        i9::complete_section1(
            uow,
            verification.id,
            Section1 {
                citizenship_status: Some(CitizenshipStatus::LawfulPermanentResident),
                attestation_accepted: true,
            },
        )?;
        fire::<I9Verification>(uow, verification.id, "begin_section2")
    })
    .expect("section 1 complete");
}

fn review_documents(h: &Harness, verification: &I9Verification) {
    h.run(|uow| {
        i9::complete_section2(uow, verification.id, vec!["US Passport".to_string()])
    })
    .expect("section 2 complete");
}

/// An I-9 with Section 2 done and an E-Verify case opened for it.
fn open_case(h: &Harness) -> (I9Verification, EVerifyCase) {
    let job = open_job(h, 1);
    let application = application_at(h, &job, ApplicationStatus::Offered);
    let verification = start_i9(h, application.id);
    attest(h, &verification);
    review_documents(h, &verification);
    let case = h
        .run(|uow| everify::create(uow, verification.id))
        .expect("case opened");
    (verification, case)
}

#[test]
fn section2_deadline_counts_three_business_days_from_the_start_date() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::Offered);
    let verification = start_i9(&h, application.id);

    assert_eq!(
        verification.section2_deadline,
        Utc.with_ymd_and_hms(2025, 1, 9, 23, 59, 59).unwrap()
    );
    assert_eq!(verification.status(), I9Status::PendingSection1);
}

#[test]
fn late_section2_is_flagged_and_audited() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::Offered);
    let verification = start_i9(&h, application.id);
    attest(&h, &verification);

    h.advance(Duration::days(4));
    review_documents(&h, &verification);

    let completed = h.load::<I9Verification>(verification.id);
    assert_eq!(completed.status(), I9Status::Section2Complete);
    assert!(completed.section2_late);
    assert_eq!(h.audit_count("i9_verification.section2_late"), 1);
}

#[test]
fn on_time_section2_is_not_flagged() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::Offered);
    let verification = start_i9(&h, application.id);
    attest(&h, &verification);

    h.advance(Duration::days(3));
    review_documents(&h, &verification);

    assert!(!h.load::<I9Verification>(verification.id).section2_late);
    assert_eq!(h.audit_count("i9_verification.section2_late"), 0);
}

#[test]
fn section2_by_name_needs_reviewed_documents() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::Offered);
    let verification = start_i9(&h, application.id);
    attest(&h, &verification);

    match h.run(|uow| fire_by_name(uow, "i9_verification", verification.id.0, "complete_section2")) {
        Err(WorkflowError::GuardFailed {
            event: "complete_section2",
            reason,
            ..
        }) => assert_eq!(reason, "at least one reviewed document is required"),
        other => panic!("expected guard failure, got {other:?}"),
    }
    let pending = h.load::<I9Verification>(verification.id);
    assert_eq!(pending.status(), I9Status::PendingSection2);
    assert!(pending.section2_completed_at.is_none());

    let status = h
        .run(|uow| {
            uow.update::<I9Verification, _>(verification.id, |verification| {
                verification.documents = vec!["Permanent Resident Card".to_string()];
                Ok(())
            })?;
            fire_by_name(uow, "i9_verification", verification.id.0, "complete_section2")
        })
        .expect("section 2 complete by name");
    assert_eq!(status, "section2_complete");
}

#[test]
fn section1_requires_attestation() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::Offered);
    let verification = start_i9(&h, application.id);

    match h.run(|uow| {
        i9::complete_section1(
            uow,
            verification.id,
            Section1 {
                citizenship_status: Some(CitizenshipStatus::Citizen),
                attestation_accepted: false,
            },
        )
    }) {
        Err(WorkflowError::GuardFailed { reason, .. }) => assert!(reason.contains("attestation")),
        other => panic!("expected guard failure, got {other:?}"),
    }
    let untouched = h.load::<I9Verification>(verification.id);
    assert_eq!(untouched.status(), I9Status::PendingSection1);
    assert!(untouched.citizenship_status.is_none());
}

#[test]
fn deadline_corrections_are_audited() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::Offered);
    let verification = start_i9(&h, application.id);

    let corrected = h
        .run(|uow| {
            i9::correct_section2_deadline(uow, verification.id, date(2025, 1, 10), "Start moved")
        })
        .expect("corrected");
    assert_eq!(corrected, Utc.with_ymd_and_hms(2025, 1, 15, 23, 59, 59).unwrap());
    assert_eq!(h.audit_count("i9_verification.deadline_corrected"), 1);

    match h.run(|uow| i9::correct_section2_deadline(uow, verification.id, date(2025, 1, 13), "")) {
        Err(WorkflowError::FieldValidation { field: "reason", .. }) => {}
        other => panic!("expected reason validation, got {other:?}"),
    }
}

#[test]
fn submitting_a_case_moves_the_i9_to_pending_everify() {
    let h = Harness::new();
    let (verification, case) = open_case(&h);
    let provider = ScriptedProvider::new();

    let status = h
        .run(|uow| everify::submit_case(uow, case.id, &provider))
        .expect("submitted");
    assert_eq!(status, EVerifyStatus::Submitted);

    let submitted = h.load::<EVerifyCase>(case.id);
    assert_eq!(submitted.submitted_at, Some(monday_morning()));
    let external_id = submitted.external_case_id.expect("external id recorded");
    assert_eq!(provider.submitted(), vec![external_id]);
    assert_eq!(
        h.load::<I9Verification>(verification.id).status(),
        I9Status::PendingEverify
    );

    match h.run(|uow| everify::create(uow, verification.id)) {
        Err(WorkflowError::GuardFailed {
            event: "open_everify_case",
            ..
        }) => {}
        other => panic!("expected guard failure, got {other:?}"),
    }
}

#[test]
fn one_open_case_per_i9() {
    let h = Harness::new();
    let (verification, case) = open_case(&h);

    match h.run(|uow| everify::create(uow, verification.id)) {
        Err(WorkflowError::UniquenessViolation(_)) => {}
        other => panic!("expected uniqueness violation, got {other:?}"),
    }

    h.run(|uow| everify::close(uow, case.id, Some("Duplicate entry".to_string())))
        .expect("closed");
    h.run(|uow| everify::create(uow, verification.id))
        .expect("new case after close");
}

#[test]
fn failed_i9_hook_rolls_back_the_case_and_cancels_the_provider_case() {
    let h = Harness::new();
    let (verification, case) = open_case(&h);
    h.run(|uow| i9::fail(uow, verification.id, Some("Documents withdrawn".to_string())))
        .expect("I-9 failed");
    let provider = ScriptedProvider::new();

    match h.run(|uow| everify::submit_case(uow, case.id, &provider)) {
        Err(WorkflowError::IllegalTransition { state: "failed", .. }) => {}
        other => panic!("expected illegal transition, got {other:?}"),
    }

    let untouched = h.load::<EVerifyCase>(case.id);
    assert_eq!(untouched.status(), EVerifyStatus::Pending);
    assert!(untouched.external_case_id.is_none());
    assert!(untouched.submitted_at.is_none());
    assert_eq!(provider.cancelled(), provider.submitted());
    assert_eq!(provider.cancelled().len(), 1);
}

#[test]
fn provider_rejection_leaves_the_case_pending() {
    let h = Harness::new();
    let (_, case) = open_case(&h);
    let provider = ScriptedProvider::new();
    provider.reject_submissions("invalid SSN format");

    match h.run(|uow| everify::submit_case(uow, case.id, &provider)) {
        Err(WorkflowError::Provider(_)) => {}
        other => panic!("expected provider error, got {other:?}"),
    }
    assert_eq!(h.load::<EVerifyCase>(case.id).status(), EVerifyStatus::Pending);
}

#[test]
fn tnc_sets_an_eight_business_day_response_window() {
    let h = Harness::new();
    let (verification, case) = open_case(&h);
    let provider = ScriptedProvider::new();
    h.run(|uow| everify::submit_case(uow, case.id, &provider))
        .expect("submitted");
    let external_id = h
        .load::<EVerifyCase>(case.id)
        .external_case_id
        .expect("external id");

    provider.set_status(
        &external_id,
        ProviderStatus::TentativeNonConfirmation {
            reason: Some("SSA record mismatch".to_string()),
        },
    );
    let status = h
        .run(|uow| everify::poll_case(uow, case.id, &provider))
        .expect("polled");
    assert_eq!(status, EVerifyStatus::TncIssued);

    let tnc = h.load::<EVerifyCase>(case.id);
    assert_eq!(
        tnc.tnc_response_deadline,
        Some(Utc.with_ymd_and_hms(2025, 1, 16, 23, 59, 59).unwrap())
    );
    assert_eq!(
        tnc.tnc_response_deadline,
        Some(calendar::deadline_at(monday_morning(), 8))
    );
    assert_eq!(tnc.status_reason.as_deref(), Some("SSA record mismatch"));
    assert_eq!(
        h.load::<I9Verification>(verification.id).status(),
        I9Status::EverifyTnc
    );
    assert!(h.dispatch.templates().contains(&"everify.tnc_issued"));

    let unchanged = h
        .run(|uow| everify::poll_case(uow, case.id, &provider))
        .expect("second poll");
    assert_eq!(unchanged, EVerifyStatus::TncIssued);

    provider.set_status(&external_id, ProviderStatus::Authorized);
    h.advance(Duration::days(2));
    h.run(|uow| everify::poll_case(uow, case.id, &provider))
        .expect("resolved");
    assert_eq!(
        h.load::<EVerifyCase>(case.id).status(),
        EVerifyStatus::EmploymentAuthorized
    );
    let verified = h.load::<I9Verification>(verification.id);
    assert_eq!(verified.status(), I9Status::Verified);
    assert_eq!(verified.verified_at, Some(monday_morning() + Duration::days(2)));
}

#[test]
fn final_non_confirmation_fails_the_i9() {
    let h = Harness::new();
    let (verification, case) = open_case(&h);
    let provider = ScriptedProvider::new();
    h.run(|uow| everify::submit_case(uow, case.id, &provider))
        .expect("submitted");
    let external_id = h
        .load::<EVerifyCase>(case.id)
        .external_case_id
        .expect("external id");

    provider.set_status(
        &external_id,
        ProviderStatus::FinalNonConfirmation { reason: None },
    );
    h.run(|uow| everify::poll_case(uow, case.id, &provider))
        .expect("polled");

    let case = h.load::<EVerifyCase>(case.id);
    assert_eq!(case.status(), EVerifyStatus::FncIssued);
    assert_eq!(case.fnc_issued_at, Some(monday_morning()));

    let failed = h.load::<I9Verification>(verification.id);
    assert_eq!(failed.status(), I9Status::Failed);
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("E-Verify final non-confirmation")
    );
}

#[test]
fn polling_an_unsubmitted_case_is_refused() {
    let h = Harness::new();
    let (_, case) = open_case(&h);
    let provider = ScriptedProvider::new();

    match h.run(|uow| everify::poll_case(uow, case.id, &provider)) {
        Err(WorkflowError::FieldValidation {
            field: "external_case_id",
            ..
        }) => {}
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert!(provider.poll("EV-missing").is_err());
}
