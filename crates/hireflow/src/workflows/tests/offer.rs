use chrono::{DateTime, Duration, Utc};

use super::common::*;
use crate::engine::{fire, WorkflowError};
use crate::workflows::application::{Application, ApplicationStatus};
use crate::workflows::job::Job;
use crate::workflows::offer::{self, NewOffer, Offer, OfferStatus};

/// An offer approved without approvers and sent to the candidate.
fn sent_offer(h: &Harness, application: &Application, expires_at: Option<DateTime<Utc>>) -> Offer {
    h.run(|uow| {
        let offer = offer::create(
            uow,
            NewOffer {
                application_id: application.id,
                salary: 132_000,
                start_date: Some(date(2025, 2, 3)),
                expires_at,
            },
        )?;
        offer::submit_for_approval(uow, offer.id, &[])?;
        fire::<Offer>(uow, offer.id, "approve")?;
        fire::<Offer>(uow, offer.id, "send_to_candidate")?;
        uow.load::<Offer>(offer.id)
    })
    .expect("offer sent")
}

#[test]
fn acceptance_moves_the_application_to_offered() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::BackgroundCheck);
    let offer = sent_offer(&h, &application, Some(monday_morning() + Duration::days(7)));
    assert_eq!(offer.sent_at, Some(monday_morning()));
    assert!(h.dispatch.templates().contains(&"offer.sent"));

    h.advance(Duration::days(2));
    h.run(|uow| fire::<Offer>(uow, offer.id, "mark_accepted"))
        .expect("accepted");

    let accepted = h.load::<Offer>(offer.id);
    assert_eq!(accepted.status(), OfferStatus::Accepted);
    assert_eq!(accepted.responded_at, Some(monday_morning() + Duration::days(2)));
    assert_eq!(
        h.load::<Application>(application.id).status(),
        ApplicationStatus::Offered
    );
    assert!(h.dispatch.event_types().contains(&"offer.accepted".to_string()));
}

#[test]
fn acceptance_rolls_back_when_the_application_cannot_advance() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::Screening);
    let offer = sent_offer(&h, &application, None);

    match h.run(|uow| fire::<Offer>(uow, offer.id, "mark_accepted")) {
        Err(WorkflowError::IllegalTransition {
            state: "screening", ..
        }) => {}
        other => panic!("expected illegal transition, got {other:?}"),
    }
    assert_eq!(h.load::<Offer>(offer.id).status(), OfferStatus::Sent);
    assert!(h.load::<Offer>(offer.id).responded_at.is_none());
}

#[test]
fn expired_offers_cannot_be_accepted_and_are_swept() {
    let h = Harness::new();
    let job = open_job(&h, 2);
    let first = application_at(&h, &job, ApplicationStatus::BackgroundCheck);
    let second = application_at(&h, &job, ApplicationStatus::Assessment);
    let short = sent_offer(&h, &first, Some(monday_morning() + Duration::days(3)));
    let long = sent_offer(&h, &second, Some(monday_morning() + Duration::days(10)));

    match h.run(|uow| fire::<Offer>(uow, short.id, "check_expiration")) {
        Err(WorkflowError::GuardFailed { reason, .. }) => assert!(reason.contains("valid until")),
        other => panic!("expected guard failure, got {other:?}"),
    }

    h.advance(Duration::days(4));
    match h.run(|uow| fire::<Offer>(uow, short.id, "mark_accepted")) {
        Err(WorkflowError::GuardFailed {
            event: "mark_accepted",
            reason,
            ..
        }) => assert_eq!(reason, "offer has expired"),
        other => panic!("expected guard failure, got {other:?}"),
    }

    let swept = h
        .run(|uow| offer::expire_overdue(uow))
        .expect("sweep runs");
    assert_eq!(swept, vec![short.id]);

    let expired = h.load::<Offer>(short.id);
    assert_eq!(expired.status(), OfferStatus::Expired);
    assert_eq!(expired.expired_at, Some(monday_morning() + Duration::days(4)));
    assert_eq!(h.load::<Offer>(long.id).status(), OfferStatus::Sent);
}

#[test]
fn offers_validate_their_terms() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = application_at(&h, &job, ApplicationStatus::Interviewing);
    let new = |salary, expires_at| NewOffer {
        application_id: application.id,
        salary,
        start_date: None,
        expires_at,
    };

    match h.run(|uow| offer::create(uow, new(0, None))) {
        Err(WorkflowError::FieldValidation { field: "salary", .. }) => {}
        other => panic!("expected salary validation, got {other:?}"),
    }
    match h.run(|uow| offer::create(uow, new(90_000, Some(monday_morning())))) {
        Err(WorkflowError::FieldValidation {
            field: "expires_at", ..
        }) => {}
        other => panic!("expected expiry validation, got {other:?}"),
    }
}

#[test]
fn decline_and_withdraw_record_reasons() {
    let h = Harness::new();
    let job = open_job(&h, 2);
    let first = application_at(&h, &job, ApplicationStatus::BackgroundCheck);
    let second = application_at(&h, &job, ApplicationStatus::BackgroundCheck);
    let declined = sent_offer(&h, &first, None);
    let withdrawn = sent_offer(&h, &second, None);

    h.run(|uow| offer::decline(uow, declined.id, Some("Counter-offer".to_string())))
        .expect("declined");
    h.run(|uow| offer::withdraw(uow, withdrawn.id, Some("Role frozen".to_string())))
        .expect("withdrawn");

    let declined = h.load::<Offer>(declined.id);
    assert_eq!(declined.status(), OfferStatus::Declined);
    assert_eq!(declined.decline_reason.as_deref(), Some("Counter-offer"));

    let withdrawn = h.load::<Offer>(withdrawn.id);
    assert_eq!(withdrawn.status(), OfferStatus::Withdrawn);
    assert_eq!(withdrawn.withdrawal_reason.as_deref(), Some("Role frozen"));
    assert_eq!(h.load::<Job>(job.id).filled_count, 0);
}
