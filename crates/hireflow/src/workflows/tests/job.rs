use chrono::Duration;

use super::common::*;
use crate::engine::{fire, WorkflowError};
use crate::workflows::job::{self, Job, JobStatus, NewJob};

#[test]
fn create_rejects_blank_title_and_zero_headcount() {
    let h = Harness::new();

    match h.run(|uow| {
        job::create(
            uow,
            NewJob {
                title: "   ".to_string(),
                ..new_job(1)
            },
        )
    }) {
        Err(WorkflowError::FieldValidation { field: "title", .. }) => {}
        other => panic!("expected title validation, got {other:?}"),
    }

    match h.run(|uow| job::create(uow, new_job(0))) {
        Err(WorkflowError::FieldValidation {
            field: "headcount", ..
        }) => {}
        other => panic!("expected headcount validation, got {other:?}"),
    }
    assert!(h.audit_actions().is_empty(), "nothing is audited on rejection");
}

#[test]
fn opened_at_is_stamped_once_and_survives_reopen() {
    let h = Harness::new();
    let job = open_job(&h, 2);
    let first_opened = job.opened_at.expect("opened_at stamped");
    assert_eq!(first_opened, monday_morning());

    h.advance(Duration::days(3));
    h.run(|uow| fire::<Job>(uow, job.id, "put_on_hold")).expect("held");
    h.run(|uow| fire::<Job>(uow, job.id, "close")).expect("closed");
    let closed = h.load::<Job>(job.id);
    assert_eq!(closed.status(), JobStatus::Closed);
    assert_eq!(closed.closed_at, Some(monday_morning() + Duration::days(3)));

    h.advance(Duration::days(1));
    h.run(|uow| fire::<Job>(uow, job.id, "reopen")).expect("reopened");
    let reopened = h.load::<Job>(job.id);
    assert_eq!(reopened.status(), JobStatus::Open);
    assert_eq!(reopened.opened_at, Some(first_opened));
}

#[test]
fn every_transition_writes_a_status_change_entry() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    h.run(|uow| fire::<Job>(uow, job.id, "put_on_hold")).expect("held");

    assert_eq!(h.audit_count("job.status_changed"), 3);
    assert_eq!(h.audit_count("job.transition"), 3);

    let actions = h.audit_actions();
    let specific = actions
        .iter()
        .position(|action| action == "job.status_changed")
        .expect("status change present");
    let generic = actions
        .iter()
        .position(|action| action == "job.transition")
        .expect("generic present");
    assert!(specific < generic, "entity-specific entry is written first");
}

#[test]
fn illegal_events_leave_the_job_unchanged() {
    let h = Harness::new();
    let job = h.run(|uow| job::create(uow, new_job(1))).expect("draft job");

    for event in ["approve", "reopen", "put_on_hold", "close"] {
        match h.run(|uow| fire::<Job>(uow, job.id, event)) {
            Err(WorkflowError::IllegalTransition { state: "draft", .. }) => {}
            other => panic!("expected illegal transition for {event}, got {other:?}"),
        }
    }
    assert_eq!(h.load::<Job>(job.id), job);
}

#[test]
fn rejected_requisition_returns_to_draft_and_can_be_resubmitted() {
    let h = Harness::new();
    let job = h.run(|uow| job::create(uow, new_job(1))).expect("draft job");

    h.run(|uow| job::submit_for_approval(uow, job.id, &[]))
        .expect("submitted");
    h.run(|uow| fire::<Job>(uow, job.id, "reject")).expect("rejected");
    assert_eq!(h.load::<Job>(job.id).status(), JobStatus::Draft);

    h.run(|uow| job::submit_for_approval(uow, job.id, &[]))
        .expect("resubmitted");
    let resubmitted = h.load::<Job>(job.id);
    assert_eq!(resubmitted.status(), JobStatus::PendingApproval);
    assert_eq!(resubmitted.approval_round, 2);
}
