use uuid::Uuid;

use super::common::*;
use crate::audit::AuditQuery;
use crate::engine::{fire, WorkflowError};
use crate::ids::{EntityKind, OrganizationId};
use crate::workflows::application::{Application, ApplicationStatus};
use crate::workflows::job::{Job, JobStatus};
use crate::workflows::{self, fire_by_name, machines};

#[test]
fn unknown_events_name_the_machine() {
    let h = Harness::new();
    let job = open_job(&h, 1);

    match h.run(|uow| fire::<Job>(uow, job.id, "launch")) {
        Err(WorkflowError::UnknownEvent { machine, event }) => {
            assert_eq!(machine, "job");
            assert_eq!(event, "launch");
        }
        other => panic!("expected unknown event, got {other:?}"),
    }
}

#[test]
fn same_inputs_produce_the_same_history() {
    let run = || {
        let h = Harness::new();
        let job = open_job(&h, 1);
        let application = application_at(&h, &job, ApplicationStatus::Offered);
        h.run(|uow| fire::<Application>(uow, application.id, "move_back_to_interviewing"))
            .expect("moved back");
        let illegal = h.run(|uow| fire::<Application>(uow, application.id, "hire"));
        (
            h.load::<Application>(application.id).status(),
            illegal.map_err(|err| err.kind()),
            h.audit_actions(),
            h.dispatch.event_types(),
        )
    };

    assert_eq!(run(), run());
}

#[test]
fn other_organizations_cannot_see_or_move_entities() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let intruder = crate::context::TenantContext::system(OrganizationId::new());

    match h.store.load::<Job>(&intruder, job.id) {
        Err(WorkflowError::NotFound {
            kind: EntityKind::Job,
            id,
        }) => assert_eq!(id, job.id.0),
        other => panic!("expected not found, got {other:?}"),
    }
    match h
        .store
        .transaction(&intruder, |uow| fire::<Job>(uow, job.id, "close"))
    {
        Err(WorkflowError::NotFound { .. }) => {}
        other => panic!("expected not found, got {other:?}"),
    }
    let visible = h
        .store
        .read(&intruder, |uow| Ok(uow.scan::<Job>().len()))
        .expect("scan runs");
    assert_eq!(visible, 0);
    assert_eq!(h.load::<Job>(job.id).status(), JobStatus::Open);

    let foreign = h
        .store
        .query_audit(&AuditQuery::for_organization(intruder.organization_id()))
        .expect("audit readable");
    assert!(foreign.is_empty());
}

#[test]
fn best_effort_audit_failure_still_commits() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let before = h.audit.entries().len();

    h.audit.fail(AuditFailure::All);
    h.run(|uow| fire::<Job>(uow, job.id, "put_on_hold"))
        .expect("transition commits without its audit entries");

    assert_eq!(h.load::<Job>(job.id).status(), JobStatus::OnHold);
    assert_eq!(h.audit.entries().len(), before);
}

#[test]
fn required_audit_failure_aborts_the_operation() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = apply(&h, &job);

    h.audit.fail(AuditFailure::All);
    match h.run(|uow| fire::<Application>(uow, application.id, "advance_to_screening")) {
        Err(WorkflowError::Audit(_)) => {}
        other => panic!("expected audit failure, got {other:?}"),
    }

    h.audit.fail(AuditFailure::None);
    assert_eq!(
        h.load::<Application>(application.id).status(),
        ApplicationStatus::New
    );
    assert!(!h
        .dispatch
        .event_types()
        .contains(&"application.screening".to_string()));
}

#[test]
fn required_entries_survive_when_only_best_effort_ones_fail() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let application = apply(&h, &job);

    h.audit
        .fail(AuditFailure::Action("application.transition".to_string()));
    h.run(|uow| fire::<Application>(uow, application.id, "advance_to_screening"))
        .expect("commits with required entries only");

    assert_eq!(
        h.load::<Application>(application.id).status(),
        ApplicationStatus::Screening
    );
    assert_eq!(h.audit_count("stage_transition.created"), 2);
    assert_eq!(h.audit_count("application.transition"), 0);
}

#[test]
fn audit_entries_carry_the_acting_context() {
    let h = Harness::new();
    let job = open_job(&h, 1);

    let entries = h
        .store
        .query_audit(&AuditQuery {
            action: Some("job.transition".to_string()),
            ..AuditQuery::for_organization(h.organization_id)
        })
        .expect("audit readable");
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.actor_id(), Some(h.recruiter));
        assert_eq!(entry.subject().id, job.id.0);
        assert_eq!(entry.created_at(), monday_morning());
    }
}

#[test]
fn fire_by_name_dispatches_to_the_registered_machine() {
    let h = Harness::new();
    let job = open_job(&h, 1);

    let status = h
        .run(|uow| fire_by_name(uow, "job", job.id.0, "put_on_hold"))
        .expect("fired by name");
    assert_eq!(status, "on_hold");

    match h.run(|uow| fire_by_name(uow, "payroll", job.id.0, "run")) {
        Err(WorkflowError::FieldValidation { field: "machine", .. }) => {}
        other => panic!("expected unknown machine, got {other:?}"),
    }
    match h.run(|uow| fire_by_name(uow, "offer", Uuid::new_v4(), "approve")) {
        Err(WorkflowError::NotFound {
            kind: EntityKind::Offer,
            ..
        }) => {}
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test]
fn every_registered_machine_is_well_formed() {
    assert_eq!(machines().len(), 10);
    for machine in machines() {
        let unreachable = machine
            .check()
            .unwrap_or_else(|err| panic!("{} is malformed: {err}", machine.name()));
        assert!(
            unreachable.is_empty(),
            "{} has unreachable states: {unreachable:?}",
            machine.name()
        );

        let diagram = machine.mermaid();
        assert!(diagram.starts_with("stateDiagram-v2"));
        assert!(diagram.contains(&format!("[*] --> {}", machine.summary().initial)));
    }
    assert!(workflows::machine("hiring_decision").is_some());
    assert!(workflows::machine("payroll").is_none());
}
