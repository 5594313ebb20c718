use chrono::{DateTime, Duration, Utc};

use super::common::*;
use crate::engine::{fire, WorkflowError};
use crate::ids::{ApplicationId, UserId};
use crate::workflows::application::{self, ApplicationStatus};
use crate::workflows::interview::{self, Interview, InterviewStatus, NewInterview};
use crate::workflows::scorecard::{
    self, NewScorecard, Recommendation, Scorecard, ScorecardStatus, TemplateItem,
};

fn slot(days: i64) -> DateTime<Utc> {
    monday_morning() + Duration::days(days)
}

fn schedule(
    h: &Harness,
    application_id: ApplicationId,
    at: DateTime<Utc>,
    interviewers: Vec<UserId>,
) -> Result<Interview, WorkflowError> {
    h.run(|uow| {
        interview::schedule(
            uow,
            NewInterview {
                application_id,
                scheduled_at: at,
                duration_minutes: 60,
                location: Some("Room 4".to_string()),
                interviewers,
            },
        )
    })
}

fn template() -> Vec<TemplateItem> {
    vec![
        TemplateItem {
            key: "system_design".to_string(),
            label: "System design".to_string(),
            required: true,
        },
        TemplateItem {
            key: "communication".to_string(),
            label: "Communication".to_string(),
            required: false,
        },
    ]
}

#[test]
fn scheduling_rejects_past_overlapping_and_inactive_slots() {
    let h = Harness::new();
    let job = open_job(&h, 2);
    let active = application_at(&h, &job, ApplicationStatus::Interviewing);
    let interviewer = UserId::new();

    match schedule(&h, active.id, monday_morning() - Duration::hours(1), vec![interviewer]) {
        Err(WorkflowError::GuardFailed {
            event: "schedule_interview",
            reason,
            ..
        }) => assert!(reason.contains("future")),
        other => panic!("expected guard failure, got {other:?}"),
    }

    let booked = schedule(&h, active.id, slot(1), vec![interviewer]).expect("first slot");
    match schedule(&h, active.id, slot(1) + Duration::minutes(30), vec![interviewer]) {
        Err(WorkflowError::GuardFailed { reason, .. }) => {
            assert!(reason.contains(&booked.id.to_string()))
        }
        other => panic!("expected overlap failure, got {other:?}"),
    }
    schedule(&h, active.id, slot(1) + Duration::minutes(60), vec![interviewer])
        .expect("back-to-back slot is free");

    h.run(|uow| interview::cancel(uow, booked.id, Some("Panel sick".to_string())))
        .expect("cancelled");
    schedule(&h, active.id, slot(1), vec![interviewer]).expect("cancelled slot is free again");

    let rejected = application_at(&h, &job, ApplicationStatus::Screening);
    h.run(|uow| application::reject(uow, rejected.id, None))
        .expect("rejected");
    match schedule(&h, rejected.id, slot(2), vec![interviewer]) {
        Err(WorkflowError::GuardFailed { reason, .. }) => assert!(reason.contains("rejected")),
        other => panic!("expected inactive application failure, got {other:?}"),
    }
}

#[test]
fn scheduled_interviews_are_published() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let active = application_at(&h, &job, ApplicationStatus::Interviewing);
    schedule(&h, active.id, slot(1), vec![UserId::new()]).expect("scheduled");

    assert!(h
        .dispatch
        .event_types()
        .contains(&"interview.scheduled".to_string()));
    assert_eq!(h.audit_count("interview.scheduled"), 1);
}

#[test]
fn completion_requests_feedback_from_each_interviewer() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let active = application_at(&h, &job, ApplicationStatus::Interviewing);
    let (lead, shadow) = (UserId::new(), UserId::new());
    let booked = schedule(&h, active.id, slot(1), vec![lead, shadow, lead]).expect("scheduled");
    assert_eq!(booked.participants.len(), 2, "duplicate interviewers collapse");

    h.run(|uow| fire::<Interview>(uow, booked.id, "confirm"))
        .expect("confirmed");
    h.advance(Duration::days(1) + Duration::hours(1));
    h.run(|uow| fire::<Interview>(uow, booked.id, "complete"))
        .expect("completed");

    let completed = h.load::<Interview>(booked.id);
    assert_eq!(completed.status(), InterviewStatus::Completed);
    assert_eq!(completed.completed_at, Some(slot(1) + Duration::hours(1)));

    let requested = h
        .dispatch
        .notifications()
        .into_iter()
        .filter(|notification| notification.template == "interview.feedback_requested")
        .count();
    assert_eq!(requested, 2);
}

#[test]
fn scorecard_submission_waits_for_completion_and_required_answers() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let active = application_at(&h, &job, ApplicationStatus::Interviewing);
    let (lead, shadow) = (UserId::new(), UserId::new());
    let booked = schedule(&h, active.id, slot(1), vec![lead, shadow]).expect("scheduled");

    let card = h
        .run(|uow| {
            scorecard::create(
                uow,
                NewScorecard {
                    interview_id: booked.id,
                    interviewer_id: lead,
                    template: template(),
                },
            )
        })
        .expect("scorecard created");

    h.run(|uow| {
        scorecard::set_recommendation(uow, card.id, Recommendation::Yes, "Solid fundamentals")
    })
    .expect("recommendation set");

    match h.run(|uow| fire::<Scorecard>(uow, card.id, "submit")) {
        Err(WorkflowError::GuardFailed { reason, .. }) => {
            assert!(reason.contains("not completed"))
        }
        other => panic!("expected guard failure, got {other:?}"),
    }

    h.advance(Duration::days(2));
    h.run(|uow| fire::<Interview>(uow, booked.id, "complete"))
        .expect("completed");

    match h.run(|uow| fire::<Scorecard>(uow, card.id, "submit")) {
        Err(WorkflowError::GuardFailed { reason, .. }) => {
            assert!(reason.contains("system_design"))
        }
        other => panic!("expected missing answer failure, got {other:?}"),
    }

    match h.run(|uow| scorecard::record_response(uow, card.id, "system_design", Some(5), None)) {
        Err(WorkflowError::FieldValidation { field: "rating", .. }) => {}
        other => panic!("expected rating validation, got {other:?}"),
    }
    h.run(|uow| scorecard::record_response(uow, card.id, "system_design", Some(3), None))
        .expect("answered");
    h.run(|uow| fire::<Scorecard>(uow, card.id, "submit"))
        .expect("submitted");

    let submitted = h.load::<Scorecard>(card.id);
    assert_eq!(submitted.status(), ScorecardStatus::Submitted);
    assert_eq!(submitted.submitted_at, Some(slot(2)));

    let interview = h.load::<Interview>(booked.id);
    let feedback = interview.participant(lead).expect("lead participates");
    assert!(feedback.feedback_submitted);
    assert_eq!(feedback.feedback_submitted_at, Some(slot(2)));
    assert_eq!(interview.pending_feedback(), vec![shadow]);

    match h.run(|uow| scorecard::record_response(uow, card.id, "communication", Some(4), None)) {
        Err(WorkflowError::IllegalTransition {
            state: "submitted", ..
        }) => {}
        other => panic!("expected submitted scorecard to be read-only, got {other:?}"),
    }
}

#[test]
fn scorecards_belong_to_participants_only_once() {
    let h = Harness::new();
    let job = open_job(&h, 1);
    let active = application_at(&h, &job, ApplicationStatus::Interviewing);
    let lead = UserId::new();
    let booked = schedule(&h, active.id, slot(1), vec![lead]).expect("scheduled");
    let new_card = |interviewer_id| NewScorecard {
        interview_id: booked.id,
        interviewer_id,
        template: template(),
    };

    match h.run(|uow| scorecard::create(uow, new_card(UserId::new()))) {
        Err(WorkflowError::FieldValidation {
            field: "interviewer_id",
            ..
        }) => {}
        other => panic!("expected participant validation, got {other:?}"),
    }
    h.run(|uow| scorecard::create(uow, new_card(lead)))
        .expect("first scorecard");
    match h.run(|uow| scorecard::create(uow, new_card(lead))) {
        Err(WorkflowError::UniquenessViolation(_)) => {}
        other => panic!("expected uniqueness violation, got {other:?}"),
    }
}
