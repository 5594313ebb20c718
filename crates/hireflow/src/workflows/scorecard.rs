//! Interviewer scorecards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::interview::{self, Interview, InterviewStatus};
use crate::engine::{
    workflow_states, EventDefinition, Guard, Hook, MachineDefinition, StatusToken, Transition,
    WorkflowEntity, WorkflowError, WorkflowState,
};
use crate::ids::{EntityKind, InterviewId, OrganizationId, ScorecardId, UserId};
use crate::store::{stored_entity, Stored, UnitOfWork};

workflow_states! {
    pub enum ScorecardStatus {
        Draft => "draft",
        Submitted => "submitted",
        Locked => "locked",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongYes,
    Yes,
    No,
    StrongNo,
}

/// One prompt from the scorecard template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateItem {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScorecardItem {
    pub key: String,
    pub label: String,
    pub required: bool,
    /// 1 (poor) to 4 (excellent).
    pub rating: Option<u8>,
    pub notes: Option<String>,
}

impl ScorecardItem {
    pub fn has_response(&self) -> bool {
        self.rating.is_some()
            || self
                .notes
                .as_deref()
                .map_or(false, |notes| !notes.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scorecard {
    pub id: ScorecardId,
    pub organization_id: OrganizationId,
    pub interview_id: InterviewId,
    pub interviewer_id: UserId,
    pub items: Vec<ScorecardItem>,
    pub recommendation: Option<Recommendation>,
    pub summary: Option<String>,
    status: ScorecardStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Scorecard {
    pub fn status(&self) -> ScorecardStatus {
        self.status
    }

    pub fn missing_required(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| item.required && !item.has_response())
            .map(|item| item.key.as_str())
            .collect()
    }
}

stored_entity!(Scorecard, ScorecardId, EntityKind::Scorecard, scorecards);

impl WorkflowEntity for Scorecard {
    type State = ScorecardStatus;

    fn status(&self) -> ScorecardStatus {
        self.status
    }

    fn set_status(&mut self, status: ScorecardStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &SCORECARD_MACHINE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewScorecard {
    pub interview_id: InterviewId,
    pub interviewer_id: UserId,
    pub template: Vec<TemplateItem>,
}

pub static SCORECARD_MACHINE: MachineDefinition<Scorecard> = MachineDefinition {
    name: "scorecard",
    initial: ScorecardStatus::Draft,
    events: &[
        EventDefinition {
            name: "submit",
            from: &[ScorecardStatus::Draft],
            to: ScorecardStatus::Submitted,
            guard: Some(Guard {
                name: "ready_to_submit",
                check: ready_to_submit,
            }),
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_submitted_at",
                    run: stamp_submitted_at,
                },
                Hook {
                    name: "mark_feedback_submitted",
                    run: mark_feedback_submitted,
                },
            ],
        },
        EventDefinition {
            name: "lock_scorecard",
            from: &[ScorecardStatus::Submitted],
            to: ScorecardStatus::Locked,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_locked_at",
                run: stamp_locked_at,
            }],
        },
        EventDefinition {
            name: "unlock_scorecard",
            from: &[ScorecardStatus::Locked],
            to: ScorecardStatus::Submitted,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "clear_locked_at",
                run: clear_locked_at,
            }],
        },
        EventDefinition {
            name: "revert_to_draft",
            from: &[ScorecardStatus::Submitted],
            to: ScorecardStatus::Draft,
            guard: None,
            then: None,
            hooks: &[],
        },
    ],
};

pub fn create(uow: &mut UnitOfWork<'_>, new: NewScorecard) -> Result<Scorecard, WorkflowError> {
    let interview = uow.get::<Interview>(new.interview_id)?;
    if interview.participant(new.interviewer_id).is_none() {
        return Err(WorkflowError::invalid(
            "interviewer_id",
            format!("{} is not a participant of interview {}", new.interviewer_id, interview.id),
        ));
    }

    let duplicate = uow.scan::<Scorecard>().into_iter().any(|existing| {
        existing.interview_id == new.interview_id && existing.interviewer_id == new.interviewer_id
    });
    if duplicate {
        return Err(WorkflowError::UniquenessViolation(format!(
            "interviewer {} already has a scorecard for interview {}",
            new.interviewer_id, new.interview_id
        )));
    }

    let mut items: Vec<ScorecardItem> = Vec::with_capacity(new.template.len());
    for template in new.template {
        if items.iter().any(|item| item.key == template.key) {
            return Err(WorkflowError::invalid(
                "template",
                format!("duplicate item key '{}'", template.key),
            ));
        }
        items.push(ScorecardItem {
            key: template.key,
            label: template.label,
            required: template.required,
            rating: None,
            notes: None,
        });
    }

    let scorecard = Scorecard {
        id: ScorecardId::new(),
        organization_id: uow.ctx().organization_id(),
        interview_id: new.interview_id,
        interviewer_id: new.interviewer_id,
        items,
        recommendation: None,
        summary: None,
        status: SCORECARD_MACHINE.initial,
        submitted_at: None,
        locked_at: None,
    };
    uow.insert(scorecard.clone())?;
    Ok(scorecard)
}

/// Record a rating and/or notes for one template item. Draft scorecards only.
pub fn record_response(
    uow: &mut UnitOfWork<'_>,
    id: ScorecardId,
    key: &str,
    rating: Option<u8>,
    notes: Option<String>,
) -> Result<Scorecard, WorkflowError> {
    if let Some(rating) = rating {
        if !(1..=4).contains(&rating) {
            return Err(WorkflowError::invalid("rating", "must be between 1 and 4"));
        }
    }
    edit_draft(uow, id, "record_response", |scorecard| {
        let item = scorecard
            .items
            .iter_mut()
            .find(|item| item.key == key)
            .ok_or_else(|| WorkflowError::invalid("key", format!("unknown item '{key}'")))?;
        item.rating = rating;
        item.notes = notes;
        Ok(())
    })
}

pub fn set_recommendation(
    uow: &mut UnitOfWork<'_>,
    id: ScorecardId,
    recommendation: Recommendation,
    summary: impl Into<String>,
) -> Result<Scorecard, WorkflowError> {
    let summary = summary.into();
    edit_draft(uow, id, "set_recommendation", |scorecard| {
        scorecard.recommendation = Some(recommendation);
        scorecard.summary = Some(summary);
        Ok(())
    })
}

fn edit_draft<F>(
    uow: &mut UnitOfWork<'_>,
    id: ScorecardId,
    operation: &str,
    change: F,
) -> Result<Scorecard, WorkflowError>
where
    F: FnOnce(&mut Scorecard) -> Result<(), WorkflowError>,
{
    let scorecard = uow.get::<Scorecard>(id)?;
    if scorecard.status != ScorecardStatus::Draft {
        return Err(WorkflowError::IllegalTransition {
            entity: scorecard.entity_ref(),
            state: scorecard.status.label(),
            event: operation.to_string(),
        });
    }
    uow.update::<Scorecard, _>(id, change)
}

fn ready_to_submit(scorecard: &Scorecard, uow: &UnitOfWork<'_>) -> Result<(), String> {
    let interview = uow
        .get::<Interview>(scorecard.interview_id)
        .map_err(|err| err.to_string())?;
    if interview.status() != InterviewStatus::Completed {
        return Err(format!("interview is {}, not completed", interview.status()));
    }
    if scorecard.recommendation.is_none() {
        return Err("a recommendation is required".to_string());
    }
    if scorecard
        .summary
        .as_deref()
        .map_or(true, |summary| summary.trim().is_empty())
    {
        return Err("a summary is required".to_string());
    }
    let missing = scorecard.missing_required();
    if !missing.is_empty() {
        return Err(format!("missing responses for: {}", missing.join(", ")));
    }
    Ok(())
}

fn stamp_submitted_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Scorecard>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Scorecard, _>(transition.id, |scorecard| {
        scorecard.submitted_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn mark_feedback_submitted(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Scorecard>,
) -> Result<(), WorkflowError> {
    let scorecard = uow.get::<Scorecard>(transition.id)?;
    let (interview_id, interviewer_id) = (scorecard.interview_id, scorecard.interviewer_id);
    interview::mark_feedback_submitted(uow, interview_id, interviewer_id)
}

fn stamp_locked_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Scorecard>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Scorecard, _>(transition.id, |scorecard| {
        scorecard.locked_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn clear_locked_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Scorecard>,
) -> Result<(), WorkflowError> {
    uow.update::<Scorecard, _>(transition.id, |scorecard| {
        scorecard.locked_at = None;
        Ok(())
    })?;
    Ok(())
}
