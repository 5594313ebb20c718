//! FCRA adverse-action notices.
//!
//! Sending the pre-adverse notice is followed by `start_waiting_period` in the
//! same transaction. The final notice can only go out once that period has
//! elapsed, and it rejects the application if it is still in the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::application::Application;
use super::orchestrator;
use crate::audit::{self, AuditRecord};
use crate::calendar;
use crate::engine::{
    fire, fire_with, workflow_states, EventDefinition, Guard, Hook, MachineDefinition,
    StatusToken, Transition, WorkflowEntity, WorkflowError, WorkflowState,
};
use crate::ids::{AdverseActionId, ApplicationId, EntityKind, EntityRef, OrganizationId};
use crate::store::{stored_entity, Stored, UnitOfWork};

workflow_states! {
    pub enum AdverseActionStatus {
        Draft => "draft",
        PreAdverseSent => "pre_adverse_sent",
        WaitingPeriod => "waiting_period",
        FinalSent => "final_sent",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Email,
    Mail,
    Portal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispute {
    pub details: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdverseAction {
    pub id: AdverseActionId,
    pub organization_id: OrganizationId,
    pub application_id: ApplicationId,
    status: AdverseActionStatus,
    pub reason: String,
    pub waiting_period_days: u32,
    pub notice_content: Option<String>,
    pub delivery_method: Option<DeliveryMethod>,
    pub pre_adverse_sent_at: Option<DateTime<Utc>>,
    pub waiting_period_ends_at: Option<DateTime<Utc>>,
    pub dispute: Option<Dispute>,
    pub final_sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AdverseAction {
    pub fn status(&self) -> AdverseActionStatus {
        self.status
    }

    pub fn waiting_period_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.waiting_period_ends_at.map_or(false, |ends_at| now > ends_at)
    }
}

stored_entity!(
    AdverseAction,
    AdverseActionId,
    EntityKind::AdverseAction,
    adverse_actions
);

impl WorkflowEntity for AdverseAction {
    type State = AdverseActionStatus;

    fn status(&self) -> AdverseActionStatus {
        self.status
    }

    fn set_status(&mut self, status: AdverseActionStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &ADVERSE_ACTION_MACHINE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAdverseAction {
    pub application_id: ApplicationId,
    pub reason: String,
    /// Falls back to the configured FCRA waiting period.
    #[serde(default)]
    pub waiting_period_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreAdverseNotice {
    pub content: String,
    pub delivery_method: DeliveryMethod,
}

use AdverseActionStatus::{Cancelled, Completed, Draft, FinalSent, PreAdverseSent, WaitingPeriod};

pub static ADVERSE_ACTION_MACHINE: MachineDefinition<AdverseAction> = MachineDefinition {
    name: "adverse_action",
    initial: Draft,
    events: &[
        EventDefinition {
            name: "send_pre_adverse",
            from: &[Draft],
            to: PreAdverseSent,
            guard: Some(Guard {
                name: "notice_recorded",
                check: notice_recorded,
            }),
            then: Some("start_waiting_period"),
            hooks: &[Hook {
                name: "deliver_pre_adverse_notice",
                run: deliver_pre_adverse_notice,
            }],
        },
        EventDefinition {
            name: "start_waiting_period",
            from: &[PreAdverseSent],
            to: WaitingPeriod,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "set_waiting_period_end",
                run: set_waiting_period_end,
            }],
        },
        EventDefinition {
            name: "send_final_adverse",
            from: &[WaitingPeriod],
            to: FinalSent,
            guard: Some(Guard {
                name: "waiting_period_elapsed",
                check: waiting_period_elapsed,
            }),
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_final_sent_at",
                    run: stamp_final_sent_at,
                },
                orchestrator::REJECT_APPLICATION_AFTER_FINAL_NOTICE,
            ],
        },
        EventDefinition {
            name: "complete",
            from: &[FinalSent],
            to: Completed,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_completed_at",
                run: stamp_completed_at,
            }],
        },
        EventDefinition {
            name: "cancel",
            from: &[Draft, PreAdverseSent, WaitingPeriod, FinalSent],
            to: Cancelled,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_cancelled_at",
                run: stamp_cancelled_at,
            }],
        },
    ],
};

pub fn create(
    uow: &mut UnitOfWork<'_>,
    new: NewAdverseAction,
) -> Result<AdverseAction, WorkflowError> {
    if new.reason.trim().is_empty() {
        return Err(WorkflowError::invalid("reason", "must not be blank"));
    }
    let waiting_period_days = new
        .waiting_period_days
        .unwrap_or(uow.config().fcra_waiting_period_days);
    if waiting_period_days == 0 {
        return Err(WorkflowError::invalid(
            "waiting_period_days",
            "must be at least one business day",
        ));
    }
    uow.get::<Application>(new.application_id)?;

    let action = AdverseAction {
        id: AdverseActionId::new(),
        organization_id: uow.ctx().organization_id(),
        application_id: new.application_id,
        status: ADVERSE_ACTION_MACHINE.initial,
        reason: new.reason,
        waiting_period_days,
        notice_content: None,
        delivery_method: None,
        pre_adverse_sent_at: None,
        waiting_period_ends_at: None,
        dispute: None,
        final_sent_at: None,
        completed_at: None,
        cancelled_at: None,
        notes: None,
        created_at: uow.now(),
    };
    uow.insert(action.clone())?;

    audit::record(
        uow,
        AuditRecord::new(
            "adverse_action.created",
            EntityRef::new(EntityKind::AdverseAction, action.id),
        )
        .with_metadata("application_id", action.application_id.to_string())
        .with_metadata("waiting_period_days", waiting_period_days),
    );
    Ok(action)
}

/// Send the pre-adverse notice. The waiting period starts in the same transition.
pub fn send_pre_adverse(
    uow: &mut UnitOfWork<'_>,
    id: AdverseActionId,
    notice: PreAdverseNotice,
) -> Result<AdverseActionStatus, WorkflowError> {
    if notice.content.trim().is_empty() {
        return Err(WorkflowError::invalid("notice_content", "must not be blank"));
    }
    fire_with::<AdverseAction, _>(uow, id, "send_pre_adverse", |action| {
        action.notice_content = Some(notice.content);
        action.delivery_method = Some(notice.delivery_method);
        Ok(())
    })
}

/// Record the candidate's dispute. Only accepted while the waiting period runs.
pub fn record_dispute(
    uow: &mut UnitOfWork<'_>,
    id: AdverseActionId,
    details: &str,
) -> Result<AdverseAction, WorkflowError> {
    if details.trim().is_empty() {
        return Err(WorkflowError::invalid("details", "must not be blank"));
    }
    let action = uow.get::<AdverseAction>(id)?;
    if action.status != WaitingPeriod {
        return Err(WorkflowError::IllegalTransition {
            entity: action.entity_ref(),
            state: action.status.label(),
            event: "record_dispute".to_string(),
        });
    }

    let now = uow.now();
    let updated = uow.update::<AdverseAction, _>(id, |action| {
        action.dispute = Some(Dispute {
            details: details.to_string(),
            received_at: now,
        });
        Ok(())
    })?;
    audit::record_required(
        uow,
        AuditRecord::new("adverse_action.dispute_recorded", updated.entity_ref())
            .with_metadata("received_at", now.to_rfc3339()),
    );
    Ok(updated)
}

pub fn send_final_adverse(
    uow: &mut UnitOfWork<'_>,
    id: AdverseActionId,
) -> Result<AdverseActionStatus, WorkflowError> {
    fire::<AdverseAction>(uow, id, "send_final_adverse")
}

pub fn complete(
    uow: &mut UnitOfWork<'_>,
    id: AdverseActionId,
) -> Result<AdverseActionStatus, WorkflowError> {
    fire::<AdverseAction>(uow, id, "complete")
}

/// Cancel the action. The reason is appended to any existing notes.
pub fn cancel(
    uow: &mut UnitOfWork<'_>,
    id: AdverseActionId,
    reason: Option<&str>,
) -> Result<AdverseActionStatus, WorkflowError> {
    fire_with::<AdverseAction, _>(uow, id, "cancel", |action| {
        if let Some(reason) = reason.filter(|reason| !reason.trim().is_empty()) {
            let line = format!("Cancelled: {reason}");
            action.notes = Some(match action.notes.take() {
                Some(notes) if !notes.is_empty() => format!("{notes}\n{line}"),
                _ => line,
            });
        }
        Ok(())
    })
}

/// Change the waiting period length and recompute its end from the original
/// send date.
pub fn correct_waiting_period(
    uow: &mut UnitOfWork<'_>,
    id: AdverseActionId,
    waiting_period_days: u32,
    reason: &str,
) -> Result<Option<DateTime<Utc>>, WorkflowError> {
    if reason.trim().is_empty() {
        return Err(WorkflowError::invalid("reason", "a correction reason is required"));
    }
    if waiting_period_days == 0 {
        return Err(WorkflowError::invalid(
            "waiting_period_days",
            "must be at least one business day",
        ));
    }

    let before = uow.get::<AdverseAction>(id)?.clone();
    if matches!(before.status, FinalSent | Completed | Cancelled) {
        return Err(WorkflowError::invalid(
            "waiting_period_days",
            format!("cannot be corrected once the action is {}", before.status),
        ));
    }

    let ends_at = before.pre_adverse_sent_at.map(|sent_at| {
        calendar::end_of_day(calendar::deadline(sent_at.date_naive(), waiting_period_days))
    });
    uow.update::<AdverseAction, _>(id, |action| {
        action.waiting_period_days = waiting_period_days;
        action.waiting_period_ends_at = ends_at;
        Ok(())
    })?;

    audit::record_required(
        uow,
        AuditRecord::new("adverse_action.waiting_period_corrected", before.entity_ref())
            .with_metadata("reason", reason)
            .with_change(
                "waiting_period_days",
                before.waiting_period_days,
                waiting_period_days,
            )
            .with_change(
                "waiting_period_ends_at",
                before.waiting_period_ends_at.map(|at| at.to_rfc3339()),
                ends_at.map(|at| at.to_rfc3339()),
            ),
    );
    Ok(ends_at)
}

fn waiting_period_elapsed(action: &AdverseAction, uow: &UnitOfWork<'_>) -> Result<(), String> {
    match action.waiting_period_ends_at {
        Some(_) if action.waiting_period_elapsed(uow.now()) => Ok(()),
        Some(ends_at) => Err(format!(
            "waiting period not elapsed, ends {}",
            ends_at.to_rfc3339()
        )),
        None => Err("waiting period has not started".to_string()),
    }
}

fn notice_recorded(action: &AdverseAction, _uow: &UnitOfWork<'_>) -> Result<(), String> {
    let has_content = action
        .notice_content
        .as_deref()
        .is_some_and(|content| !content.trim().is_empty());
    match (has_content, action.delivery_method) {
        (true, Some(_)) => Ok(()),
        (false, _) => Err("notice content is required".to_string()),
        (true, None) => Err("delivery method is required".to_string()),
    }
}

fn deliver_pre_adverse_notice(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<AdverseAction>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    let action = uow.update::<AdverseAction, _>(transition.id, |action| {
        action.pre_adverse_sent_at = Some(now);
        Ok(())
    })?;
    uow.notify(
        "adverse_action.pre_adverse_notice",
        transition.subject,
        json!({
            "application_id": action.application_id,
            "delivery_method": action.delivery_method,
        }),
    );
    Ok(())
}

fn set_waiting_period_end(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<AdverseAction>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<AdverseAction, _>(transition.id, |action| {
        let sent_on = action.pre_adverse_sent_at.unwrap_or(now).date_naive();
        let ends_at =
            calendar::end_of_day(calendar::deadline(sent_on, action.waiting_period_days));
        action.waiting_period_ends_at.get_or_insert(ends_at);
        Ok(())
    })?;
    Ok(())
}

fn stamp_final_sent_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<AdverseAction>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<AdverseAction, _>(transition.id, |action| {
        action.final_sent_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_completed_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<AdverseAction>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<AdverseAction, _>(transition.id, |action| {
        action.completed_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_cancelled_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<AdverseAction>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<AdverseAction, _>(transition.id, |action| {
        action.cancelled_at = Some(now);
        Ok(())
    })?;
    Ok(())
}
