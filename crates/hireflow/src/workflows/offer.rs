//! Offer lifecycle, including its approval round and expiry.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::application::Application;
use super::approval::{self, ApprovalParent};
use super::orchestrator;
use crate::engine::{
    fire, fire_with, workflow_states, EventDefinition, Guard, Hook, MachineDefinition,
    StatusToken, Transition, WorkflowEntity, WorkflowError,
};
use crate::ids::{ApplicationId, EntityKind, OfferId, OrganizationId, UserId};
use crate::store::{stored_entity, Stored, UnitOfWork};

workflow_states! {
    pub enum OfferStatus {
        Draft => "draft",
        PendingApproval => "pending_approval",
        Approved => "approved",
        Sent => "sent",
        Accepted => "accepted",
        Declined => "declined",
        Expired => "expired",
        Withdrawn => "withdrawn",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub id: OfferId,
    pub organization_id: OrganizationId,
    pub application_id: ApplicationId,
    /// Annual base salary in whole currency units.
    pub salary: u64,
    pub start_date: Option<NaiveDate>,
    pub expires_at: Option<DateTime<Utc>>,
    status: OfferStatus,
    pub approval_round: u32,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub withdrawal_reason: Option<String>,
}

impl Offer {
    pub fn status(&self) -> OfferStatus {
        self.status
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| now > expires_at)
    }
}

stored_entity!(Offer, OfferId, EntityKind::Offer, offers);

impl WorkflowEntity for Offer {
    type State = OfferStatus;

    fn status(&self) -> OfferStatus {
        self.status
    }

    fn set_status(&mut self, status: OfferStatus, _token: StatusToken) {
        self.status = status;
    }

    fn machine() -> &'static MachineDefinition<Self> {
        &OFFER_MACHINE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOffer {
    pub application_id: ApplicationId,
    pub salary: u64,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

use OfferStatus::{Accepted, Approved, Declined, Draft, Expired, PendingApproval, Sent, Withdrawn};

const NOT_EXPIRED: Guard<Offer> = Guard {
    name: "not_expired",
    check: not_expired,
};

pub static OFFER_MACHINE: MachineDefinition<Offer> = MachineDefinition {
    name: "offer",
    initial: Draft,
    events: &[
        EventDefinition {
            name: "submit_for_approval",
            from: &[Draft],
            to: PendingApproval,
            guard: None,
            then: None,
            hooks: &[],
        },
        EventDefinition {
            name: "approve",
            from: &[PendingApproval],
            to: Approved,
            guard: None,
            then: None,
            hooks: &[],
        },
        EventDefinition {
            name: "reject_approval",
            from: &[PendingApproval],
            to: Draft,
            guard: None,
            then: None,
            hooks: &[],
        },
        EventDefinition {
            name: "send_to_candidate",
            from: &[Approved],
            to: Sent,
            guard: Some(NOT_EXPIRED),
            then: None,
            hooks: &[Hook {
                name: "stamp_sent_at",
                run: stamp_sent_at,
            }],
        },
        EventDefinition {
            name: "mark_accepted",
            from: &[Sent],
            to: Accepted,
            guard: Some(NOT_EXPIRED),
            then: None,
            hooks: &[
                Hook {
                    name: "stamp_responded_at",
                    run: stamp_responded_at,
                },
                orchestrator::ADVANCE_APPLICATION_TO_OFFERED,
            ],
        },
        EventDefinition {
            name: "mark_declined",
            from: &[Sent],
            to: Declined,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_responded_at",
                run: stamp_responded_at,
            }],
        },
        EventDefinition {
            name: "withdraw",
            from: &[Draft, PendingApproval, Approved, Sent],
            to: Withdrawn,
            guard: None,
            then: None,
            hooks: &[Hook {
                name: "stamp_withdrawn_at",
                run: stamp_withdrawn_at,
            }],
        },
        EventDefinition {
            name: "check_expiration",
            from: &[Sent],
            to: Expired,
            guard: Some(Guard {
                name: "past_expiry",
                check: past_expiry,
            }),
            then: None,
            hooks: &[Hook {
                name: "stamp_expired_at",
                run: stamp_expired_at,
            }],
        },
    ],
};

pub fn create(uow: &mut UnitOfWork<'_>, new: NewOffer) -> Result<Offer, WorkflowError> {
    if new.salary == 0 {
        return Err(WorkflowError::invalid("salary", "must be positive"));
    }
    if let Some(expires_at) = new.expires_at {
        if expires_at <= uow.now() {
            return Err(WorkflowError::invalid("expires_at", "must be in the future"));
        }
    }

    let application = uow.get::<Application>(new.application_id)?;
    if !application.is_active() {
        return Err(WorkflowError::GuardFailed {
            entity: application.entity_ref(),
            event: "extend_offer",
            reason: format!("application is {}, not active", application.status()),
        });
    }

    let offer = Offer {
        id: OfferId::new(),
        organization_id: uow.ctx().organization_id(),
        application_id: new.application_id,
        salary: new.salary,
        start_date: new.start_date,
        expires_at: new.expires_at,
        status: OFFER_MACHINE.initial,
        approval_round: 0,
        created_by: uow.ctx().actor_id(),
        created_at: uow.now(),
        sent_at: None,
        responded_at: None,
        decline_reason: None,
        expired_at: None,
        withdrawn_at: None,
        withdrawal_reason: None,
    };
    uow.insert(offer.clone())?;
    Ok(offer)
}

/// Submit the offer and open a new approval round for `approvers`, in order.
pub fn submit_for_approval(
    uow: &mut UnitOfWork<'_>,
    id: OfferId,
    approvers: &[UserId],
) -> Result<OfferStatus, WorkflowError> {
    let status = fire_with::<Offer, _>(uow, id, "submit_for_approval", |offer| {
        offer.approval_round += 1;
        Ok(())
    })?;
    let round = uow.get::<Offer>(id)?.approval_round;
    approval::open_round(uow, ApprovalParent::Offer(id), round, approvers)?;
    Ok(status)
}

pub fn decline(
    uow: &mut UnitOfWork<'_>,
    id: OfferId,
    reason: Option<String>,
) -> Result<OfferStatus, WorkflowError> {
    fire_with::<Offer, _>(uow, id, "mark_declined", |offer| {
        offer.decline_reason = reason;
        Ok(())
    })
}

pub fn withdraw(
    uow: &mut UnitOfWork<'_>,
    id: OfferId,
    reason: Option<String>,
) -> Result<OfferStatus, WorkflowError> {
    fire_with::<Offer, _>(uow, id, "withdraw", |offer| {
        offer.withdrawal_reason = reason;
        Ok(())
    })
}

/// Expire every sent offer in the tenant whose `expires_at` has passed.
pub fn expire_overdue(uow: &mut UnitOfWork<'_>) -> Result<Vec<OfferId>, WorkflowError> {
    let now = uow.now();
    let overdue: Vec<OfferId> = uow
        .scan::<Offer>()
        .into_iter()
        .filter(|offer| offer.status == Sent && offer.is_past_expiry(now))
        .map(|offer| offer.id)
        .collect();

    for id in &overdue {
        fire::<Offer>(uow, *id, "check_expiration")?;
    }
    Ok(overdue)
}

fn not_expired(offer: &Offer, uow: &UnitOfWork<'_>) -> Result<(), String> {
    if offer.is_past_expiry(uow.now()) {
        Err("offer has expired".to_string())
    } else {
        Ok(())
    }
}

fn past_expiry(offer: &Offer, uow: &UnitOfWork<'_>) -> Result<(), String> {
    match offer.expires_at {
        Some(_) if offer.is_past_expiry(uow.now()) => Ok(()),
        Some(expires_at) => Err(format!("offer is valid until {}", expires_at.to_rfc3339())),
        None => Err("offer has no expiry".to_string()),
    }
}

fn stamp_sent_at(uow: &mut UnitOfWork<'_>, transition: &Transition<Offer>) -> Result<(), WorkflowError> {
    let now = uow.now();
    let offer = uow.update::<Offer, _>(transition.id, |offer| {
        offer.sent_at = Some(now);
        Ok(())
    })?;
    uow.notify(
        "offer.sent",
        transition.subject,
        json!({
            "application_id": offer.application_id,
            "expires_at": offer.expires_at,
        }),
    );
    Ok(())
}

fn stamp_responded_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Offer>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Offer, _>(transition.id, |offer| {
        offer.responded_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_withdrawn_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Offer>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Offer, _>(transition.id, |offer| {
        offer.withdrawn_at = Some(now);
        Ok(())
    })?;
    Ok(())
}

fn stamp_expired_at(
    uow: &mut UnitOfWork<'_>,
    transition: &Transition<Offer>,
) -> Result<(), WorkflowError> {
    let now = uow.now();
    uow.update::<Offer, _>(transition.id, |offer| {
        offer.expired_at = Some(now);
        Ok(())
    })?;
    Ok(())
}
