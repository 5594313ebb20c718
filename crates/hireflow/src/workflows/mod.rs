//! Hiring workflow entities, their transition tables, and the cross-entity hooks
//! that connect them.

pub mod adverse_action;
pub mod application;
pub mod approval;
pub mod everify;
pub mod hiring_decision;
pub mod i9;
pub mod interview;
pub mod job;
pub mod offer;
pub mod orchestrator;
pub mod scorecard;
pub mod stage_transition;

#[cfg(test)]
mod tests;

use uuid::Uuid;

use crate::engine::{MachineDescriptor, WorkflowError};
use crate::store::UnitOfWork;

pub use adverse_action::{AdverseAction, AdverseActionStatus};
pub use application::{Application, ApplicationStatus};
pub use approval::{Approval, ApprovalParent, ApprovalStatus};
pub use everify::{EVerifyCase, EVerifyStatus};
pub use hiring_decision::{Decision, DecisionApproval, HiringDecision};
pub use i9::{I9Status, I9Verification};
pub use interview::{Interview, InterviewStatus};
pub use job::{Job, JobStatus};
pub use offer::{Offer, OfferStatus};
pub use orchestrator::{effect_graph, effects_of, EffectEdge, EffectTarget};
pub use scorecard::{Scorecard, ScorecardStatus};
pub use stage_transition::StageTransition;

static MACHINES: [&dyn MachineDescriptor; 10] = [
    &job::JOB_MACHINE,
    &application::APPLICATION_MACHINE,
    &interview::INTERVIEW_MACHINE,
    &scorecard::SCORECARD_MACHINE,
    &offer::OFFER_MACHINE,
    &approval::APPROVAL_MACHINE,
    &hiring_decision::DECISION_APPROVAL_MACHINE,
    &i9::I9_MACHINE,
    &everify::EVERIFY_MACHINE,
    &adverse_action::ADVERSE_ACTION_MACHINE,
];

/// Every registered machine.
pub fn machines() -> &'static [&'static dyn MachineDescriptor] {
    &MACHINES
}

pub fn machine(name: &str) -> Option<&'static dyn MachineDescriptor> {
    MACHINES.iter().copied().find(|machine| machine.name() == name)
}

/// Fire an event by machine name. Events that need input beyond the id use the
/// typed functions of their module instead.
pub fn fire_by_name(
    uow: &mut UnitOfWork<'_>,
    machine_name: &str,
    id: Uuid,
    event: &str,
) -> Result<&'static str, WorkflowError> {
    let descriptor = machine(machine_name).ok_or_else(|| {
        WorkflowError::invalid("machine", format!("unknown machine '{machine_name}'"))
    })?;
    descriptor.fire_raw(uow, id, event)
}
