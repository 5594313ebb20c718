//! Generic transition executor shared by every workflow entity.
//!
//! A transition is: look up the event, check the current state is a declared
//! source, run the guard, then (behind a savepoint) stage the new status, run the
//! hooks in order, and record the generic transition audit entry. A declared
//! follow-up event fires next, behind the same savepoint. Any hook error rolls
//! the unit of work back to the savepoint and propagates.

mod definition;
mod error;

pub use definition::{
    DefinitionError, EventDefinition, Guard, GuardFn, Hook, HookFn, MachineDefinition,
    MachineDescriptor, MachineSummary, Transition, TransitionRow,
};
pub use error::{ErrorKind, WorkflowError};

use std::fmt;
use std::hash::Hash;

use serde_json::json;
use tracing::debug;

use crate::audit::{self, AuditRecord};
use crate::store::{Stored, UnitOfWork};

/// Closed set of states for one machine.
pub trait WorkflowState: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn label(self) -> &'static str;

    fn parse(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.label() == label)
    }
}

/// Declares a state enum with stable snake_case labels.
macro_rules! workflow_states {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $crate::engine::WorkflowState for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::engine::WorkflowState::label(*self))
            }
        }
    };
}

pub(crate) use workflow_states;

/// Proof that a status write comes from the engine. Only this module can build one,
/// so entity statuses cannot be assigned around the transition table.
pub struct StatusToken(());

pub trait WorkflowEntity: Stored {
    type State: WorkflowState;

    fn status(&self) -> Self::State;
    fn set_status(&mut self, status: Self::State, token: StatusToken);
    fn machine() -> &'static MachineDefinition<Self>;
}

/// Fire `event` on the entity identified by `id`.
pub fn fire<E: WorkflowEntity>(
    uow: &mut UnitOfWork<'_>,
    id: E::Id,
    event: &str,
) -> Result<E::State, WorkflowError> {
    fire_with::<E, _>(uow, id, event, |_| Ok(()))
}

/// Fire `event` after applying `prepare` to the loaded entity. Prepared field
/// changes are visible to the guard and are staged together with the new status;
/// they are discarded if the transition is rejected. Returns the state the entity
/// ends in, after any follow-up event.
pub fn fire_with<E, F>(
    uow: &mut UnitOfWork<'_>,
    id: E::Id,
    event: &str,
    prepare: F,
) -> Result<E::State, WorkflowError>
where
    E: WorkflowEntity,
    F: FnOnce(&mut E) -> Result<(), WorkflowError>,
{
    let machine = E::machine();
    let definition = machine
        .event(event)
        .ok_or_else(|| WorkflowError::UnknownEvent {
            machine: machine.name,
            event: event.to_string(),
        })?;

    let mut entity = uow.load::<E>(id)?;
    let from = entity.status();
    if !definition.from.contains(&from) {
        return Err(WorkflowError::IllegalTransition {
            entity: entity.entity_ref(),
            state: from.label(),
            event: event.to_string(),
        });
    }

    prepare(&mut entity)?;

    if let Some(guard) = &definition.guard {
        (guard.check)(&entity, uow).map_err(|reason| WorkflowError::GuardFailed {
            entity: entity.entity_ref(),
            event: definition.name,
            reason,
        })?;
    }

    let savepoint = uow.savepoint();
    let outcome = apply(uow, machine, definition, entity).and_then(|()| match definition.then {
        Some(next) => fire::<E>(uow, id, next),
        None => Ok(definition.to),
    });
    match outcome {
        Ok(state) => Ok(state),
        Err(err) => {
            debug!(
                machine = machine.name,
                event = definition.name,
                error = %err,
                "transition rolled back"
            );
            uow.rollback_to(savepoint);
            Err(err)
        }
    }
}

fn apply<E: WorkflowEntity>(
    uow: &mut UnitOfWork<'_>,
    machine: &'static MachineDefinition<E>,
    definition: &'static EventDefinition<E>,
    mut entity: E,
) -> Result<(), WorkflowError> {
    let from = entity.status();
    let to = definition.to;
    entity.set_status(to, StatusToken(()));

    let transition = Transition {
        id: entity.id(),
        subject: entity.entity_ref(),
        from,
        to,
        event: definition.name,
    };
    uow.save(entity)?;

    for hook in definition.hooks {
        (hook.run)(uow, &transition)?;
    }

    let entry = AuditRecord::new(format!("{}.transition", E::KIND), transition.subject)
        .with_metadata("machine", machine.name)
        .with_metadata("event", definition.name)
        .with_metadata("actor", uow.ctx().actor_label())
        .with_change("status", from.label(), to.label());
    audit::record(uow, entry);

    if E::KIND.publishes_events() {
        uow.emit(
            transition.subject,
            format!("{}.{}", E::KIND, to.label()),
            json!({
                "from": from.label(),
                "to": to.label(),
                "event": definition.name,
            }),
        );
    }

    debug!(
        subject = %transition.subject,
        from = from.label(),
        to = to.label(),
        event = definition.name,
        "transition applied"
    );
    Ok(())
}
