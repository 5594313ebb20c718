use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt::Write as _;

use serde::Serialize;
use uuid::Uuid;

use super::{fire, WorkflowEntity, WorkflowError, WorkflowState};
use crate::ids::EntityKind;
use crate::store::{Stored, UnitOfWork};

/// Precondition evaluated against the entity (after any prepared field updates)
/// and a read-only view of the unit of work. `Err` carries the reason shown to
/// the caller.
pub type GuardFn<E> = fn(&E, &UnitOfWork<'_>) -> Result<(), String>;

/// Post-transition side effect. Runs after the new status is staged.
pub type HookFn<E> = fn(&mut UnitOfWork<'_>, &Transition<E>) -> Result<(), WorkflowError>;

pub struct Guard<E: WorkflowEntity> {
    pub name: &'static str,
    pub check: GuardFn<E>,
}

pub struct Hook<E: WorkflowEntity> {
    pub name: &'static str,
    pub run: HookFn<E>,
}

pub struct EventDefinition<E: WorkflowEntity> {
    pub name: &'static str,
    pub from: &'static [E::State],
    pub to: E::State,
    pub guard: Option<Guard<E>>,
    /// Event fired on the same entity once this transition has been applied and
    /// recorded. Runs in the same unit of work; its failure rolls back both.
    pub then: Option<&'static str>,
    pub hooks: &'static [Hook<E>],
}

/// Data-driven transition table for one entity type.
pub struct MachineDefinition<E: WorkflowEntity> {
    pub name: &'static str,
    pub initial: E::State,
    pub events: &'static [EventDefinition<E>],
}

/// The transition being applied, as seen by hooks.
#[derive(Debug, Clone)]
pub struct Transition<E: WorkflowEntity> {
    pub id: E::Id,
    pub subject: crate::ids::EntityRef,
    pub from: E::State,
    pub to: E::State,
    pub event: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("{machine}: event '{event}' is declared more than once")]
    DuplicateEvent {
        machine: &'static str,
        event: &'static str,
    },
    #[error("{machine}: event '{event}' has no source states")]
    EmptySources {
        machine: &'static str,
        event: &'static str,
    },
    #[error("{machine}: state '{state}' is not declared")]
    UndeclaredState {
        machine: &'static str,
        state: &'static str,
    },
    #[error("{machine}: '{event}' is followed by '{then}', which cannot fire from its target")]
    BrokenFollowUp {
        machine: &'static str,
        event: &'static str,
        then: &'static str,
    },
}

/// One row of a rendered transition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRow {
    pub event: &'static str,
    pub from: Vec<&'static str>,
    pub to: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<&'static str>,
    pub hooks: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub then: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineSummary {
    pub machine: &'static str,
    pub entity: EntityKind,
    pub initial: &'static str,
    pub states: Vec<&'static str>,
    pub transitions: Vec<TransitionRow>,
}

impl<E: WorkflowEntity> MachineDefinition<E> {
    pub fn event(&self, name: &str) -> Option<&EventDefinition<E>> {
        self.events.iter().find(|event| event.name == name)
    }

    /// Structural checks. Returns the labels of states unreachable from `initial`;
    /// those are allowed but worth surfacing.
    pub fn validate(&self) -> Result<Vec<&'static str>, DefinitionError> {
        let declared = |state: E::State| -> Result<(), DefinitionError> {
            if E::State::ALL.contains(&state) {
                Ok(())
            } else {
                Err(DefinitionError::UndeclaredState {
                    machine: self.name,
                    state: state.label(),
                })
            }
        };

        declared(self.initial)?;
        let mut names = HashSet::new();
        for event in self.events {
            if !names.insert(event.name) {
                return Err(DefinitionError::DuplicateEvent {
                    machine: self.name,
                    event: event.name,
                });
            }
            if event.from.is_empty() {
                return Err(DefinitionError::EmptySources {
                    machine: self.name,
                    event: event.name,
                });
            }
            declared(event.to)?;
            for source in event.from {
                declared(*source)?;
            }
        }
        for event in self.events {
            if let Some(then) = event.then {
                let chained = self.event(then).is_some_and(|next| {
                    next.name != event.name && next.from.contains(&event.to)
                });
                if !chained {
                    return Err(DefinitionError::BrokenFollowUp {
                        machine: self.name,
                        event: event.name,
                        then,
                    });
                }
            }
        }

        let mut reached = HashSet::from([self.initial]);
        let mut queue = VecDeque::from([self.initial]);
        while let Some(state) = queue.pop_front() {
            for event in self.events.iter().filter(|event| event.from.contains(&state)) {
                if reached.insert(event.to) {
                    queue.push_back(event.to);
                }
            }
        }

        Ok(E::State::ALL
            .iter()
            .filter(|state| !reached.contains(state))
            .map(|state| state.label())
            .collect())
    }

    pub fn describe(&self) -> MachineSummary {
        MachineSummary {
            machine: self.name,
            entity: E::KIND,
            initial: self.initial.label(),
            states: E::State::ALL.iter().map(|state| state.label()).collect(),
            transitions: self
                .events
                .iter()
                .map(|event| TransitionRow {
                    event: event.name,
                    from: event.from.iter().map(|state| state.label()).collect(),
                    to: event.to.label(),
                    guard: event.guard.as_ref().map(|guard| guard.name),
                    hooks: event.hooks.iter().map(|hook| hook.name).collect(),
                    then: event.then,
                })
                .collect(),
        }
    }

    /// Mermaid `stateDiagram-v2` rendering of the table.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("stateDiagram-v2\n");
        let _ = writeln!(out, "    [*] --> {}", self.initial.label());

        let mut edges = BTreeSet::new();
        for event in self.events {
            for source in event.from {
                edges.insert((source.label(), event.to.label(), event.name));
            }
        }
        for (from, to, event) in edges {
            let _ = writeln!(out, "    {from} --> {to}: {event}");
        }
        out
    }
}

/// Object-safe view of a machine, used by the registry and the HTTP surface.
pub trait MachineDescriptor: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> EntityKind;
    fn summary(&self) -> MachineSummary;
    fn mermaid(&self) -> String;
    fn check(&self) -> Result<Vec<&'static str>, DefinitionError>;
    /// Fire `event` on the row identified by `id`, returning the new state label.
    fn fire_raw(
        &self,
        uow: &mut UnitOfWork<'_>,
        id: Uuid,
        event: &str,
    ) -> Result<&'static str, WorkflowError>;
    /// Current state label of the row identified by `id`.
    fn status_of(&self, uow: &UnitOfWork<'_>, id: Uuid) -> Result<&'static str, WorkflowError>;
}

impl<E: WorkflowEntity> MachineDescriptor for MachineDefinition<E> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> EntityKind {
        E::KIND
    }

    fn summary(&self) -> MachineSummary {
        self.describe()
    }

    fn mermaid(&self) -> String {
        self.to_mermaid()
    }

    fn check(&self) -> Result<Vec<&'static str>, DefinitionError> {
        self.validate()
    }

    fn fire_raw(
        &self,
        uow: &mut UnitOfWork<'_>,
        id: Uuid,
        event: &str,
    ) -> Result<&'static str, WorkflowError> {
        fire::<E>(uow, <E as Stored>::Id::from(id), event).map(|state| state.label())
    }

    fn status_of(&self, uow: &UnitOfWork<'_>, id: Uuid) -> Result<&'static str, WorkflowError> {
        uow.get::<E>(<E as Stored>::Id::from(id))
            .map(|entity| entity.status().label())
    }
}
