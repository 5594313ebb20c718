//! Post-commit outbox: domain events for the webhook bus and candidate/staff
//! notifications. Nothing here is sent until the unit of work commits.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::ids::{EntityRef, OrganizationId};

/// "An event of type X occurred on entity Y with payload Z".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    pub organization_id: OrganizationId,
    pub event_type: String,
    pub subject: EntityRef,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub organization_id: OrganizationId,
    pub template: &'static str,
    pub subject: EntityRef,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch transport unavailable: {0}")]
    Transport(String),
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent) -> Result<(), DispatchError>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), DispatchError>;
}

/// Collects everything dispatched; used by the demo service and tests.
#[derive(Debug, Default)]
pub struct MemoryDispatch {
    events: Mutex<Vec<DomainEvent>>,
    notifications: Mutex<Vec<Notification>>,
}

impl MemoryDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|notifications| notifications.clone())
            .unwrap_or_default()
    }

    pub fn templates(&self) -> Vec<&'static str> {
        self.notifications()
            .into_iter()
            .map(|notification| notification.template)
            .collect()
    }
}

impl EventPublisher for MemoryDispatch {
    fn publish(&self, event: DomainEvent) -> Result<(), DispatchError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| DispatchError::Transport("event buffer poisoned".to_string()))?;
        events.push(event);
        Ok(())
    }
}

impl Notifier for MemoryDispatch {
    fn notify(&self, notification: Notification) -> Result<(), DispatchError> {
        let mut notifications = self
            .notifications
            .lock()
            .map_err(|_| DispatchError::Transport("notification buffer poisoned".to_string()))?;
        notifications.push(notification);
        Ok(())
    }
}
