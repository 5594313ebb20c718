//! Request-scoped tenant context.
//!
//! A `TenantContext` is built by whoever receives an inbound operation, passed by
//! reference into the store, and dropped when the operation finishes. It is never
//! stored in a global or shared between operations.

use std::net::IpAddr;

use serde::Serialize;
use uuid::Uuid;

use crate::ids::{OrganizationId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantContext {
    organization_id: OrganizationId,
    actor_id: Option<UserId>,
    request_id: String,
    client_ip: Option<IpAddr>,
    user_agent: Option<String>,
}

impl TenantContext {
    /// Context for an action performed by a signed-in user.
    pub fn for_actor(organization_id: OrganizationId, actor_id: UserId) -> Self {
        Self {
            organization_id,
            actor_id: Some(actor_id),
            request_id: Uuid::new_v4().to_string(),
            client_ip: None,
            user_agent: None,
        }
    }

    /// Context for scheduled or automated work with no human actor.
    pub fn system(organization_id: OrganizationId) -> Self {
        Self {
            organization_id,
            actor_id: None,
            request_id: Uuid::new_v4().to_string(),
            client_ip: None,
            user_agent: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_client_ip(mut self, client_ip: IpAddr) -> Self {
        self.client_ip = Some(client_ip);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn actor_id(&self) -> Option<UserId> {
        self.actor_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Audit label for the actor, `"system"` when no user is attached.
    pub fn actor_label(&self) -> String {
        match self.actor_id {
            Some(actor) => actor.to_string(),
            None => "system".to_string(),
        }
    }
}
