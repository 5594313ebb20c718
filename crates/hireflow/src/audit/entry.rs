use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::context::TenantContext;
use crate::ids::{AuditEntryId, EntityRef, OrganizationId, UserId};
use crate::records::ImmutableRecord;

/// Longest string value kept in an audit entry, in characters.
pub const MAX_VALUE_CHARS: usize = 1000;

const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "password_digest",
    "password_hash",
    "encrypted_password",
    "password_confirmation",
    "ssn",
    "social_security_number",
    "token",
    "access_token",
    "refresh_token",
    "api_key",
    "secret",
    "client_secret",
];

/// Before/after pair for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub before: Value,
    pub after: Value,
}

pub type ChangeSet = BTreeMap<String, FieldChange>;
pub type Metadata = BTreeMap<String, Value>;

/// Unstamped audit content assembled by hooks and operations.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    action: String,
    subject: EntityRef,
    metadata: Metadata,
    changes: ChangeSet,
}

impl AuditRecord {
    pub fn new(action: impl Into<String>, subject: EntityRef) -> Self {
        Self {
            action: action.into(),
            subject,
            metadata: Metadata::new(),
            changes: ChangeSet::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_change(
        mut self,
        field: &str,
        before: impl Into<Value>,
        after: impl Into<Value>,
    ) -> Self {
        self.changes.insert(
            field.to_string(),
            FieldChange {
                before: before.into(),
                after: after.into(),
            },
        );
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

/// A persisted audit entry. No field changes after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogEntry {
    id: AuditEntryId,
    organization_id: OrganizationId,
    actor_id: Option<UserId>,
    action: String,
    subject: EntityRef,
    metadata: Metadata,
    changes: ChangeSet,
    ip: Option<IpAddr>,
    user_agent: Option<String>,
    request_id: String,
    created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub(crate) fn stamp(record: AuditRecord, ctx: &TenantContext, now: DateTime<Utc>) -> Self {
        Self {
            id: AuditEntryId::new(),
            organization_id: ctx.organization_id(),
            actor_id: ctx.actor_id(),
            action: record.action,
            subject: record.subject,
            metadata: sanitize_metadata(record.metadata),
            changes: sanitize_changes(record.changes),
            ip: ctx.client_ip(),
            user_agent: ctx.user_agent().map(truncate_str),
            request_id: ctx.request_id().to_string(),
            created_at: now,
        }
    }

    pub fn id(&self) -> AuditEntryId {
        self.id
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn actor_id(&self) -> Option<UserId> {
        self.actor_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn subject(&self) -> EntityRef {
        self.subject
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl ImmutableRecord for AuditLogEntry {
    type Id = AuditEntryId;
    const RECORD: &'static str = "audit_log_entry";

    fn record_id(&self) -> AuditEntryId {
        self.id
    }

    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

pub fn is_sensitive_field(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    SENSITIVE_FIELDS.contains(&lowered.as_str())
        || lowered.ends_with("_token")
        || lowered.ends_with("_secret")
        || lowered.ends_with("_digest")
        || lowered.ends_with("_ssn")
}

/// Drop sensitive fields and clamp every string to [`MAX_VALUE_CHARS`].
pub fn sanitize_changes(changes: ChangeSet) -> ChangeSet {
    changes
        .into_iter()
        .filter(|(field, _)| !is_sensitive_field(field))
        .map(|(field, change)| {
            (
                field,
                FieldChange {
                    before: truncate_value(change.before),
                    after: truncate_value(change.after),
                },
            )
        })
        .collect()
}

pub fn sanitize_metadata(metadata: Metadata) -> Metadata {
    metadata
        .into_iter()
        .filter(|(key, _)| !is_sensitive_field(key))
        .map(|(key, value)| (key, truncate_value(value)))
        .collect()
}

fn truncate_value(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(truncate_str(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(truncate_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !is_sensitive_field(key))
                .map(|(key, value)| (key, truncate_value(value)))
                .collect(),
        ),
        other => other,
    }
}

fn truncate_str(text: &str) -> String {
    match text.char_indices().nth(MAX_VALUE_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
