use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::entry::AuditLogEntry;
use crate::engine::WorkflowError;
use crate::ids::{AuditEntryId, EntityKind, OrganizationId, UserId};
use crate::records::WriteOnceTable;

/// Audit persistence failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuditError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
    #[error("audit entry rejected: {0}")]
    Rejected(String),
}

/// Append-only audit persistence. Implementations must store a batch all-or-nothing.
pub trait AuditSink: Send + Sync {
    fn append(&self, entries: &[AuditLogEntry]) -> Result<(), AuditError>;
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, AuditError>;
}

/// Read-only filter for compliance reporting.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuditQuery {
    pub organization_id: Option<OrganizationId>,
    pub actor_id: Option<UserId>,
    pub action: Option<String>,
    pub entity_kind: Option<EntityKind>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_organization(organization_id: OrganizationId) -> Self {
        Self {
            organization_id: Some(organization_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.organization_id
            .map_or(true, |org| entry.organization_id() == org)
            && self
                .actor_id
                .map_or(true, |actor| entry.actor_id() == Some(actor))
            && self
                .action
                .as_deref()
                .map_or(true, |action| entry.action() == action)
            && self
                .entity_kind
                .map_or(true, |kind| entry.subject().kind == kind)
            && self
                .created_from
                .map_or(true, |from| entry.created_at() >= from)
            && self.created_to.map_or(true, |to| entry.created_at() <= to)
    }
}

/// In-process audit log backed by a write-once table.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<WriteOnceTable<AuditLogEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry in insertion order.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Attempting to rewrite an entry is a programming error and always fails.
    pub fn amend(&self, entry: AuditLogEntry) -> Result<(), WorkflowError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| WorkflowError::StoreUnavailable)?;
        entries.replace(entry)
    }

    /// Attempting to delete an entry is a programming error and always fails.
    pub fn delete(&self, id: AuditEntryId) -> Result<(), WorkflowError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| WorkflowError::StoreUnavailable)?;
        entries.remove(id)
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, batch: &[AuditLogEntry]) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuditError::Unavailable("audit log lock poisoned".to_string()))?;

        if let Some(duplicate) = batch.iter().find(|entry| entries.contains(&entry.id())) {
            return Err(AuditError::Rejected(format!(
                "entry {} already recorded",
                duplicate.id()
            )));
        }

        for entry in batch {
            entries
                .insert(entry.clone())
                .map_err(|err| AuditError::Rejected(err.to_string()))?;
        }
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, AuditError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| AuditError::Unavailable("audit log lock poisoned".to_string()))?;

        let matching = entries.iter().filter(|entry| query.matches(entry)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::AuditRecord;
    use crate::context::TenantContext;
    use crate::ids::{EntityRef, JobId};
    use chrono::Duration;

    fn entry(ctx: &TenantContext, action: &str, at: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry::stamp(
            AuditRecord::new(action, EntityRef::new(EntityKind::Job, JobId::new())),
            ctx,
            at,
        )
    }

    #[test]
    fn entries_cannot_be_amended_or_deleted() {
        let log = MemoryAuditLog::new();
        let ctx = TenantContext::system(OrganizationId::new());
        let recorded = entry(&ctx, "job.created", Utc::now());
        log.append(std::slice::from_ref(&recorded)).expect("append");

        assert!(matches!(
            log.amend(recorded.clone()),
            Err(WorkflowError::ImmutabilityViolation { .. })
        ));
        assert!(matches!(
            log.delete(recorded.id()),
            Err(WorkflowError::ImmutabilityViolation { .. })
        ));
        assert_eq!(log.entries(), vec![recorded]);
    }

    #[test]
    fn duplicate_batch_is_rejected_whole() {
        let log = MemoryAuditLog::new();
        let ctx = TenantContext::system(OrganizationId::new());
        let first = entry(&ctx, "job.created", Utc::now());
        log.append(std::slice::from_ref(&first)).expect("append");

        let fresh = entry(&ctx, "job.updated", Utc::now());
        let result = log.append(&[fresh, first]);
        assert!(matches!(result, Err(AuditError::Rejected(_))));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn query_filters_by_tenant_action_and_range() {
        let log = MemoryAuditLog::new();
        let org = OrganizationId::new();
        let actor = UserId::new();
        let ctx = TenantContext::for_actor(org, actor);
        let other = TenantContext::system(OrganizationId::new());
        let start = Utc::now();

        log.append(&[
            entry(&ctx, "job.created", start),
            entry(&ctx, "job.status_changed", start + Duration::hours(1)),
            entry(&other, "job.created", start),
        ])
        .expect("append");

        let mut query = AuditQuery::for_organization(org);
        assert_eq!(log.query(&query).expect("query").len(), 2);

        query.action = Some("job.created".to_string());
        assert_eq!(log.query(&query).expect("query").len(), 1);

        query.action = None;
        query.actor_id = Some(actor);
        query.created_from = Some(start + Duration::minutes(30));
        let results = log.query(&query).expect("query");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].action(), "job.status_changed");
    }
}
