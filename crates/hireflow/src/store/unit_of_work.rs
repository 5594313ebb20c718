use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{Logged, PendingAudit, Stored, Tables};
use crate::audit::{AuditLogEntry, AuditRecord};
use crate::config::WorkflowConfig;
use crate::context::TenantContext;
use crate::dispatch::{DomainEvent, Notification};
use crate::engine::WorkflowError;
use crate::ids::EntityRef;

/// Staged writes layered over the committed tables for one operation.
///
/// Reads see staged rows first. Rows owned by another organization are invisible:
/// they load as `NotFound` and never appear in scans.
pub struct UnitOfWork<'a> {
    base: &'a Tables,
    staged: Tables,
    ctx: &'a TenantContext,
    now: DateTime<Utc>,
    config: &'a WorkflowConfig,
    audit: Vec<PendingAudit>,
    events: Vec<DomainEvent>,
    notifications: Vec<Notification>,
}

/// Snapshot of staged state taken before a transition is applied.
#[derive(Debug)]
pub struct Savepoint {
    staged: Tables,
    audit: usize,
    events: usize,
    notifications: usize,
}

pub(crate) struct Changes {
    pub(crate) staged: Tables,
    pub(crate) audit: Vec<PendingAudit>,
    pub(crate) events: Vec<DomainEvent>,
    pub(crate) notifications: Vec<Notification>,
}

impl<'a> UnitOfWork<'a> {
    pub(crate) fn new(
        base: &'a Tables,
        ctx: &'a TenantContext,
        now: DateTime<Utc>,
        config: &'a WorkflowConfig,
    ) -> Self {
        Self {
            base,
            staged: Tables::default(),
            ctx,
            now,
            config,
            audit: Vec::new(),
            events: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn ctx(&self) -> &TenantContext {
        self.ctx
    }

    /// Clock reading taken when the unit of work began.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn config(&self) -> &WorkflowConfig {
        self.config
    }

    pub fn get<E: Stored>(&self, id: E::Id) -> Result<&E, WorkflowError> {
        E::table(&self.staged)
            .get(&id)
            .or_else(|| E::table(self.base).get(&id))
            .filter(|entity| entity.organization_id() == self.ctx.organization_id())
            .ok_or_else(|| WorkflowError::NotFound {
                kind: E::KIND,
                id: id.into(),
            })
    }

    pub fn load<E: Stored>(&self, id: E::Id) -> Result<E, WorkflowError> {
        self.get::<E>(id).cloned()
    }

    /// Every row of `E` visible to this tenant, ordered by id.
    pub fn scan<E: Stored>(&self) -> Vec<&E> {
        let organization_id = self.ctx.organization_id();
        let staged = E::table(&self.staged);
        let mut rows: Vec<&E> = staged
            .values()
            .chain(
                E::table(self.base)
                    .values()
                    .filter(|entity| !staged.contains_key(&entity.id())),
            )
            .filter(|entity| entity.organization_id() == organization_id)
            .collect();
        rows.sort_by_key(|entity| entity.id());
        rows
    }

    pub(crate) fn insert<E: Stored>(&mut self, entity: E) -> Result<(), WorkflowError> {
        let id = entity.id();
        if E::table(&self.staged).contains_key(&id) || E::table(self.base).contains_key(&id) {
            return Err(WorkflowError::UniquenessViolation(format!(
                "{} {id} already exists",
                E::KIND
            )));
        }
        self.check_tenant(&entity)?;
        E::table_mut(&mut self.staged).insert(id, entity);
        Ok(())
    }

    pub(crate) fn save<E: Stored>(&mut self, entity: E) -> Result<(), WorkflowError> {
        self.check_tenant(&entity)?;
        E::table_mut(&mut self.staged).insert(entity.id(), entity);
        Ok(())
    }

    /// Load, mutate, and stage a row, returning the staged copy.
    pub(crate) fn update<E, F>(&mut self, id: E::Id, change: F) -> Result<E, WorkflowError>
    where
        E: Stored,
        F: FnOnce(&mut E) -> Result<(), WorkflowError>,
    {
        let mut entity = self.load::<E>(id)?;
        change(&mut entity)?;
        self.save(entity.clone())?;
        Ok(entity)
    }

    /// Write-once rows of `R` visible to this tenant, in insertion order.
    pub fn records<R: Logged>(&self) -> Vec<&R> {
        let organization_id = self.ctx.organization_id();
        R::log(self.base)
            .iter()
            .chain(R::log(&self.staged).iter())
            .filter(|record| record.organization_id() == organization_id)
            .collect()
    }

    pub fn get_record<R: Logged>(&self, id: R::Id) -> Option<&R> {
        R::log(&self.staged)
            .get(&id)
            .or_else(|| R::log(self.base).get(&id))
            .filter(|record| record.organization_id() == self.ctx.organization_id())
    }

    pub(crate) fn append<R: Logged>(&mut self, record: R) -> Result<(), WorkflowError> {
        let id = record.record_id();
        if R::log(self.base).contains(&id) {
            return Err(WorkflowError::ImmutabilityViolation {
                record: R::RECORD,
                id: id.to_string(),
                operation: "overwritten",
            });
        }
        if record.organization_id() != self.ctx.organization_id() {
            return Err(WorkflowError::invalid(
                "organization_id",
                "record belongs to another organization",
            ));
        }
        R::log_mut(&mut self.staged).insert(record)
    }

    pub(crate) fn stage_audit(&mut self, record: AuditRecord, required: bool) {
        let entry = AuditLogEntry::stamp(record, self.ctx, self.now);
        self.audit.push(PendingAudit { entry, required });
    }

    pub(crate) fn emit(&mut self, subject: EntityRef, event_type: String, payload: Value) {
        self.events.push(DomainEvent {
            organization_id: self.ctx.organization_id(),
            event_type,
            subject,
            payload,
            occurred_at: self.now,
        });
    }

    pub(crate) fn notify(&mut self, template: &'static str, subject: EntityRef, payload: Value) {
        self.notifications.push(Notification {
            organization_id: self.ctx.organization_id(),
            template,
            subject,
            payload,
        });
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            staged: self.staged.clone(),
            audit: self.audit.len(),
            events: self.events.len(),
            notifications: self.notifications.len(),
        }
    }

    /// Discard everything staged after `savepoint` was taken.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.staged = savepoint.staged;
        self.audit.truncate(savepoint.audit);
        self.events.truncate(savepoint.events);
        self.notifications.truncate(savepoint.notifications);
    }

    pub(crate) fn into_changes(self) -> Changes {
        Changes {
            staged: self.staged,
            audit: self.audit,
            events: self.events,
            notifications: self.notifications,
        }
    }

    fn check_tenant<E: Stored>(&self, entity: &E) -> Result<(), WorkflowError> {
        if entity.organization_id() == self.ctx.organization_id() {
            Ok(())
        } else {
            Err(WorkflowError::invalid(
                "organization_id",
                format!("{} belongs to another organization", entity.entity_ref()),
            ))
        }
    }
}
