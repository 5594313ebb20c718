//! Tenant-scoped record store with atomic units of work.
//!
//! All tables sit behind one mutex; a transaction holds it from the first read to
//! the commit, so guard checks and writes never race with another operation.

mod clock;
mod unit_of_work;

pub use clock::{Clock, FixedClock, SystemClock};
pub use unit_of_work::{Savepoint, UnitOfWork};

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditLogEntry, AuditQuery, AuditSink};
use crate::config::WorkflowConfig;
use crate::context::TenantContext;
use crate::dispatch::{EventPublisher, Notifier};
use crate::engine::WorkflowError;
use crate::ids::{EntityKind, EntityRef, HiringDecisionId, OrganizationId};
use crate::records::{ImmutableRecord, WriteOnceTable};
use crate::workflows::adverse_action::AdverseAction;
use crate::workflows::application::Application;
use crate::workflows::approval::Approval;
use crate::workflows::everify::EVerifyCase;
use crate::workflows::hiring_decision::{DecisionApproval, HiringDecision};
use crate::workflows::i9::I9Verification;
use crate::workflows::interview::Interview;
use crate::workflows::job::Job;
use crate::workflows::offer::Offer;
use crate::workflows::scorecard::Scorecard;
use crate::workflows::stage_transition::StageTransition;

/// A mutable, tenant-owned row.
pub trait Stored: Clone + fmt::Debug + Send + Sync + 'static {
    type Id: Copy
        + Eq
        + Ord
        + Hash
        + fmt::Display
        + fmt::Debug
        + From<Uuid>
        + Into<Uuid>
        + Send
        + Sync
        + 'static;

    const KIND: EntityKind;

    fn id(&self) -> Self::Id;
    fn organization_id(&self) -> OrganizationId;
    fn table(tables: &Tables) -> &BTreeMap<Self::Id, Self>;
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Self::Id, Self>;

    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(Self::KIND, self.id())
    }
}

/// A write-once row kept in a [`WriteOnceTable`].
pub trait Logged: ImmutableRecord {
    fn log(tables: &Tables) -> &WriteOnceTable<Self>;
    fn log_mut(tables: &mut Tables) -> &mut WriteOnceTable<Self>;
}

/// Implements [`Stored`] for an entity with `id` and `organization_id` fields.
macro_rules! stored_entity {
    ($entity:ty, $id:ty, $kind:expr, $table:ident) => {
        impl $crate::store::Stored for $entity {
            type Id = $id;
            const KIND: $crate::ids::EntityKind = $kind;

            fn id(&self) -> $id {
                self.id
            }

            fn organization_id(&self) -> $crate::ids::OrganizationId {
                self.organization_id
            }

            fn table(tables: &$crate::store::Tables) -> &std::collections::BTreeMap<$id, Self> {
                &tables.$table
            }

            fn table_mut(
                tables: &mut $crate::store::Tables,
            ) -> &mut std::collections::BTreeMap<$id, Self> {
                &mut tables.$table
            }
        }
    };
}

pub(crate) use stored_entity;

#[derive(Debug, Default, Clone)]
pub struct Tables {
    pub(crate) jobs: BTreeMap<crate::ids::JobId, Job>,
    pub(crate) applications: BTreeMap<crate::ids::ApplicationId, Application>,
    pub(crate) interviews: BTreeMap<crate::ids::InterviewId, Interview>,
    pub(crate) scorecards: BTreeMap<crate::ids::ScorecardId, Scorecard>,
    pub(crate) offers: BTreeMap<crate::ids::OfferId, Offer>,
    pub(crate) approvals: BTreeMap<crate::ids::ApprovalId, Approval>,
    pub(crate) i9_verifications: BTreeMap<crate::ids::I9VerificationId, I9Verification>,
    pub(crate) everify_cases: BTreeMap<crate::ids::EVerifyCaseId, EVerifyCase>,
    pub(crate) adverse_actions: BTreeMap<crate::ids::AdverseActionId, AdverseAction>,
    pub(crate) decision_approvals: BTreeMap<HiringDecisionId, DecisionApproval>,
    pub(crate) stage_transitions: WriteOnceTable<StageTransition>,
    pub(crate) hiring_decisions: WriteOnceTable<HiringDecision>,
}

impl Tables {
    fn merge(&mut self, staged: Tables) {
        self.jobs.extend(staged.jobs);
        self.applications.extend(staged.applications);
        self.interviews.extend(staged.interviews);
        self.scorecards.extend(staged.scorecards);
        self.offers.extend(staged.offers);
        self.approvals.extend(staged.approvals);
        self.i9_verifications.extend(staged.i9_verifications);
        self.everify_cases.extend(staged.everify_cases);
        self.adverse_actions.extend(staged.adverse_actions);
        self.decision_approvals.extend(staged.decision_approvals);
        self.stage_transitions.absorb(staged.stage_transitions);
        self.hiring_decisions.absorb(staged.hiring_decisions);
    }
}

/// Audit entry staged in a unit of work, with its persistence tier.
#[derive(Debug, Clone)]
pub(crate) struct PendingAudit {
    pub(crate) entry: AuditLogEntry,
    pub(crate) required: bool,
}

pub struct WorkflowStore {
    tables: Mutex<Tables>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
    publisher: Option<Arc<dyn EventPublisher>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl WorkflowStore {
    pub fn new(audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>, config: WorkflowConfig) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            audit,
            clock,
            config,
            publisher: None,
            notifier: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `operation` as one atomic unit of work.
    ///
    /// On error nothing staged is kept. On success required audit entries are
    /// persisted first (their failure aborts the commit), then state becomes
    /// visible, then best-effort audit, domain events and notifications go out.
    pub fn transaction<T, F>(&self, ctx: &TenantContext, operation: F) -> Result<T, WorkflowError>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, WorkflowError>,
    {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| WorkflowError::StoreUnavailable)?;

        let mut uow = UnitOfWork::new(&tables, ctx, self.clock.now(), &self.config);
        let value = match operation(&mut uow) {
            Ok(value) => value,
            Err(err) => {
                debug!(request_id = ctx.request_id(), error = %err, "unit of work rolled back");
                return Err(err);
            }
        };
        let changes = uow.into_changes();

        self.persist_audit(ctx, &changes.audit)?;
        tables.merge(changes.staged);
        drop(tables);

        info!(
            request_id = ctx.request_id(),
            events = changes.events.len(),
            notifications = changes.notifications.len(),
            "unit of work committed"
        );

        if let Some(publisher) = &self.publisher {
            for event in changes.events {
                let event_type = event.event_type.clone();
                if let Err(err) = publisher.publish(event) {
                    warn!(%event_type, error = %err, "domain event dispatch failed");
                }
            }
        }
        if let Some(notifier) = &self.notifier {
            for notification in changes.notifications {
                let template = notification.template;
                if let Err(err) = notifier.notify(notification) {
                    warn!(template, error = %err, "notification dispatch failed");
                }
            }
        }

        Ok(value)
    }

    /// Read-only access under the same tenant filter as a transaction.
    pub fn read<T, F>(&self, ctx: &TenantContext, query: F) -> Result<T, WorkflowError>
    where
        F: FnOnce(&UnitOfWork<'_>) -> Result<T, WorkflowError>,
    {
        let tables = self
            .tables
            .lock()
            .map_err(|_| WorkflowError::StoreUnavailable)?;
        let uow = UnitOfWork::new(&tables, ctx, self.clock.now(), &self.config);
        query(&uow)
    }

    pub fn load<E: Stored>(&self, ctx: &TenantContext, id: E::Id) -> Result<E, WorkflowError> {
        self.read(ctx, |uow| uow.load::<E>(id))
    }

    pub fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        Ok(self.audit.query(query)?)
    }

    fn persist_audit(
        &self,
        ctx: &TenantContext,
        pending: &[PendingAudit],
    ) -> Result<(), WorkflowError> {
        if pending.is_empty() {
            return Ok(());
        }

        let all: Vec<AuditLogEntry> = pending.iter().map(|item| item.entry.clone()).collect();
        let first_failure = match self.audit.append(&all) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let required: Vec<AuditLogEntry> = pending
            .iter()
            .filter(|item| item.required)
            .map(|item| item.entry.clone())
            .collect();

        if !required.is_empty() {
            self.audit.append(&required)?;
        }

        for item in pending.iter().filter(|item| !item.required) {
            warn!(
                request_id = ctx.request_id(),
                action = item.entry.action(),
                error = %first_failure,
                "best-effort audit entry dropped"
            );
        }
        Ok(())
    }
}

impl fmt::Debug for WorkflowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowStore")
            .field("config", &self.config)
            .field("publisher", &self.publisher.is_some())
            .field("notifier", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}
