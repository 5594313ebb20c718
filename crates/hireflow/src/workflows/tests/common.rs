use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::audit::{AuditError, AuditLogEntry, AuditQuery, AuditSink, MemoryAuditLog};
use crate::config::WorkflowConfig;
use crate::context::TenantContext;
use crate::dispatch::MemoryDispatch;
use crate::engine::{fire, WorkflowError};
use crate::ids::{CandidateId, OrganizationId, UserId};
use crate::store::{FixedClock, Stored, UnitOfWork, WorkflowStore};
use crate::workflows::application::{self, Application, ApplicationStatus, NewApplication};
use crate::workflows::job::{self, Job, NewJob};

/// Monday 2025-01-06 09:00 UTC.
pub(super) fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// How [`FlakyAuditSink`] treats incoming batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum AuditFailure {
    None,
    /// Every append fails.
    All,
    /// Batches containing this action fail; the rest are stored.
    Action(String),
}

/// Audit sink that can be told to fail, wrapping the in-memory log.
pub(super) struct FlakyAuditSink {
    inner: MemoryAuditLog,
    failure: Mutex<AuditFailure>,
}

impl FlakyAuditSink {
    pub(super) fn new() -> Self {
        Self {
            inner: MemoryAuditLog::new(),
            failure: Mutex::new(AuditFailure::None),
        }
    }

    pub(super) fn fail(&self, failure: AuditFailure) {
        *self.failure.lock().expect("failure mode mutex poisoned") = failure;
    }

    pub(super) fn entries(&self) -> Vec<AuditLogEntry> {
        self.inner.entries()
    }

    pub(super) fn actions(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|entry| entry.action().to_string())
            .collect()
    }
}

impl AuditSink for FlakyAuditSink {
    fn append(&self, entries: &[AuditLogEntry]) -> Result<(), AuditError> {
        let failure = self
            .failure
            .lock()
            .expect("failure mode mutex poisoned")
            .clone();
        match failure {
            AuditFailure::None => self.inner.append(entries),
            AuditFailure::All => Err(AuditError::Unavailable("audit database down".to_string())),
            AuditFailure::Action(action) => {
                if entries.iter().any(|entry| entry.action() == action) {
                    Err(AuditError::Unavailable(format!("cannot store {action}")))
                } else {
                    self.inner.append(entries)
                }
            }
        }
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, AuditError> {
        self.inner.query(query)
    }
}

/// One tenant's view of a fresh store with a fixed clock.
pub(super) struct Harness {
    pub(super) store: Arc<WorkflowStore>,
    pub(super) audit: Arc<FlakyAuditSink>,
    pub(super) dispatch: Arc<MemoryDispatch>,
    pub(super) clock: Arc<FixedClock>,
    pub(super) organization_id: OrganizationId,
    pub(super) recruiter: UserId,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self::with_config(WorkflowConfig::default())
    }

    pub(super) fn with_config(config: WorkflowConfig) -> Self {
        let audit = Arc::new(FlakyAuditSink::new());
        let dispatch = Arc::new(MemoryDispatch::new());
        let clock = Arc::new(FixedClock::new(monday_morning()));
        let store = WorkflowStore::new(audit.clone(), clock.clone(), config)
            .with_publisher(dispatch.clone())
            .with_notifier(dispatch.clone());
        Self {
            store: Arc::new(store),
            audit,
            dispatch,
            clock,
            organization_id: OrganizationId::new(),
            recruiter: UserId::new(),
        }
    }

    pub(super) fn ctx(&self) -> TenantContext {
        TenantContext::for_actor(self.organization_id, self.recruiter)
    }

    pub(super) fn ctx_for(&self, actor: UserId) -> TenantContext {
        TenantContext::for_actor(self.organization_id, actor)
    }

    /// Run `operation` as the recruiter.
    pub(super) fn run<T, F>(&self, operation: F) -> Result<T, WorkflowError>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, WorkflowError>,
    {
        self.store.transaction(&self.ctx(), operation)
    }

    pub(super) fn run_as<T, F>(&self, actor: UserId, operation: F) -> Result<T, WorkflowError>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, WorkflowError>,
    {
        self.store.transaction(&self.ctx_for(actor), operation)
    }

    pub(super) fn load<E: Stored>(&self, id: E::Id) -> E {
        self.store.load::<E>(&self.ctx(), id).expect("entity loads")
    }

    pub(super) fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub(super) fn audit_actions(&self) -> Vec<String> {
        self.audit.actions()
    }

    pub(super) fn audit_count(&self, action: &str) -> usize {
        self.audit_actions()
            .iter()
            .filter(|candidate| candidate.as_str() == action)
            .count()
    }
}

pub(super) fn new_job(headcount: u32) -> NewJob {
    NewJob {
        title: "Backend Engineer".to_string(),
        department: Some("Platform".to_string()),
        hiring_manager_id: None,
        headcount,
    }
}

/// A job taken straight to `open` with no approvers.
pub(super) fn open_job(h: &Harness, headcount: u32) -> Job {
    h.run(|uow| {
        let job = job::create(uow, new_job(headcount))?;
        job::submit_for_approval(uow, job.id, &[])?;
        fire::<Job>(uow, job.id, "approve")?;
        uow.load::<Job>(job.id)
    })
    .expect("job opened")
}

pub(super) fn apply(h: &Harness, job: &Job) -> Application {
    h.run(|uow| {
        application::create(
            uow,
            NewApplication {
                job_id: job.id,
                candidate_id: CandidateId::new(),
                source: Some("referral".to_string()),
            },
        )
    })
    .expect("application created")
}

/// Walk a fresh application forward to `stage` using the forward events.
pub(super) fn application_at(h: &Harness, job: &Job, stage: ApplicationStatus) -> Application {
    let created = apply(h, job);
    let path: &[(&str, ApplicationStatus)] = &[
        ("advance_to_screening", ApplicationStatus::Screening),
        ("advance_to_interviewing", ApplicationStatus::Interviewing),
        ("advance_to_assessment", ApplicationStatus::Assessment),
        ("advance_to_background_check", ApplicationStatus::BackgroundCheck),
        ("advance_to_offer", ApplicationStatus::Offered),
    ];
    if stage == ApplicationStatus::New {
        return created;
    }
    h.run(|uow| {
        for (event, reached) in path {
            fire::<Application>(uow, created.id, event)?;
            if *reached == stage {
                break;
            }
        }
        uow.load::<Application>(created.id)
    })
    .expect("application advanced")
}
