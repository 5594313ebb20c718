//! Workflow orchestration core for regulated hiring.
//!
//! State machines for requisitions, applications, interviews, scorecards, offers
//! and the I-9, E-Verify and FCRA compliance lifecycles, executed by one generic
//! engine inside tenant-scoped units of work that leave an immutable audit trail.

pub mod audit;
pub mod calendar;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ids;
pub mod integrations;
pub mod records;
pub mod router;
pub mod store;
pub mod telemetry;
pub mod workflows;

pub use context::TenantContext;
pub use engine::{fire, fire_with, ErrorKind, WorkflowError};
pub use router::workflow_router;
pub use store::{Clock, FixedClock, SystemClock, UnitOfWork, WorkflowStore};
