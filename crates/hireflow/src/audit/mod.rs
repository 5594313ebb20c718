//! Immutable audit trail.
//!
//! Operations stage [`AuditRecord`]s on the unit of work. Required records are written
//! before the transaction's state changes become visible and abort it on failure;
//! best-effort records are written afterwards and only logged when they fail.

mod entry;
mod sink;

pub use entry::{
    is_sensitive_field, sanitize_changes, sanitize_metadata, AuditLogEntry, AuditRecord,
    ChangeSet, FieldChange, Metadata, MAX_VALUE_CHARS,
};
pub use sink::{AuditError, AuditQuery, AuditSink, MemoryAuditLog};

use crate::store::UnitOfWork;

/// Stage an audit record that may be lost without failing the operation.
pub fn record(uow: &mut UnitOfWork<'_>, record: AuditRecord) {
    uow.stage_audit(record, false);
}

/// Stage an audit record whose write must succeed for the operation to commit.
pub fn record_required(uow: &mut UnitOfWork<'_>, record: AuditRecord) {
    uow.stage_audit(record, true);
}
