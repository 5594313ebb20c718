use serde::Serialize;
use uuid::Uuid;

use crate::audit::AuditError;
use crate::ids::{EntityKind, EntityRef};
use crate::integrations::ProviderError;

/// Everything a workflow operation can be rejected with.
///
/// Any error aborts the enclosing unit of work; nothing staged before the failure is
/// committed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("event '{event}' is not defined on the {machine} workflow")]
    UnknownEvent { machine: &'static str, event: String },
    #[error("cannot {event} {entity} while it is {state}")]
    IllegalTransition {
        entity: EntityRef,
        state: &'static str,
        event: String,
    },
    #[error("{event} on {entity} blocked: {reason}")]
    GuardFailed {
        entity: EntityRef,
        event: &'static str,
        reason: String,
    },
    #[error("{record} {id} is immutable and cannot be {operation}")]
    ImmutabilityViolation {
        record: &'static str,
        id: String,
        operation: &'static str,
    },
    #[error("uniqueness violated: {0}")]
    UniquenessViolation(String),
    #[error("invalid {field}: {message}")]
    FieldValidation {
        field: &'static str,
        message: String,
    },
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },
    #[error("required audit write failed: {0}")]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("workflow store unavailable")]
    StoreUnavailable,
}

impl WorkflowError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::FieldValidation {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownEvent { .. } => ErrorKind::UnknownEvent,
            Self::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            Self::GuardFailed { .. } => ErrorKind::GuardFailed,
            Self::ImmutabilityViolation { .. } => ErrorKind::ImmutabilityViolation,
            Self::UniquenessViolation(_) => ErrorKind::UniquenessViolation,
            Self::FieldValidation { .. } => ErrorKind::FieldValidation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Audit(_) | Self::Provider(_) | Self::StoreUnavailable => ErrorKind::Unavailable,
        }
    }
}

/// Stable, caller-facing classification of a [`WorkflowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownEvent,
    IllegalTransition,
    GuardFailed,
    ImmutabilityViolation,
    UniquenessViolation,
    FieldValidation,
    NotFound,
    Unavailable,
}

impl ErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::UnknownEvent => "unknown_event",
            Self::IllegalTransition => "illegal_transition",
            Self::GuardFailed => "guard_failed",
            Self::ImmutabilityViolation => "immutability_violation",
            Self::UniquenessViolation => "uniqueness_violation",
            Self::FieldValidation => "field_validation",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
        }
    }
}
