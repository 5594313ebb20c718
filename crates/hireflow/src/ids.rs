//! Strongly typed identifiers and entity references.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub Uuid);

            impl $name {
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl From<Uuid> for $name {
                fn from(value: Uuid) -> Self {
                    Self(value)
                }
            }
        )+
    };
}

entity_id!(
    /// Tenant key. Every workflow entity belongs to exactly one organization.
    OrganizationId,
    /// A human actor. System actions carry no user.
    UserId,
    CandidateId,
    JobId,
    ApplicationId,
    InterviewId,
    ScorecardId,
    OfferId,
    ApprovalId,
    I9VerificationId,
    EVerifyCaseId,
    AdverseActionId,
    StageTransitionId,
    HiringDecisionId,
    AuditEntryId,
);

/// Kinds of records the core tracks; used for audit subjects and event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Application,
    Interview,
    Scorecard,
    Offer,
    Approval,
    I9Verification,
    EVerifyCase,
    AdverseAction,
    StageTransition,
    HiringDecision,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Application => "application",
            Self::Interview => "interview",
            Self::Scorecard => "scorecard",
            Self::Offer => "offer",
            Self::Approval => "approval",
            Self::I9Verification => "i9_verification",
            Self::EVerifyCase => "everify_case",
            Self::AdverseAction => "adverse_action",
            Self::StageTransition => "stage_transition",
            Self::HiringDecision => "hiring_decision",
        }
    }

    /// Entities whose committed transitions are published to the webhook bus.
    pub const fn publishes_events(self) -> bool {
        matches!(
            self,
            Self::Application | Self::Interview | Self::Offer | Self::AdverseAction
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Subject reference (type + id) stamped on audit entries and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<Uuid>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

macro_rules! into_uuid {
    ($($name:ident),+) => {
        $(
            impl From<$name> for Uuid {
                fn from(value: $name) -> Self {
                    value.0
                }
            }
        )+
    };
}

into_uuid!(
    OrganizationId,
    UserId,
    CandidateId,
    JobId,
    ApplicationId,
    InterviewId,
    ScorecardId,
    OfferId,
    ApprovalId,
    I9VerificationId,
    EVerifyCaseId,
    AdverseActionId,
    StageTransitionId,
    HiringDecisionId,
    AuditEntryId
);
