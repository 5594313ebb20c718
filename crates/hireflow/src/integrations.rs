//! Contracts for external verification providers (E-Verify, background checks).
//!
//! The core never speaks a vendor protocol; it hands a [`ProviderRequest`] to an
//! adapter and gets back an opaque external id it can poll or cancel later.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::ids::EntityRef;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRequest {
    pub subject: EntityRef,
    pub fields: BTreeMap<String, String>,
}

impl ProviderRequest {
    pub fn new(subject: EntityRef) -> Self {
        Self {
            subject,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Normalized provider verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ProviderStatus {
    Pending,
    Authorized,
    TentativeNonConfirmation { reason: Option<String> },
    FinalNonConfirmation { reason: Option<String> },
    Closed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("unknown external id {0}")]
    UnknownCase(String),
}

pub trait ProviderAdapter: Send + Sync {
    fn submit(&self, request: &ProviderRequest) -> Result<String, ProviderError>;
    fn poll(&self, external_id: &str) -> Result<ProviderStatus, ProviderError>;
    fn cancel(&self, external_id: &str) -> Result<(), ProviderError>;
}

/// In-process provider whose verdicts are set by the caller. Used by the demo
/// service and tests.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    cases: Mutex<BTreeMap<String, ProviderStatus>>,
    cancelled: Mutex<Vec<String>>,
    reject_submissions: Mutex<Option<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the verdict the next poll of `external_id` returns.
    pub fn set_status(&self, external_id: &str, status: ProviderStatus) {
        if let Ok(mut cases) = self.cases.lock() {
            cases.insert(external_id.to_string(), status);
        }
    }

    /// Make every following submission fail with `reason`.
    pub fn reject_submissions(&self, reason: impl Into<String>) {
        if let Ok(mut rejection) = self.reject_submissions.lock() {
            *rejection = Some(reason.into());
        }
    }

    pub fn submitted(&self) -> Vec<String> {
        self.cases
            .lock()
            .map(|cases| cases.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled
            .lock()
            .map(|cancelled| cancelled.clone())
            .unwrap_or_default()
    }
}

impl ProviderAdapter for ScriptedProvider {
    fn submit(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        if let Some(reason) = self
            .reject_submissions
            .lock()
            .map_err(|_| ProviderError::Unavailable("provider state poisoned".to_string()))?
            .clone()
        {
            return Err(ProviderError::Rejected(reason));
        }
        let mut cases = self
            .cases
            .lock()
            .map_err(|_| ProviderError::Unavailable("provider state poisoned".to_string()))?;
        let external_id = format!("EV-{:05}-{}", cases.len() + 1, request.subject.id.simple());
        cases.insert(external_id.clone(), ProviderStatus::Pending);
        Ok(external_id)
    }

    fn poll(&self, external_id: &str) -> Result<ProviderStatus, ProviderError> {
        self.cases
            .lock()
            .map_err(|_| ProviderError::Unavailable("provider state poisoned".to_string()))?
            .get(external_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownCase(external_id.to_string()))
    }

    fn cancel(&self, external_id: &str) -> Result<(), ProviderError> {
        let mut cases = self
            .cases
            .lock()
            .map_err(|_| ProviderError::Unavailable("provider state poisoned".to_string()))?;
        match cases.get_mut(external_id) {
            Some(status) => {
                *status = ProviderStatus::Closed;
                drop(cases);
                if let Ok(mut cancelled) = self.cancelled.lock() {
                    cancelled.push(external_id.to_string());
                }
                Ok(())
            }
            None => Err(ProviderError::UnknownCase(external_id.to_string())),
        }
    }
}
