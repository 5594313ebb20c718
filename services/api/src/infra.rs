use chrono::NaiveDate;
use hireflow::audit::MemoryAuditLog;
use hireflow::config::WorkflowConfig;
use hireflow::dispatch::MemoryDispatch;
use hireflow::{Clock, WorkflowStore};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// In-process store wiring: memory audit log and a dispatch outbox that keeps
/// what it was handed so the demo can print it.
pub(crate) struct InMemoryBackend {
    pub(crate) store: Arc<WorkflowStore>,
    pub(crate) audit: Arc<MemoryAuditLog>,
    pub(crate) dispatch: Arc<MemoryDispatch>,
}

pub(crate) fn in_memory_backend(clock: Arc<dyn Clock>, config: WorkflowConfig) -> InMemoryBackend {
    let audit = Arc::new(MemoryAuditLog::new());
    let dispatch = Arc::new(MemoryDispatch::new());
    let store = WorkflowStore::new(audit.clone(), clock, config)
        .with_publisher(dispatch.clone())
        .with_notifier(dispatch.clone());

    InMemoryBackend {
        store: Arc::new(store),
        audit,
        dispatch,
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_padded_iso_dates() {
        assert_eq!(
            parse_date(" 2025-01-06 "),
            Ok(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap())
        );
    }

    #[test]
    fn parse_date_names_the_expected_format() {
        let err = parse_date("06/01/2025").unwrap_err();
        assert!(err.contains("YYYY-MM-DD"));
    }
}
