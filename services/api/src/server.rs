use crate::cli::ServeArgs;
use crate::infra::{in_memory_backend, AppState};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use hireflow::config::AppConfig;
use hireflow::error::AppError;
use hireflow::{telemetry, workflow_router, SystemClock};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let backend = in_memory_backend(Arc::new(SystemClock), config.workflow.clone());

    let app = with_operational_routes(workflow_router(backend.store))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        i9_section2_business_days = config.workflow.i9_section2_business_days,
        everify_tnc_business_days = config.workflow.everify_tnc_business_days,
        fcra_waiting_period_days = config.workflow.fcra_waiting_period_days,
        "hiring workflow service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
