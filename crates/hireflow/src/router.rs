use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditLogEntry, AuditQuery};
use crate::context::TenantContext;
use crate::engine::MachineSummary;
use crate::error::AppError;
use crate::ids::{OrganizationId, UserId};
use crate::store::WorkflowStore;
use crate::workflows;

const ORGANIZATION_HEADER: &str = "x-organization-id";
const ACTOR_HEADER: &str = "x-actor-id";
const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// HTTP surface over the workflow registry and the audit trail.
pub fn workflow_router(store: Arc<WorkflowStore>) -> Router {
    Router::new()
        .route("/api/v1/workflows/:machine", get(machine_handler))
        .route(
            "/api/v1/workflows/:machine/:id/events/:event",
            post(fire_handler),
        )
        .route("/api/v1/audit", get(audit_handler))
        .with_state(store)
}

pub(crate) async fn machine_handler(
    Path(machine): Path<String>,
) -> Result<Json<MachineSummary>, AppError> {
    workflows::machine(&machine)
        .map(|descriptor| Json(descriptor.summary()))
        .ok_or_else(|| AppError::BadRequest(format!("unknown machine '{machine}'")))
}

pub(crate) async fn fire_handler(
    State(store): State<Arc<WorkflowStore>>,
    Path((machine, id, event)): Path<(String, Uuid, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let ctx = tenant_context(&headers)?;
    let status = store.transaction(&ctx, |uow| {
        workflows::fire_by_name(uow, &machine, id, &event)
    })?;

    info!(
        request_id = ctx.request_id(),
        %machine,
        %id,
        %event,
        status,
        "workflow event fired"
    );
    Ok(Json(json!({
        "machine": machine,
        "id": id,
        "event": event,
        "status": status,
    })))
}

pub(crate) async fn audit_handler(
    State(store): State<Arc<WorkflowStore>>,
    Query(mut query): Query<AuditQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    let ctx = tenant_context(&headers)?;
    query.organization_id = Some(ctx.organization_id());
    Ok(Json(store.query_audit(&query)?))
}

/// Build the per-request context from headers. The organization is mandatory.
pub(crate) fn tenant_context(headers: &HeaderMap) -> Result<TenantContext, AppError> {
    let organization_id = header_uuid(headers, ORGANIZATION_HEADER)?
        .map(OrganizationId::from)
        .ok_or_else(|| AppError::BadRequest(format!("missing {ORGANIZATION_HEADER} header")))?;

    let mut ctx = match header_uuid(headers, ACTOR_HEADER)?.map(UserId::from) {
        Some(actor_id) => TenantContext::for_actor(organization_id, actor_id),
        None => TenantContext::system(organization_id),
    };

    if let Some(request_id) = header_str(headers, REQUEST_ID_HEADER) {
        ctx = ctx.with_request_id(request_id);
    }
    if let Some(user_agent) = header_str(headers, header::USER_AGENT.as_str()) {
        ctx = ctx.with_user_agent(user_agent);
    }
    let client_ip = header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());
    if let Some(client_ip) = client_ip {
        ctx = ctx.with_client_ip(client_ip);
    }
    Ok(ctx)
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, AppError> {
    header_str(headers, name)
        .map(|raw| {
            Uuid::parse_str(raw)
                .map_err(|_| AppError::BadRequest(format!("{name} must be a UUID, got '{raw}'")))
        })
        .transpose()
}
