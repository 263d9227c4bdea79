//! Management surface handlers.
//!
//! The host exposes a small JSON API for operating extensions: listing,
//! enable/disable, status, metrics, audit, and on-demand health probes.
//! Mutations require the `admin` role when management auth is enabled.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::host_error::HostError;
use crate::middleware::{require_admin, RequestPrincipal};
use crate::server::AppState;

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": state.registry.host_version(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /extensions`
pub async fn list_extensions(State(state): State<AppState>) -> Json<Value> {
    let extensions = state.registry.list().await;
    Json(json!({ "extensions": extensions }))
}

/// `POST /extensions/{name}/enable`
pub async fn enable_extension(
    State(state): State<AppState>,
    Path(name): Path<String>,
    principal: Option<Extension<RequestPrincipal>>,
) -> Result<Json<Value>, HostError> {
    require_admin(state.config.auth.enabled, principal.as_deref())?;
    state.registry.enable(&name).await?;
    let status = state.registry.status(&name).await;
    Ok(Json(json!({ "name": name, "status": status })))
}

/// `POST /extensions/{name}/disable`
pub async fn disable_extension(
    State(state): State<AppState>,
    Path(name): Path<String>,
    principal: Option<Extension<RequestPrincipal>>,
) -> Result<Json<Value>, HostError> {
    require_admin(state.config.auth.enabled, principal.as_deref())?;
    state.registry.disable(&name).await?;
    let status = state.registry.status(&name).await;
    Ok(Json(json!({ "name": name, "status": status })))
}

/// `GET /extensions/{name}/status`
pub async fn extension_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, HostError> {
    let status = state
        .registry
        .status(&name)
        .await
        .ok_or_else(|| HostError::NotFound(name.clone()))?;
    Ok(Json(json!({ "name": name, "status": status })))
}

/// `GET /extensions/{name}/metrics`
pub async fn extension_metrics(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, HostError> {
    let metrics = state
        .registry
        .metrics(&name)
        .await
        .ok_or_else(|| HostError::NotFound(name.clone()))?;
    Ok(Json(json!({ "name": name, "metrics": metrics })))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

/// `GET /extensions/{name}/audit?limit=`
pub async fn extension_audit(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, HostError> {
    state
        .registry
        .get(&name)
        .await
        .ok_or_else(|| HostError::NotFound(name.clone()))?;
    let entries = state.registry.audit_entries(Some(&name), query.limit);
    Ok(Json(json!({ "name": name, "entries": entries })))
}

/// `POST /extensions/{name}/health`: on-demand probe, recorded in status.
pub async fn probe_extension_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, HostError> {
    let probe = state.registry.probe_health(&name).await?;
    Ok(Json(json!({ "name": name, "health": probe })))
}

/// `GET /metrics`: every extension's metrics.
pub async fn all_metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "extensions": state.registry.metrics_collector().all() }))
}

/// `GET /metrics/prometheus`: text exposition.
pub async fn prometheus_metrics(State(state): State<AppState>) -> String {
    state.registry.metrics_collector().prometheus()
}

/// Catch-all for `/ext/{*path}`: hand the raw request to the registry's
/// dispatch pipeline.
pub async fn extension_dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    state.registry.handle_request(req).await.into_response()
}
