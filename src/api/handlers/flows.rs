//! Version store endpoints (§4.11, §6.2 `/flows/{id}/*`).

use axum::extract::{Path, State};
use axum::Json;

use crate::api::{
    error::ApiResult,
    models::{RestoreRequest, RollbackRequest, ScheduleRequest, VersionView, WorkflowView},
    routes::AppState,
};
use crate::db::models::{WorkflowRow, WorkflowVersionRow};
use crate::db::repositories::WorkflowRepository;
use crate::versions;

fn to_version_view(v: &WorkflowVersionRow) -> VersionView {
    VersionView {
        id: v.id.clone(),
        workflow_id: v.workflow_id.clone(),
        version_number: v.version_number,
        graph: serde_json::from_str(&v.graph).unwrap_or(serde_json::Value::Null),
        created_at: v.created_at.clone(),
    }
}

fn to_workflow_view(w: &WorkflowRow) -> WorkflowView {
    WorkflowView {
        id: w.id.clone(),
        name: w.name.clone(),
        draft_graph: serde_json::from_str(&w.draft_graph).unwrap_or(serde_json::Value::Null),
        active_version_id: w.active_version_id.clone(),
    }
}

/// `GET /flows/{workflowId}/versions`: full version history, newest
/// first.
pub async fn list_versions(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<Vec<VersionView>>> {
    let versions = versions::list_versions(&app_state.pool, &workflow_id).await?;
    Ok(Json(versions.iter().map(to_version_view).collect()))
}

/// `POST /flows/{workflowId}/versions`: publish the current draft (§4.11
/// Publish).
pub async fn publish_version(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<VersionView>> {
    let version = versions::publish(&app_state.pool, &workflow_id).await?;
    Ok(Json(to_version_view(&version)))
}

/// `POST /flows/{workflowId}/rollback` (§4.11 Rollback).
pub async fn rollback_version(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> ApiResult<Json<VersionView>> {
    let version = versions::rollback(&app_state.pool, &workflow_id, &req.version_id).await?;
    Ok(Json(to_version_view(&version)))
}

/// `POST /flows/{workflowId}/discard` (§4.11 Discard).
pub async fn discard_draft(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<WorkflowView>> {
    let workflow = versions::discard(&app_state.pool, &workflow_id).await?;
    Ok(Json(to_workflow_view(&workflow)))
}

/// `POST /flows/{workflowId}/restore` (§4.11 Restore).
pub async fn restore_version(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(req): Json<RestoreRequest>,
) -> ApiResult<Json<WorkflowView>> {
    let workflow = versions::restore(&app_state.pool, &workflow_id, &req.version_id).await?;
    Ok(Json(to_workflow_view(&workflow)))
}

/// `PATCH /flows/{workflowId}/schedule` (§4.9 Cron).
pub async fn set_schedule(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<Json<WorkflowView>> {
    WorkflowRepository::set_schedule(
        &app_state.pool,
        &workflow_id,
        req.enabled,
        req.cron.as_deref(),
        req.timezone.as_deref(),
        &req.input_data.to_string(),
        &req.overlap_mode,
    )
    .await
    .map_err(crate::OrchestratorError::from)?;

    let workflow = WorkflowRepository::get_by_id(&app_state.pool, &workflow_id)
        .await
        .map_err(crate::OrchestratorError::from)?
        .ok_or_else(|| crate::OrchestratorError::NotFound(format!("workflow {workflow_id} not found")))?;
    Ok(Json(to_workflow_view(&workflow)))
}
