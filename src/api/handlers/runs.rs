//! Run inspection and control (§4.3, §4.6, §4.11, §6.2 `/runs*`).

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::{
    error::{ApiError, ApiResult},
    middleware::validation::validate_pagination,
    models::{
        ActiveRunQuery, ActiveRunResponse, NodeResultView, NodeStatus, PatchRunRequest,
        RunDetailResponse, RunEventView, RunListQuery, RunListResponse, RunSummaryView,
    },
    routes::AppState,
};
use crate::db::models::WorkflowRunRow;
use crate::db::repositories::WorkflowRunRepository;
use crate::eventlog;
use crate::lifecycle;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

fn to_summary(run: &WorkflowRunRow) -> RunSummaryView {
    RunSummaryView {
        id: run.id.clone(),
        workflow_id: run.workflow_id.clone(),
        status: run.status.clone(),
        trigger: run.trigger.clone(),
        pinned: run.pinned,
        created_at: run.created_at.clone(),
        started_at: run.started_at.clone(),
        finished_at: run.finished_at.clone(),
    }
}

/// `GET /runs`: cursor-paged listing, newest first (§6.2).
pub async fn list_runs(
    State(app_state): State<AppState>,
    Query(query): Query<RunListQuery>,
) -> ApiResult<Json<RunListResponse>> {
    let limit = validate_pagination(query.limit, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    let runs = WorkflowRunRepository::list_paged(
        &app_state.pool,
        query.workflow_id.as_deref(),
        query.status.as_deref(),
        query.trigger.as_deref(),
        query.pinned,
        query.cursor.as_deref(),
        limit,
    )
    .await
    .map_err(crate::OrchestratorError::from)?;

    let next_cursor = if runs.len() as i64 == limit {
        runs.last().map(|r| r.id.clone())
    } else {
        None
    };

    Ok(Json(RunListResponse {
        runs: runs.iter().map(to_summary).collect(),
        next_cursor,
    }))
}

async fn build_node_results(pool: &crate::db::connection::DatabasePool, run_id: &str) -> ApiResult<HashMap<String, NodeResultView>> {
    let outputs = eventlog::node_outputs(pool, run_id).await.map_err(ApiError::from)?;
    let completed = eventlog::completed_node_ids(pool, run_id).await.map_err(ApiError::from)?;
    let failed = eventlog::failed_node_ids(pool, run_id).await.map_err(ApiError::from)?;
    let in_flight = eventlog::in_flight_node_ids(pool, run_id).await.map_err(ApiError::from)?;

    let mut results = HashMap::new();
    for node_id in completed {
        results.insert(
            node_id.clone(),
            NodeResultView { status: NodeStatus::Completed, output: outputs.get(&node_id).cloned() },
        );
    }
    for node_id in failed {
        results.insert(node_id, NodeResultView { status: NodeStatus::Failed, output: None });
    }
    for node_id in in_flight {
        results.insert(node_id, NodeResultView { status: NodeStatus::InFlight, output: None });
    }
    Ok(results)
}

/// `GET /runs/{runId}`: full detail — summary, raw event log, and derived
/// per-node status (§4.3, §4.6).
pub async fn get_run(
    State(app_state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunDetailResponse>> {
    let run = WorkflowRunRepository::get_by_id(&app_state.pool, &run_id)
        .await
        .map_err(crate::OrchestratorError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;

    let events = eventlog::list_for_run(&app_state.pool, &run_id).await.map_err(ApiError::from)?;
    let node_results = build_node_results(&app_state.pool, &run_id).await?;
    let output_data = run.output_data.as_deref().and_then(|s| serde_json::from_str(s).ok());

    Ok(Json(RunDetailResponse {
        run: to_summary(&run),
        output_data,
        events: events
            .into_iter()
            .map(|e| RunEventView {
                id: e.id,
                node_id: e.node_id.clone(),
                event_type: e.event_type.clone(),
                retry_count: e.retry_count,
                payload: serde_json::from_str(&e.payload).unwrap_or(serde_json::Value::Null),
                created_at: e.created_at.clone(),
            })
            .collect(),
        node_results,
    }))
}

/// `GET /runs/active?workflowId=`: the most recent non-terminal run for a
/// workflow, used to restore UI state on reconnect (§4.6).
pub async fn active_run(
    State(app_state): State<AppState>,
    Query(query): Query<ActiveRunQuery>,
) -> ApiResult<Json<ActiveRunResponse>> {
    let run = WorkflowRunRepository::latest_active_for_workflow(&app_state.pool, &query.workflow_id)
        .await
        .map_err(crate::OrchestratorError::from)?;

    let node_results = match &run {
        Some(run) => build_node_results(&app_state.pool, &run.id).await?,
        None => HashMap::new(),
    };

    Ok(Json(ActiveRunResponse { run: run.as_ref().map(to_summary), node_results }))
}

/// `PATCH /runs/{runId}`: currently only flips `pinned` (§3 "Ownership &
/// lifecycle").
pub async fn patch_run(
    State(app_state): State<AppState>,
    Path(run_id): Path<String>,
    Json(req): Json<PatchRunRequest>,
) -> ApiResult<Json<RunSummaryView>> {
    let _existing = WorkflowRunRepository::get_by_id(&app_state.pool, &run_id)
        .await
        .map_err(crate::OrchestratorError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;

    WorkflowRunRepository::set_pinned(&app_state.pool, &run_id, req.pinned)
        .await
        .map_err(crate::OrchestratorError::from)?;

    let run = WorkflowRunRepository::get_by_id(&app_state.pool, &run_id)
        .await
        .map_err(crate::OrchestratorError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;
    Ok(Json(to_summary(&run)))
}

/// `DELETE /runs/{runId}`: manual deletion outside the retention sweeper;
/// only terminal, unpinned runs may be deleted directly.
pub async fn delete_run(State(app_state): State<AppState>, Path(run_id): Path<String>) -> ApiResult<StatusCode> {
    let run = WorkflowRunRepository::get_by_id(&app_state.pool, &run_id)
        .await
        .map_err(crate::OrchestratorError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;

    if run.pinned {
        return Err(ApiError::Conflict(format!("run {run_id} is pinned")));
    }
    if !run.is_terminal() {
        return Err(ApiError::Conflict(format!("run {run_id} is not terminal")));
    }

    WorkflowRunRepository::delete(&app_state.pool, &run_id)
        .await
        .map_err(crate::OrchestratorError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /runs/{runId}/cancel` (§4.6 Cancellation).
pub async fn cancel_run(State(app_state): State<AppState>, Path(run_id): Path<String>) -> ApiResult<StatusCode> {
    let cancelled = lifecycle::cancel(&app_state.pool, app_state.bus.as_ref(), &run_id).await?;
    if cancelled {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::Conflict(format!("run {run_id} is already terminal")))
    }
}

/// `POST /runs/{runId}/replay` (§4.11/§8: a fresh run from the same
/// snapshot graph, trigger, and input).
pub async fn replay_run(
    State(app_state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<crate::api::models::TriggerResponse>> {
    let (run, scheduled_nodes) =
        lifecycle::replay(&app_state.pool, app_state.bus.as_ref(), &app_state.secrets, &run_id).await?;
    Ok(Json(crate::api::models::TriggerResponse { run_id: run.id, scheduled_nodes }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::create_test_app_state;
    use crate::model::Graph;
    use serde_json::json;

    async fn seed_run(state: &AppState) -> String {
        let graph: Graph = serde_json::from_value(json!({
            "nodes": [{"id": "A", "type": "delay", "data": {"durationMs": 60000}}],
            "edges": []
        }))
        .unwrap();
        let result = crate::trigger::trigger_manual(
            &state.pool,
            state.bus.as_ref(),
            &state.secrets,
            None,
            Some(graph),
            json!({}),
            None,
        )
        .await
        .unwrap();
        result.run_id
    }

    #[tokio::test]
    async fn get_run_returns_detail() {
        let state = create_test_app_state().await;
        let run_id = seed_run(&state).await;
        let resp = get_run(State(state), Path(run_id.clone())).await.unwrap();
        assert_eq!(resp.0.run.id, run_id);
    }

    #[tokio::test]
    async fn get_run_missing_is_not_found() {
        let state = create_test_app_state().await;
        let err = get_run(State(state), Path("missing".to_string())).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn patch_run_sets_pinned() {
        let state = create_test_app_state().await;
        let run_id = seed_run(&state).await;
        let resp = patch_run(State(state), Path(run_id), Json(PatchRunRequest { pinned: true }))
            .await
            .unwrap();
        assert!(resp.0.pinned);
    }

    #[tokio::test]
    async fn delete_run_rejects_non_terminal() {
        let state = create_test_app_state().await;
        let run_id = seed_run(&state).await;
        let err = delete_run(State(state), Path(run_id)).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_run_accepts_running_run() {
        let state = create_test_app_state().await;
        let run_id = seed_run(&state).await;
        let status = cancel_run(State(state), Path(run_id)).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
