//! Manual trigger intake (§4.9, §6.2 `POST /triggers/manual`).

use axum::extract::State;
use axum::Json;

use crate::api::{
    error::{ApiError, ApiResult},
    models::{ManualTriggerRequest, TriggerResponse},
    routes::AppState,
};
use crate::trigger;

pub async fn trigger_manual(
    State(app_state): State<AppState>,
    Json(req): Json<ManualTriggerRequest>,
) -> ApiResult<Json<TriggerResponse>> {
    if req.workflow_id.is_none() && req.graph.is_none() {
        return Err(ApiError::ValidationError(
            "manual trigger requires either workflowId or graph".to_string(),
        ));
    }

    let result = trigger::trigger_manual(
        &app_state.pool,
        app_state.bus.as_ref(),
        &app_state.secrets,
        req.workflow_id.as_deref(),
        req.graph,
        req.input_data,
        req.start_from_node.as_deref(),
    )
    .await?;

    Ok(Json(TriggerResponse {
        run_id: result.run_id,
        scheduled_nodes: result.scheduled_nodes,
    }))
}
