//! Worker registry endpoint (§4.12, §6.2 `GET /workers`).

use axum::extract::State;
use axum::Json;

use crate::api::{error::ApiResult, routes::AppState};
use crate::workers::{self, WorkerRegistryView};

pub async fn list_workers(State(app_state): State<AppState>) -> ApiResult<Json<WorkerRegistryView>> {
    let view = workers::registry_view(app_state.bus.as_ref()).await?;
    Ok(Json(view))
}
