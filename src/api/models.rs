//! API request/response DTOs (§6.2).
//!
//! Thin, `camelCase`-on-the-wire shapes layered over the domain types in
//! [`crate::model`] and the row types in [`crate::db::models`] — handlers
//! translate between them, domain code never speaks HTTP.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Graph;

/// `GET /health` (no DB check).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `GET /api/v1/system/health` (DB check included).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub healthy: bool,
    pub pool_size: u32,
    pub idle_connections: u32,
}

// ---------------------------------------------------------------------
// Triggers (§6.2 POST /triggers/manual)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ManualTriggerRequest {
    #[serde(rename = "workflowId")]
    pub workflow_id: Option<String>,
    pub graph: Option<Graph>,
    #[serde(rename = "startFromNode")]
    pub start_from_node: Option<String>,
    #[serde(default)]
    pub input_data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerResponse {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "scheduledNodes")]
    pub scheduled_nodes: Vec<String>,
}

// ---------------------------------------------------------------------
// Webhooks (§6.2 POST /webhooks/{flowId}, POST /webhooks/resume/{token})
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAcceptedResponse {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "scheduledNodes")]
    pub scheduled_nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookResumeRequest(pub Value);

// ---------------------------------------------------------------------
// Runs (§6.2)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunListQuery {
    #[serde(rename = "workflowId")]
    pub workflow_id: Option<String>,
    pub status: Option<String>,
    pub trigger: Option<String>,
    pub pinned: Option<bool>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchRunRequest {
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummaryView {
    pub id: String,
    #[serde(rename = "workflowId")]
    pub workflow_id: Option<String>,
    pub status: String,
    pub trigger: String,
    pub pinned: bool,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<String>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunListResponse {
    pub runs: Vec<RunSummaryView>,
    #[serde(rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Per-node derived status shown alongside a run's raw event log and used
/// standalone by `GET /runs/active` for UI restore.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeResultView {
    pub status: NodeStatus,
    pub output: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunDetailResponse {
    pub run: RunSummaryView,
    #[serde(rename = "outputData")]
    pub output_data: Option<Value>,
    pub events: Vec<RunEventView>,
    #[serde(rename = "nodeResults")]
    pub node_results: HashMap<String, NodeResultView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEventView {
    pub id: i64,
    #[serde(rename = "nodeId")]
    pub node_id: Option<String>,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "retryCount")]
    pub retry_count: Option<i64>,
    pub payload: Value,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ActiveRunQuery {
    #[serde(rename = "workflowId")]
    pub workflow_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRunResponse {
    pub run: Option<RunSummaryView>,
    #[serde(rename = "nodeResults")]
    pub node_results: HashMap<String, NodeResultView>,
}

// ---------------------------------------------------------------------
// Flows / version store (§6.2)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RollbackRequest {
    #[serde(rename = "versionId")]
    pub version_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreRequest {
    #[serde(rename = "versionId")]
    pub version_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionView {
    pub id: String,
    #[serde(rename = "workflowId")]
    pub workflow_id: String,
    #[serde(rename = "versionNumber")]
    pub version_number: i64,
    pub graph: Value,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowView {
    pub id: String,
    pub name: String,
    #[serde(rename = "draftGraph")]
    pub draft_graph: Value,
    #[serde(rename = "activeVersionId")]
    pub active_version_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub enabled: bool,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    #[serde(rename = "inputData", default)]
    pub input_data: Value,
    #[serde(rename = "overlapMode")]
    pub overlap_mode: String,
}

// ---------------------------------------------------------------------
// Workers (§6.2 GET /workers)
// ---------------------------------------------------------------------

pub use crate::workers::WorkerRegistryView;
