//! Workflow run row model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::model::RunStatus;

/// A single execution of a graph (§3 "WorkflowRun"). `snapshot_graph` is
/// an immutable copy of the graph taken at creation time, so the run's
/// behavior never changes even if the parent workflow's draft or
/// versions are later edited.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunRow {
    pub id: String,
    pub workflow_id: Option<String>,
    pub workflow_version_id: Option<String>,
    pub snapshot_graph: String,
    pub status: String,
    pub trigger: String,
    pub input_data: String,
    pub output_data: Option<String>,
    pub parent_run_id: Option<String>,
    pub parent_node_id: Option<String>,
    pub depth: i64,
    pub pinned: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl WorkflowRunRow {
    pub fn status(&self) -> crate::Result<RunStatus> {
        self.status.parse()
    }

    pub fn is_terminal(&self) -> bool {
        self.status()
            .map(|s| s.is_terminal())
            .unwrap_or(false)
    }

    /// `true` when this run was dispatched as one item of a map batch
    /// (§4.5 "Sub-flow completion hook").
    pub fn is_map_child(&self) -> bool {
        self.trigger == "map"
    }

    pub fn is_subflow_child(&self) -> bool {
        self.trigger == "subflow"
    }
}
