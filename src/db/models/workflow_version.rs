//! Workflow version row model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Immutable `(workflow_id, version_number)` graph snapshot (§3
/// "WorkflowVersion"). Never mutated or deleted while a run references it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowVersionRow {
    pub id: String,
    pub workflow_id: String,
    pub version_number: i64,
    pub graph: String,
    pub created_at: String,
}
