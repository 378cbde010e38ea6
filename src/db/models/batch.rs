//! Map-node batch control state (§3 "BatchOperation + BatchResult",
//! §4.7 Map dispatch).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::model::BatchStatus;

/// Counters and configuration for one `map` node's parallel dispatch.
/// Invariants enforced by the coordinator, not the row itself:
/// `completed_count + failed_count <= total_items`,
/// `active_count <= concurrency_limit`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchOperationRow {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub total_items: i64,
    pub concurrency_limit: i64,
    pub fail_fast: bool,
    pub child_graph: String,
    pub child_depth: i64,
    pub items_json: String,
    pub current_index: i64,
    pub active_count: i64,
    pub peak_active_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl BatchOperationRow {
    pub fn status(&self) -> crate::Result<BatchStatus> {
        self.status.parse()
    }

    pub fn is_drained(&self) -> bool {
        self.completed_count + self.failed_count >= self.total_items
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count < self.concurrency_limit && self.current_index < self.total_items
    }
}

/// Append-only, keyed `(batch_id, item_index)`: exactly one row per item.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchResultRow {
    pub batch_id: String,
    pub item_index: i64,
    pub child_run_id: Option<String>,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: String,
}
