//! Workflow row model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A workflow's identity, mutable draft graph, and pointer to its
/// active published version (§3 "Workflow").
///
/// # Timestamps
/// All timestamp fields are ISO8601 strings due to SQLite type limitations.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: String,
    pub name: String,
    pub draft_graph: String,
    pub active_version_id: Option<String>,
    pub webhook_enabled: bool,
    pub webhook_secret: Option<String>,
    pub schedule_enabled: bool,
    pub schedule_cron: Option<String>,
    pub schedule_timezone: Option<String>,
    pub schedule_input_data: String,
    pub schedule_overlap_mode: String,
    pub share_generation: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkflowRow {
    pub fn has_active_version(&self) -> bool {
        self.active_version_id.is_some()
    }

    pub fn can_trigger_webhook(&self) -> bool {
        self.webhook_enabled && self.has_active_version()
    }
}
