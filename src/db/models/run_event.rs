//! Run event row model (§3 "RunEvent", §4.3 Event Log).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::model::EventType;

/// One append-only event in a run's log. `(run_id, node_id, retry_count,
/// event_type)` is the idempotency key for node-attempt events; the
/// underlying table enforces this with a partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunEventRow {
    pub id: i64,
    pub run_id: String,
    pub node_id: Option<String>,
    pub event_type: String,
    pub retry_count: Option<i64>,
    pub payload: String,
    pub created_at: String,
}

impl RunEventRow {
    pub fn event_type(&self) -> crate::Result<EventType> {
        self.event_type.parse()
    }
}
