//! Scheduled job row model (§3 "ScheduledJob").
//!
//! A future-dated work unit for delay/sleep dispatch. A sweeper process
//! promotes due jobs onto the bus (§4.8, §4.15 C14/C15).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledJobRow {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub scheduled_for: String,
    pub payload: String,
    pub dispatched: bool,
    pub created_at: String,
}

impl ScheduledJobRow {
    pub fn is_due(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        if self.dispatched {
            return false;
        }
        chrono::DateTime::parse_from_rfc3339(&self.scheduled_for)
            .map(|t| t.with_timezone(&chrono::Utc) <= now)
            .unwrap_or(false)
    }
}
