//! Webhook delivery row model (§3 "WebhookDelivery", §4.9 Trigger Intake).
//!
//! Keyed `(workflow_id, idempotency_key)` so a duplicate delivery
//! replays the exact stored response instead of re-triggering a run.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookDeliveryRow {
    pub workflow_id: String,
    pub idempotency_key: String,
    pub run_id: Option<String>,
    pub response_status: i64,
    pub response_body: String,
    pub created_at: String,
}
