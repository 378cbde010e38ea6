//! Webhook delivery repository (§4.9 Trigger Intake idempotency).

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::WebhookDeliveryRow;

pub struct WebhookDeliveryRepository;

impl WebhookDeliveryRepository {
    pub async fn find(
        pool: &DatabasePool,
        workflow_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<WebhookDeliveryRow>, sqlx::Error> {
        sqlx::query_as::<_, WebhookDeliveryRow>(
            "SELECT * FROM webhook_deliveries WHERE workflow_id = ? AND idempotency_key = ?",
        )
        .bind(workflow_id)
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await
    }

    pub async fn store(
        pool: &DatabasePool,
        workflow_id: &str,
        idempotency_key: &str,
        run_id: Option<&str>,
        response_status: i64,
        response_body: &str,
    ) -> Result<WebhookDeliveryRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, WebhookDeliveryRow>(
            "INSERT INTO webhook_deliveries
                (workflow_id, idempotency_key, run_id, response_status, response_body, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(workflow_id)
        .bind(idempotency_key)
        .bind(run_id)
        .bind(response_status)
        .bind(response_body)
        .bind(&now)
        .fetch_one(pool)
        .await
    }
}
