//! Scheduled job repository (§3 "ScheduledJob", §4.8, C14/C15 sweeper).

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::ScheduledJobRow;

pub struct ScheduledJobRepository;

impl ScheduledJobRepository {
    pub async fn create(
        pool: &DatabasePool,
        id: &str,
        run_id: &str,
        node_id: &str,
        scheduled_for: &str,
        payload: &str,
    ) -> Result<ScheduledJobRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, ScheduledJobRow>(
            "INSERT INTO scheduled_jobs (id, run_id, node_id, scheduled_for, payload, dispatched, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(run_id)
        .bind(node_id)
        .bind(scheduled_for)
        .bind(payload)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    /// The sweeper's mover query: every due, undispatched job.
    pub async fn list_due(
        pool: &DatabasePool,
        now: &str,
    ) -> Result<Vec<ScheduledJobRow>, sqlx::Error> {
        sqlx::query_as::<_, ScheduledJobRow>(
            "SELECT * FROM scheduled_jobs WHERE dispatched = 0 AND scheduled_for <= ? ORDER BY scheduled_for ASC",
        )
        .bind(now)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_dispatched(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE scheduled_jobs SET dispatched = 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
