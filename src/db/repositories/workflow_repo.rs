//! Workflow repository.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::WorkflowRow;

pub struct WorkflowRepository;

impl WorkflowRepository {
    pub async fn create(
        pool: &DatabasePool,
        id: &str,
        name: &str,
        draft_graph: &str,
    ) -> Result<WorkflowRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, WorkflowRow>(
            "INSERT INTO workflows
                (id, name, draft_graph, schedule_input_data, schedule_overlap_mode, created_at, updated_at)
             VALUES (?, ?, ?, '{}', 'skip', ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(name)
        .bind(draft_graph)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<WorkflowRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn update_draft_graph(
        pool: &DatabasePool,
        id: &str,
        draft_graph: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE workflows SET draft_graph = ?, updated_at = ? WHERE id = ?")
            .bind(draft_graph)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// §4.11 Publish: point `active_version_id` at a freshly created version.
    pub async fn set_active_version(
        pool: &DatabasePool,
        id: &str,
        version_id: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE workflows SET active_version_id = ?, updated_at = ? WHERE id = ?")
            .bind(version_id)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_webhook_settings(
        pool: &DatabasePool,
        id: &str,
        enabled: bool,
        secret: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE workflows SET webhook_enabled = ?, webhook_secret = ?, updated_at = ? WHERE id = ?",
        )
        .bind(enabled)
        .bind(secret)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// §6.2 `POST /flows/{id}/schedule`.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_schedule(
        pool: &DatabasePool,
        id: &str,
        enabled: bool,
        cron: Option<&str>,
        timezone: Option<&str>,
        input_data: &str,
        overlap_mode: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE workflows
             SET schedule_enabled = ?, schedule_cron = ?, schedule_timezone = ?,
                 schedule_input_data = ?, schedule_overlap_mode = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(enabled)
        .bind(cron)
        .bind(timezone)
        .bind(input_data)
        .bind(overlap_mode)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_with_schedule_enabled(
        pool: &DatabasePool,
    ) -> Result<Vec<WorkflowRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE schedule_enabled = 1")
            .fetch_all(pool)
            .await
    }

    pub async fn bump_share_generation(pool: &DatabasePool, id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query("UPDATE workflows SET share_generation = share_generation + 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        let row: (i64,) = sqlx::query_as("SELECT share_generation FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> DatabasePool {
        let pool = sqlx::sqlite::SqlitePool::connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(include_str!("../../../migrations/0001_init.sql"))
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn create_then_fetch() {
        let pool = setup_db().await;
        let wf = WorkflowRepository::create(&pool, "wf-1", "Test", "{}")
            .await
            .unwrap();
        assert_eq!(wf.id, "wf-1");
        assert!(!wf.webhook_enabled);

        let fetched = WorkflowRepository::get_by_id(&pool, "wf-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.name, "Test");
    }

    #[tokio::test]
    async fn webhook_requires_active_version_until_published() {
        let pool = setup_db().await;
        WorkflowRepository::create(&pool, "wf-1", "Test", "{}")
            .await
            .unwrap();
        WorkflowRepository::set_webhook_settings(&pool, "wf-1", true, Some("shh"))
            .await
            .unwrap();
        let wf = WorkflowRepository::get_by_id(&pool, "wf-1")
            .await
            .unwrap()
            .unwrap();
        assert!(!wf.can_trigger_webhook());

        WorkflowRepository::set_active_version(&pool, "wf-1", "v-1")
            .await
            .unwrap();
        let wf = WorkflowRepository::get_by_id(&pool, "wf-1")
            .await
            .unwrap()
            .unwrap();
        assert!(wf.can_trigger_webhook());
    }

    #[tokio::test]
    async fn share_generation_bumps_monotonically() {
        let pool = setup_db().await;
        WorkflowRepository::create(&pool, "wf-1", "Test", "{}")
            .await
            .unwrap();
        let g1 = WorkflowRepository::bump_share_generation(&pool, "wf-1")
            .await
            .unwrap();
        let g2 = WorkflowRepository::bump_share_generation(&pool, "wf-1")
            .await
            .unwrap();
        assert_eq!(g2, g1 + 1);
    }
}
