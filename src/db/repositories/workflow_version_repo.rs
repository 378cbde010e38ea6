//! Workflow version repository (§4.11 Version Store).

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::WorkflowVersionRow;

pub struct WorkflowVersionRepository;

impl WorkflowVersionRepository {
    /// Creates the next monotonic version for `workflow_id`. Callers are
    /// responsible for serializing this per workflow (e.g. the version
    /// number is computed and inserted within the same transaction) to
    /// avoid a race on `version_number`.
    pub async fn create_next(
        pool: &DatabasePool,
        id: &str,
        workflow_id: &str,
        graph: &str,
    ) -> Result<WorkflowVersionRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, WorkflowVersionRow>(
            "INSERT INTO workflow_versions (id, workflow_id, version_number, graph, created_at)
             VALUES (?, ?, COALESCE(
                 (SELECT MAX(version_number) FROM workflow_versions WHERE workflow_id = ?), 0
             ) + 1, ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(workflow_id)
        .bind(workflow_id)
        .bind(graph)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(
        pool: &DatabasePool,
        id: &str,
    ) -> Result<Option<WorkflowVersionRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowVersionRow>("SELECT * FROM workflow_versions WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_workflow(
        pool: &DatabasePool,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowVersionRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowVersionRow>(
            "SELECT * FROM workflow_versions WHERE workflow_id = ? ORDER BY version_number DESC",
        )
        .bind(workflow_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::WorkflowRepository;

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
    async fn version_numbers_are_monotonic() {
        let pool = setup_db().await;
        WorkflowRepository::create(&pool, "wf-1", "Test", "{}")
            .await
            .unwrap();

        let v1 = WorkflowVersionRepository::create_next(&pool, "v-1", "wf-1", "{\"nodes\":[]}")
            .await
            .unwrap();
        let v2 = WorkflowVersionRepository::create_next(&pool, "v-2", "wf-1", "{\"nodes\":[]}")
            .await
            .unwrap();
        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let pool = setup_db().await;
        WorkflowRepository::create(&pool, "wf-1", "Test", "{}")
            .await
            .unwrap();
        WorkflowVersionRepository::create_next(&pool, "v-1", "wf-1", "{}")
            .await
            .unwrap();
        WorkflowVersionRepository::create_next(&pool, "v-2", "wf-1", "{}")
            .await
            .unwrap();
        let versions = WorkflowVersionRepository::list_for_workflow(&pool, "wf-1")
            .await
            .unwrap();
        assert_eq!(versions[0].id, "v-2");
        assert_eq!(versions[1].id, "v-1");
    }
}
