//! Workflow run repository (§4.4 Run Lifecycle Manager).

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::WorkflowRunRow;

pub struct WorkflowRunRepository;

impl WorkflowRunRepository {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &DatabasePool,
        id: &str,
        workflow_id: Option<&str>,
        workflow_version_id: Option<&str>,
        snapshot_graph: &str,
        trigger: &str,
        input_data: &str,
        parent_run_id: Option<&str>,
        parent_node_id: Option<&str>,
        depth: i64,
    ) -> Result<WorkflowRunRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, WorkflowRunRow>(
            "INSERT INTO workflow_runs
                (id, workflow_id, workflow_version_id, snapshot_graph, status, trigger,
                 input_data, parent_run_id, parent_node_id, depth, pinned, created_at)
             VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, 0, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(workflow_id)
        .bind(workflow_version_id)
        .bind(snapshot_graph)
        .bind(trigger)
        .bind(input_data)
        .bind(parent_run_id)
        .bind(parent_node_id)
        .bind(depth)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<WorkflowRunRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRunRow>("SELECT * FROM workflow_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn mark_running(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE workflow_runs SET status = 'running', started_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_suspended(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE workflow_runs SET status = 'suspended' WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_terminal(
        pool: &DatabasePool,
        id: &str,
        status: &str,
        output_data: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE workflow_runs SET status = ?, output_data = ?, finished_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(output_data)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_pinned(pool: &DatabasePool, id: &str, pinned: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE workflow_runs SET pinned = ? WHERE id = ?")
            .bind(pinned)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM workflow_runs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// §6.2 `GET /runs/active?workflowId` — latest non-terminal run.
    pub async fn latest_active_for_workflow(
        pool: &DatabasePool,
        workflow_id: &str,
    ) -> Result<Option<WorkflowRunRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRunRow>(
            "SELECT * FROM workflow_runs
             WHERE workflow_id = ? AND status NOT IN ('completed', 'failed', 'cancelled')
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(workflow_id)
        .fetch_optional(pool)
        .await
    }

    /// §4.9 Cron overlap modes: any prior cron-triggered run still open.
    pub async fn has_open_cron_run(
        pool: &DatabasePool,
        workflow_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workflow_runs
             WHERE workflow_id = ? AND trigger = 'cron' AND status IN ('pending', 'running')",
        )
        .bind(workflow_id)
        .fetch_one(pool)
        .await?;
        Ok(row.0 > 0)
    }

    pub async fn count_queued_cron_runs(
        pool: &DatabasePool,
        workflow_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workflow_runs
             WHERE workflow_id = ? AND trigger = 'cron' AND status = 'pending'",
        )
        .bind(workflow_id)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn list_paged(
        pool: &DatabasePool,
        workflow_id: Option<&str>,
        status: Option<&str>,
        trigger: Option<&str>,
        pinned: Option<bool>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<WorkflowRunRow>, sqlx::Error> {
        // Built as a dynamic filter since every field in the query is
        // optional; bound parameters stay paired with `?` positionally.
        let mut sql = String::from("SELECT * FROM workflow_runs WHERE 1=1");
        if workflow_id.is_some() {
            sql.push_str(" AND workflow_id = ?");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if trigger.is_some() {
            sql.push_str(" AND trigger = ?");
        }
        if pinned.is_some() {
            sql.push_str(" AND pinned = ?");
        }
        if cursor.is_some() {
            sql.push_str(" AND id < ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, WorkflowRunRow>(&sql);
        if let Some(v) = workflow_id {
            query = query.bind(v);
        }
        if let Some(v) = status {
            query = query.bind(v);
        }
        if let Some(v) = trigger {
            query = query.bind(v);
        }
        if let Some(v) = pinned {
            query = query.bind(v);
        }
        if let Some(v) = cursor {
            query = query.bind(v);
        }
        query.bind(limit).fetch_all(pool).await
    }

    /// Children dispatched as map items of `batch_id`, in index order;
    /// matched via `input_data` containing `"batchId":"<batch_id>"`.
    pub async fn list_children(
        pool: &DatabasePool,
        parent_run_id: &str,
    ) -> Result<Vec<WorkflowRunRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRunRow>(
            "SELECT * FROM workflow_runs WHERE parent_run_id = ? ORDER BY created_at ASC",
        )
        .bind(parent_run_id)
        .fetch_all(pool)
        .await
    }

    /// C14 retention sweeper: unpinned terminal runs that finished before
    /// `cutoff` (§3 "Ownership & lifecycle" — "pinned runs are exempt from
    /// TTL cleanup").
    pub async fn list_terminal_before(
        pool: &DatabasePool,
        cutoff: &str,
    ) -> Result<Vec<WorkflowRunRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRunRow>(
            "SELECT * FROM workflow_runs
             WHERE pinned = 0
               AND status IN ('completed', 'failed', 'cancelled')
               AND finished_at IS NOT NULL
               AND finished_at <= ?
             ORDER BY finished_at ASC",
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
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
    async fn create_starts_pending() {
        let pool = setup_db().await;
        let run = WorkflowRunRepository::create(
            &pool, "run-1", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0,
        )
        .await
        .unwrap();
        assert_eq!(run.status, "pending");
        assert_eq!(run.depth, 0);
    }

    #[tokio::test]
    async fn mark_running_then_terminal() {
        let pool = setup_db().await;
        WorkflowRunRepository::create(
            &pool, "run-1", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0,
        )
        .await
        .unwrap();
        WorkflowRunRepository::mark_running(&pool, "run-1").await.unwrap();
        let run = WorkflowRunRepository::get_by_id(&pool, "run-1").await.unwrap().unwrap();
        assert_eq!(run.status, "running");
        assert!(run.started_at.is_some());

        WorkflowRunRepository::mark_terminal(&pool, "run-1", "completed", Some("{\"x\":1}"))
            .await
            .unwrap();
        let run = WorkflowRunRepository::get_by_id(&pool, "run-1").await.unwrap().unwrap();
        assert!(run.is_terminal());
        assert_eq!(run.output_data.unwrap(), "{\"x\":1}");
    }

    #[tokio::test]
    async fn latest_active_excludes_terminal_runs() {
        let pool = setup_db().await;
        WorkflowRunRepository::create(
            &pool, "run-1", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0,
        )
        .await
        .unwrap();
        WorkflowRunRepository::mark_terminal(&pool, "run-1", "completed", None)
            .await
            .unwrap();
        assert!(
            WorkflowRunRepository::latest_active_for_workflow(&pool, "wf-1")
                .await
                .unwrap()
                .is_none()
        );

        WorkflowRunRepository::create(
            &pool, "run-2", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0,
        )
        .await
        .unwrap();
        let active = WorkflowRunRepository::latest_active_for_workflow(&pool, "wf-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, "run-2");
    }

    #[tokio::test]
    async fn cron_overlap_detection() {
        let pool = setup_db().await;
        assert!(!WorkflowRunRepository::has_open_cron_run(&pool, "wf-1").await.unwrap());
        WorkflowRunRepository::create(
            &pool, "run-1", Some("wf-1"), None, "{}", "cron", "{}", None, None, 0,
        )
        .await
        .unwrap();
        assert!(WorkflowRunRepository::has_open_cron_run(&pool, "wf-1").await.unwrap());
    }

    #[tokio::test]
    async fn list_paged_filters_by_status() {
        let pool = setup_db().await;
        WorkflowRunRepository::create(
            &pool, "run-1", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0,
        )
        .await
        .unwrap();
        WorkflowRunRepository::create(
            &pool, "run-2", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0,
        )
        .await
        .unwrap();
        WorkflowRunRepository::mark_running(&pool, "run-2").await.unwrap();

        let running = WorkflowRunRepository::list_paged(
            &pool, Some("wf-1"), Some("running"), None, None, None, 10,
        )
        .await
        .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "run-2");
    }

    #[tokio::test]
    async fn retention_sweep_skips_pinned_and_unfinished_runs() {
        let pool = setup_db().await;
        WorkflowRunRepository::create(&pool, "run-old", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0)
            .await
            .unwrap();
        WorkflowRunRepository::mark_terminal(&pool, "run-old", "completed", None).await.unwrap();

        WorkflowRunRepository::create(&pool, "run-pinned", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0)
            .await
            .unwrap();
        WorkflowRunRepository::mark_terminal(&pool, "run-pinned", "completed", None).await.unwrap();
        WorkflowRunRepository::set_pinned(&pool, "run-pinned", true).await.unwrap();

        WorkflowRunRepository::create(&pool, "run-active", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0)
            .await
            .unwrap();

        let cutoff = "2999-01-01T00:00:00Z";
        let due = WorkflowRunRepository::list_terminal_before(&pool, cutoff).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["run-old"]);
    }
}
