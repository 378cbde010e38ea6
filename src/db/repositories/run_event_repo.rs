//! Run event repository (§4.3 Event Log).
//!
//! Strict append-only. `insert` relies on the table's partial unique
//! index over `(run_id, node_id, retry_count, event_type)` to make
//! node-attempt events idempotent; a duplicate insert surfaces as a
//! constraint violation the caller can treat as "already applied".

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::RunEventRow;

pub struct RunEventRepository;

impl RunEventRepository {
    pub async fn append(
        pool: &DatabasePool,
        run_id: &str,
        node_id: Option<&str>,
        event_type: &str,
        retry_count: Option<i64>,
        payload: &str,
    ) -> Result<RunEventRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, RunEventRow>(
            "INSERT INTO run_events (run_id, node_id, event_type, retry_count, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(run_id)
        .bind(node_id)
        .bind(event_type)
        .bind(retry_count)
        .bind(payload)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn list_for_run(
        pool: &DatabasePool,
        run_id: &str,
    ) -> Result<Vec<RunEventRow>, sqlx::Error> {
        sqlx::query_as::<_, RunEventRow>(
            "SELECT * FROM run_events WHERE run_id = ? ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(pool)
        .await
    }

    /// Used by the Orchestrator to fold `NODE_COMPLETED` events into
    /// `node_outputs` (§4.5 step 3) and to check which event types a
    /// run already has (e.g. detect already-scheduled nodes, §4.5 step 5).
    pub async fn list_for_run_by_types(
        pool: &DatabasePool,
        run_id: &str,
        event_types: &[&str],
    ) -> Result<Vec<RunEventRow>, sqlx::Error> {
        let placeholders = event_types.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT * FROM run_events WHERE run_id = ? AND event_type IN ({placeholders}) ORDER BY id ASC"
        );
        let mut query = sqlx::query_as::<_, RunEventRow>(&sql).bind(run_id);
        for et in event_types {
            query = query.bind(*et);
        }
        query.fetch_all(pool).await
    }

    pub async fn find_attempt(
        pool: &DatabasePool,
        run_id: &str,
        node_id: &str,
        retry_count: i64,
        event_type: &str,
    ) -> Result<Option<RunEventRow>, sqlx::Error> {
        sqlx::query_as::<_, RunEventRow>(
            "SELECT * FROM run_events
             WHERE run_id = ? AND node_id = ? AND retry_count = ? AND event_type = ?",
        )
        .bind(run_id)
        .bind(node_id)
        .bind(retry_count)
        .bind(event_type)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::WorkflowRunRepository;

    async fn setup_db() -> DatabasePool {
        let pool = sqlx::sqlite::SqlitePool::connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(include_str!("../../../migrations/0001_init.sql"))
            .execute(&pool)
            .await
            .unwrap();
        WorkflowRunRepository::create(
            &pool, "run-1", Some("wf-1"), None, "{}", "manual", "{}", None, None, 0,
        )
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn append_and_list() {
        let pool = setup_db().await;
        RunEventRepository::append(&pool, "run-1", None, "RUN_CREATED", None, "{}")
            .await
            .unwrap();
        RunEventRepository::append(
            &pool, "run-1", Some("A"), "NODE_SCHEDULED", None, "{}",
        )
        .await
        .unwrap();

        let events = RunEventRepository::list_for_run(&pool, "run-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "RUN_CREATED");
    }

    #[tokio::test]
    async fn duplicate_node_attempt_is_rejected() {
        let pool = setup_db().await;
        RunEventRepository::append(&pool, "run-1", Some("A"), "NODE_COMPLETED", Some(0), "{}")
            .await
            .unwrap();
        let dup = RunEventRepository::append(&pool, "run-1", Some("A"), "NODE_COMPLETED", Some(0), "{}")
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn filter_by_event_type_set() {
        let pool = setup_db().await;
        RunEventRepository::append(&pool, "run-1", Some("A"), "NODE_SCHEDULED", None, "{}")
            .await
            .unwrap();
        RunEventRepository::append(&pool, "run-1", Some("A"), "NODE_COMPLETED", Some(0), "{}")
            .await
            .unwrap();
        RunEventRepository::append(&pool, "run-1", Some("B"), "NODE_STARTED", None, "{}")
            .await
            .unwrap();

        let completed = RunEventRepository::list_for_run_by_types(
            &pool, "run-1", &["NODE_COMPLETED", "NODE_FAILED"],
        )
        .await
        .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].node_id.as_deref(), Some("A"));
    }
}
