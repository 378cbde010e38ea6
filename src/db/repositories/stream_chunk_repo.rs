//! Stream chunk repository (§3 "Stream chunk", §4.10 C10).
//!
//! Append-only, keyed by `(run_id, node_id, chunk_index)` — the composite
//! primary key gives idempotent replay of a duplicate publish for free.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::StreamChunkRow;

pub struct StreamChunkRepository;

impl StreamChunkRepository {
    pub async fn append(
        pool: &DatabasePool,
        run_id: &str,
        node_id: &str,
        chunk_index: i64,
        chunk_type: &str,
        content: &str,
    ) -> Result<StreamChunkRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, StreamChunkRow>(
            "INSERT INTO stream_chunks (run_id, node_id, chunk_index, chunk_type, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(run_id)
        .bind(node_id)
        .bind(chunk_index)
        .bind(chunk_type)
        .bind(content)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn list_for_run(
        pool: &DatabasePool,
        run_id: &str,
    ) -> Result<Vec<StreamChunkRow>, sqlx::Error> {
        sqlx::query_as::<_, StreamChunkRow>(
            "SELECT * FROM stream_chunks WHERE run_id = ? ORDER BY node_id ASC, chunk_index ASC",
        )
        .bind(run_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_for_node(
        pool: &DatabasePool,
        run_id: &str,
        node_id: &str,
    ) -> Result<Vec<StreamChunkRow>, sqlx::Error> {
        sqlx::query_as::<_, StreamChunkRow>(
            "SELECT * FROM stream_chunks WHERE run_id = ? AND node_id = ? ORDER BY chunk_index ASC",
        )
        .bind(run_id)
        .bind(node_id)
        .fetch_all(pool)
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
    async fn append_and_list_ordered() {
        let pool = setup_db().await;
        StreamChunkRepository::append(&pool, "run-1", "A", 1, "token", "hel").await.unwrap();
        StreamChunkRepository::append(&pool, "run-1", "A", 0, "token", "lo").await.unwrap();

        let chunks = StreamChunkRepository::list_for_node(&pool, "run-1", "A").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[tokio::test]
    async fn duplicate_index_rejected() {
        let pool = setup_db().await;
        StreamChunkRepository::append(&pool, "run-1", "A", 0, "data", "x").await.unwrap();
        let dup = StreamChunkRepository::append(&pool, "run-1", "A", 0, "data", "y").await;
        assert!(dup.is_err());
    }
}
