//! Batch (map-node) repository (§4.7 Map dispatch, §5 per-batch
//! serialization).
//!
//! `claim_next_index` and `record_result` use conditional `UPDATE ...
//! WHERE` statements with `RETURNING` so the counter mutation and its
//! invariant check happen atomically inside SQLite's single-writer
//! transaction, matching the "row lock" serialization the spec asks for.

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::{BatchOperationRow, BatchResultRow};

pub struct BatchRepository;

impl BatchRepository {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &DatabasePool,
        id: &str,
        run_id: &str,
        node_id: &str,
        total_items: i64,
        concurrency_limit: i64,
        fail_fast: bool,
        child_graph: &str,
        child_depth: i64,
        items_json: &str,
    ) -> Result<BatchOperationRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, BatchOperationRow>(
            "INSERT INTO batch_operations
                (id, run_id, node_id, total_items, concurrency_limit, fail_fast, child_graph,
                 child_depth, items_json, current_index, active_count, peak_active_count,
                 completed_count, failed_count, status, started_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 0, 0, 0, 'active', ?)
             RETURNING *",
        )
        .bind(id)
        .bind(run_id)
        .bind(node_id)
        .bind(total_items)
        .bind(concurrency_limit)
        .bind(fail_fast)
        .bind(child_graph)
        .bind(child_depth)
        .bind(items_json)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<BatchOperationRow>, sqlx::Error> {
        sqlx::query_as::<_, BatchOperationRow>("SELECT * FROM batch_operations WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Atomically claims the next item index for dispatch: bumps
    /// `current_index` and `active_count` together only while capacity
    /// remains, returning the claimed index or `None` if another writer
    /// already exhausted it.
    pub async fn claim_next_index(
        pool: &DatabasePool,
        batch_id: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE batch_operations
             SET current_index = current_index + 1,
                 active_count = active_count + 1,
                 peak_active_count = MAX(peak_active_count, active_count + 1)
             WHERE id = ? AND active_count < concurrency_limit AND current_index < total_items
             RETURNING current_index - 1",
        )
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(idx,)| idx))
    }

    /// Records one `MapChildComplete` outcome: inserts the idempotent
    /// `BatchResult` row, then folds the counters (§4.7).
    pub async fn record_result(
        pool: &DatabasePool,
        batch_id: &str,
        item_index: i64,
        child_run_id: Option<&str>,
        success: bool,
        output: Option<&str>,
        error: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO batch_results
                (batch_id, item_index, child_run_id, success, output, error, duration_ms, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(item_index)
        .bind(child_run_id)
        .bind(success)
        .bind(output)
        .bind(error)
        .bind(duration_ms)
        .bind(&now)
        .execute(pool)
        .await?;

        if success {
            sqlx::query(
                "UPDATE batch_operations SET active_count = active_count - 1, completed_count = completed_count + 1 WHERE id = ?",
            )
        } else {
            sqlx::query(
                "UPDATE batch_operations SET active_count = active_count - 1, failed_count = failed_count + 1 WHERE id = ?",
            )
        }
        .bind(batch_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_finished(pool: &DatabasePool, id: &str, status: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE batch_operations SET status = ?, finished_at = ? WHERE id = ?")
            .bind(status)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn list_results_ordered(
        pool: &DatabasePool,
        batch_id: &str,
    ) -> Result<Vec<BatchResultRow>, sqlx::Error> {
        sqlx::query_as::<_, BatchResultRow>(
            "SELECT * FROM batch_results WHERE batch_id = ? ORDER BY item_index ASC",
        )
        .bind(batch_id)
        .fetch_all(pool)
        .await
    }
}
