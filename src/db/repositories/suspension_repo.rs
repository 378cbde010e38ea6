//! Suspension repository (§4.8 Suspension Manager).

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::SuspensionRow;

pub struct SuspensionRepository;

impl SuspensionRepository {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &DatabasePool,
        id: &str,
        run_id: &str,
        node_id: &str,
        suspension_type: &str,
        resume_token: Option<&str>,
        resume_after: Option<&str>,
        execution_context: &str,
        expires_at: Option<&str>,
    ) -> Result<SuspensionRow, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, SuspensionRow>(
            "INSERT INTO suspensions
                (id, run_id, node_id, suspension_type, resume_token, resume_after,
                 execution_context, expires_at, resolved, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(run_id)
        .bind(node_id)
        .bind(suspension_type)
        .bind(resume_token)
        .bind(resume_after)
        .bind(execution_context)
        .bind(expires_at)
        .bind(&now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_token(
        pool: &DatabasePool,
        token: &str,
    ) -> Result<Option<SuspensionRow>, sqlx::Error> {
        sqlx::query_as::<_, SuspensionRow>("SELECT * FROM suspensions WHERE resume_token = ?")
            .bind(token)
            .fetch_optional(pool)
            .await
    }

    /// The one open suspension for a `(run_id, node_id, type)` triple,
    /// per the "at most one unresolved" invariant (§3).
    pub async fn find_open(
        pool: &DatabasePool,
        run_id: &str,
        node_id: &str,
        suspension_type: &str,
    ) -> Result<Option<SuspensionRow>, sqlx::Error> {
        sqlx::query_as::<_, SuspensionRow>(
            "SELECT * FROM suspensions
             WHERE run_id = ? AND node_id = ? AND suspension_type = ? AND resolved = 0",
        )
        .bind(run_id)
        .bind(node_id)
        .bind(suspension_type)
        .fetch_optional(pool)
        .await
    }

    pub async fn resolve(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE suspensions SET resolved = 1, resolved_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn update_execution_context(
        pool: &DatabasePool,
        id: &str,
        execution_context: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE suspensions SET execution_context = ? WHERE id = ?")
            .bind(execution_context)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Sweeper query (§4.13, §5 Timeouts): open suspensions whose
    /// `expires_at` has passed.
    pub async fn list_expired(
        pool: &DatabasePool,
        now: &str,
    ) -> Result<Vec<SuspensionRow>, sqlx::Error> {
        sqlx::query_as::<_, SuspensionRow>(
            "SELECT * FROM suspensions WHERE resolved = 0 AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now)
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
    async fn create_find_resolve() {
        let pool = setup_db().await;
        SuspensionRepository::create(
            &pool, "susp-1", "run-1", "W", "webhook", Some("tok-abc"), None, "{}", Some("2100-01-01T00:00:00Z"),
        )
        .await
        .unwrap();

        let found = SuspensionRepository::find_by_token(&pool, "tok-abc").await.unwrap().unwrap();
        assert!(!found.resolved);

        SuspensionRepository::resolve(&pool, "susp-1").await.unwrap();
        let open = SuspensionRepository::find_open(&pool, "run-1", "W", "webhook").await.unwrap();
        assert!(open.is_none());
    }

    #[tokio::test]
    async fn only_one_unresolved_per_triple() {
        let pool = setup_db().await;
        SuspensionRepository::create(
            &pool, "susp-1", "run-1", "W", "webhook", Some("tok-1"), None, "{}", None,
        )
        .await
        .unwrap();
        let dup = SuspensionRepository::create(
            &pool, "susp-2", "run-1", "W", "webhook", Some("tok-2"), None, "{}", None,
        )
        .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn expired_listing() {
        let pool = setup_db().await;
        SuspensionRepository::create(
            &pool, "susp-1", "run-1", "W", "webhook", Some("tok-1"), None, "{}", Some("2000-01-01T00:00:00Z"),
        )
        .await
        .unwrap();
        let expired = SuspensionRepository::list_expired(&pool, "2020-01-01T00:00:00Z")
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
    }
}
