//! Secrets cache (§3 "Secret", §4.11 "Secrets cache", §9 design note:
//! "single-writer guarded structure with atomic snapshot-replace on
//! invalidation; readers never lock").
//!
//! Backed by the `secrets` table (key/value, §3) with a 60s-TTL
//! in-process snapshot. Writers call [`SecretStore::set`]/[`unset`],
//! which persist then atomically swap the cached `Arc<HashMap>` so
//! concurrent readers never block on a writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::connection::DatabasePool;
use crate::Result;

const CACHE_TTL_SECS: i64 = 60;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Process-local secrets cache with a 60s TTL, invalidated immediately
/// on any mutation (§4.11).
pub struct SecretStore {
    pool: DatabasePool,
    cache: RwLock<Arc<HashMap<String, String>>>,
    cached_at: AtomicI64,
}

impl SecretStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(Arc::new(HashMap::new())),
            cached_at: AtomicI64::new(0),
        }
    }

    fn snapshot(&self) -> Arc<HashMap<String, String>> {
        self.cache.read().expect("secrets cache poisoned").clone()
    }

    fn is_fresh(&self) -> bool {
        now_secs() - self.cached_at.load(Ordering::Acquire) < CACHE_TTL_SECS
    }

    async fn reload(&self) -> Result<Arc<HashMap<String, String>>> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM secrets")
            .fetch_all(&self.pool)
            .await?;
        let map: HashMap<String, String> = rows.into_iter().collect();
        let snapshot = Arc::new(map);
        *self.cache.write().expect("secrets cache poisoned") = snapshot.clone();
        self.cached_at.store(now_secs(), Ordering::Release);
        Ok(snapshot)
    }

    /// Full snapshot used by the interpolator; refreshes on TTL expiry.
    pub async fn all(&self) -> Result<Arc<HashMap<String, String>>> {
        if self.is_fresh() {
            return Ok(self.snapshot());
        }
        self.reload().await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.all().await?.get(key).cloned())
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO secrets (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        self.invalidate();
        Ok(())
    }

    pub async fn unset(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM secrets WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        self.invalidate();
        Ok(())
    }

    /// Force the next read to reload from the database.
    pub fn invalidate(&self) {
        self.cached_at.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SecretStore {
        let pool = sqlx::sqlite::SqlitePool::connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE secrets (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        SecretStore::new(pool)
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = setup().await;
        store.set("API_KEY", "shh").await.unwrap();
        assert_eq!(store.get("API_KEY").await.unwrap(), Some("shh".to_string()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = setup().await;
        assert_eq!(store.get("NOPE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mutation_invalidates_cache_immediately() {
        let store = setup().await;
        store.set("K", "v1").await.unwrap();
        let _ = store.all().await.unwrap();
        store.set("K", "v2").await.unwrap();
        assert_eq!(store.get("K").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn unset_removes_key() {
        let store = setup().await;
        store.set("K", "v1").await.unwrap();
        store.unset("K").await.unwrap();
        assert_eq!(store.get("K").await.unwrap(), None);
    }
}
