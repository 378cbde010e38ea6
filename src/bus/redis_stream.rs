//! Redis-backed `Bus` implementation: Redis Streams (`XADD`/`XREAD`) for
//! `jobs`/`results`/`chunks`, plain keys for worker heartbeats, and a
//! `SET`+`GET` latch for `cancel:{run_id}` (a real pub/sub fires only
//! while a subscriber is connected; this crate's orchestrator polls
//! instead, so a latch that survives until the run is cleaned up is the
//! right shape here).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{decode, encode, Bus, BusError, BusResult, StreamEntry};
use crate::model::{NodeResultMessage, StreamChunk, WorkItem, WorkerHeartbeat};

const JOBS_STREAM: &str = "jobs";
const RESULTS_STREAM: &str = "results";
const CHUNKS_STREAM: &str = "chunks";
const HEARTBEAT_PREFIX: &str = "workers:";
const HEARTBEAT_TTL_SECS: u64 = 120;

#[derive(Clone)]
pub struct RedisBus {
    conn: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> BusResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn xadd<T: serde::Serialize>(&self, stream: &str, payload: &T) -> BusResult<()> {
        let body = encode(payload)?;
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(stream, "*", &[("payload", body)])
            .await
            .map_err(|e| BusError::Write(e.to_string()))?;
        Ok(())
    }

    async fn xread<T: serde::de::DeserializeOwned>(
        &self,
        stream: &str,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<T>>> {
        let mut conn = self.conn.clone();
        let start = if last_id.is_empty() { "$" } else { last_id };
        let opts = redis::streams::StreamReadOptions::default()
            .count(256)
            .block(block_ms as usize);
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[stream], &[start], &opts)
            .await
            .map_err(|e| BusError::Read(e.to_string()))?;

        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let raw: String = entry
                    .map
                    .get("payload")
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                    .ok_or_else(|| BusError::Read("missing payload field".to_string()))?;
                out.push(StreamEntry {
                    id: entry.id,
                    payload: decode(&raw)?,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn enqueue_job(&self, item: &WorkItem) -> BusResult<()> {
        self.xadd(JOBS_STREAM, item).await
    }

    async fn read_jobs(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<WorkItem>>> {
        self.xread(JOBS_STREAM, last_id, block_ms).await
    }

    async fn publish_result(&self, result: &NodeResultMessage) -> BusResult<()> {
        self.xadd(RESULTS_STREAM, result).await
    }

    async fn read_results(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<NodeResultMessage>>> {
        self.xread(RESULTS_STREAM, last_id, block_ms).await
    }

    async fn publish_chunk(&self, chunk: &StreamChunk) -> BusResult<()> {
        self.xadd(CHUNKS_STREAM, chunk).await
    }

    async fn read_chunks(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<StreamChunk>>> {
        self.xread(CHUNKS_STREAM, last_id, block_ms).await
    }

    async fn publish_cancel(&self, run_id: &str) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("cancel:{run_id}");
        let _: () = conn
            .set_ex(key, "cancel", 3600)
            .await
            .map_err(|e| BusError::Write(e.to_string()))?;
        Ok(())
    }

    async fn was_cancelled(&self, run_id: &str) -> BusResult<bool> {
        let mut conn = self.conn.clone();
        let key = format!("cancel:{run_id}");
        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| BusError::Read(e.to_string()))?;
        Ok(exists)
    }

    async fn put_worker_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("{HEARTBEAT_PREFIX}{}", heartbeat.worker_id);
        let body = encode(heartbeat)?;
        let _: () = conn
            .set_ex(key, body, HEARTBEAT_TTL_SECS)
            .await
            .map_err(|e| BusError::Write(e.to_string()))?;
        Ok(())
    }

    async fn list_worker_heartbeats(&self) -> BusResult<Vec<WorkerHeartbeat>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{HEARTBEAT_PREFIX}*");
        let keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| BusError::Read(e.to_string()))?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| BusError::Read(e.to_string()))?;
            if let Some(raw) = raw {
                out.push(decode(&raw)?);
            }
        }
        Ok(out)
    }
}
