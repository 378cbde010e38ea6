//! Durable message-bus abstraction (§6.1).
//!
//! The control plane talks to workers and browsers over five logical
//! streams: `jobs`, `results`, `chunks`, `cancel:{run_id}` (pub/sub), and
//! `workers/{worker_id}` (a keyed heartbeat store). `Bus` is the trait
//! boundary; [`memory::InProcessBus`] backs tests, [`redis_stream::RedisBus`]
//! backs the deployment target (Redis Streams + pub/sub), mirroring how
//! `DatabaseConnection` wraps `SqlitePool` elsewhere in this crate.

pub mod memory;
pub mod redis_stream;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::model::{NodeResultMessage, StreamChunk, WorkItem, WorkerHeartbeat};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection error: {0}")]
    Connection(String),
    #[error("bus serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("bus read error: {0}")]
    Read(String),
    #[error("bus write error: {0}")]
    Write(String),
}

pub type BusResult<T> = std::result::Result<T, BusError>;

/// One entry read off a stream: an opaque cursor id plus the decoded
/// payload, so callers can acknowledge/advance without re-parsing.
#[derive(Debug, Clone)]
pub struct StreamEntry<T> {
    pub id: String,
    pub payload: T,
}

/// Abstraction over the bus streams named in §6.1. Blocking reads return
/// up to `block_ms` milliseconds of wait before yielding an empty batch
/// (natural backpressure point, §5).
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    async fn enqueue_job(&self, item: &WorkItem) -> BusResult<()>;
    async fn read_jobs(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<WorkItem>>>;

    async fn publish_result(&self, result: &NodeResultMessage) -> BusResult<()>;
    async fn read_results(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<NodeResultMessage>>>;

    async fn publish_chunk(&self, chunk: &StreamChunk) -> BusResult<()>;
    async fn read_chunks(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<StreamChunk>>>;

    /// Publish a cancellation signal on the `cancel:{run_id}` channel.
    async fn publish_cancel(&self, run_id: &str) -> BusResult<()>;

    /// Best-effort subscription check: has a cancel signal been seen for
    /// this run since the bus started watching it? Implementations may
    /// forget old signals; callers should treat a `false` as "not yet
    /// observed", not "guaranteed not cancelled".
    async fn was_cancelled(&self, run_id: &str) -> BusResult<bool>;

    async fn put_worker_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> BusResult<()>;
    async fn list_worker_heartbeats(&self) -> BusResult<Vec<WorkerHeartbeat>>;
}

pub(crate) fn encode<T: Serialize>(value: &T) -> BusResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> BusResult<T> {
    Ok(serde_json::from_str(raw)?)
}

pub use memory::InProcessBus;
pub use redis_stream::RedisBus;
