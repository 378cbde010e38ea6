//! In-process bus used by tests and by the `#[tokio::test]` integration
//! suite (§8 "corresponding test against ... the in-process `Bus`
//! implementation"). Backed by `tokio::sync::Mutex`-guarded `VecDeque`s
//! rather than actual channels, so readers can replay from an arbitrary
//! cursor the way Redis Streams' `XREAD` does with entry ids.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use super::{Bus, BusResult, StreamEntry};
use crate::model::{NodeResultMessage, StreamChunk, WorkItem, WorkerHeartbeat};

struct Stream<T> {
    entries: VecDeque<(u64, T)>,
}

impl<T> Default for Stream<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T: Clone> Stream<T> {
    fn after(&self, last_id: &str) -> Vec<StreamEntry<T>> {
        let cursor: u64 = if last_id == "$" || last_id.is_empty() {
            self.entries.back().map(|(id, _)| *id).unwrap_or(0)
        } else {
            last_id.parse().unwrap_or(0)
        };
        self.entries
            .iter()
            .filter(|(id, _)| *id > cursor)
            .map(|(id, payload)| StreamEntry {
                id: id.to_string(),
                payload: payload.clone(),
            })
            .collect()
    }
}

#[derive(Default)]
pub struct InProcessBus {
    next_id: AtomicU64,
    jobs: Mutex<Stream<WorkItem>>,
    results: Mutex<Stream<NodeResultMessage>>,
    chunks: Mutex<Stream<StreamChunk>>,
    cancelled: Mutex<HashSet<String>>,
    heartbeats: Mutex<HashMap<String, WorkerHeartbeat>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Test helper: pop the oldest job (simulates a worker claiming one).
    pub async fn take_next_job(&self) -> Option<WorkItem> {
        let mut jobs = self.jobs.lock().await;
        jobs.entries.pop_front().map(|(_, item)| item)
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.entries.len()
    }
}

#[async_trait]
impl Bus for InProcessBus {
    async fn enqueue_job(&self, item: &WorkItem) -> BusResult<()> {
        let id = self.next();
        self.jobs.lock().await.entries.push_back((id, item.clone()));
        Ok(())
    }

    async fn read_jobs(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<WorkItem>>> {
        let out = self.jobs.lock().await.after(last_id);
        if out.is_empty() && block_ms > 0 {
            sleep(Duration::from_millis(block_ms.min(50))).await;
        }
        Ok(out)
    }

    async fn publish_result(&self, result: &NodeResultMessage) -> BusResult<()> {
        let id = self.next();
        self.results
            .lock()
            .await
            .entries
            .push_back((id, result.clone()));
        Ok(())
    }

    async fn read_results(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<NodeResultMessage>>> {
        let out = self.results.lock().await.after(last_id);
        if out.is_empty() && block_ms > 0 {
            sleep(Duration::from_millis(block_ms.min(50))).await;
        }
        Ok(out)
    }

    async fn publish_chunk(&self, chunk: &StreamChunk) -> BusResult<()> {
        let id = self.next();
        self.chunks
            .lock()
            .await
            .entries
            .push_back((id, chunk.clone()));
        Ok(())
    }

    async fn read_chunks(
        &self,
        last_id: &str,
        block_ms: u64,
    ) -> BusResult<Vec<StreamEntry<StreamChunk>>> {
        let out = self.chunks.lock().await.after(last_id);
        if out.is_empty() && block_ms > 0 {
            sleep(Duration::from_millis(block_ms.min(50))).await;
        }
        Ok(out)
    }

    async fn publish_cancel(&self, run_id: &str) -> BusResult<()> {
        self.cancelled.lock().await.insert(run_id.to_string());
        Ok(())
    }

    async fn was_cancelled(&self, run_id: &str) -> BusResult<bool> {
        Ok(self.cancelled.lock().await.contains(run_id))
    }

    async fn put_worker_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> BusResult<()> {
        self.heartbeats
            .lock()
            .await
            .insert(heartbeat.worker_id.clone(), heartbeat.clone());
        Ok(())
    }

    async fn list_worker_heartbeats(&self) -> BusResult<Vec<WorkerHeartbeat>> {
        Ok(self.heartbeats.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BusJobType, WorkItemNode};

    fn job(id: &str) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            run_id: "run-1".to_string(),
            node: WorkItemNode {
                job_type: BusJobType::Delay,
                data: serde_json::json!({"duration_ms": 1}),
            },
            retry_count: 0,
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn enqueue_then_read_from_start() {
        let bus = InProcessBus::new();
        bus.enqueue_job(&job("A")).await.unwrap();
        bus.enqueue_job(&job("B")).await.unwrap();

        let entries = bus.read_jobs("0", 0).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload.id, "A");
    }

    #[tokio::test]
    async fn read_from_latest_sees_only_new_entries() {
        let bus = InProcessBus::new();
        bus.enqueue_job(&job("A")).await.unwrap();

        let cursor = bus.read_jobs("0", 0).await.unwrap().last().unwrap().id.clone();
        bus.enqueue_job(&job("B")).await.unwrap();

        let entries = bus.read_jobs(&cursor, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload.id, "B");
    }

    #[tokio::test]
    async fn cancel_signal_is_observable() {
        let bus = InProcessBus::new();
        assert!(!bus.was_cancelled("run-1").await.unwrap());
        bus.publish_cancel("run-1").await.unwrap();
        assert!(bus.was_cancelled("run-1").await.unwrap());
    }
}
