//! Worker Registry (§4.12, C12): classifies heartbeats by staleness and
//! aggregates throughput for `GET /workers`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::model::WorkerHeartbeat;
use crate::Result;

const HEALTHY_THRESHOLD_SECS: i64 = 15;
const UNHEALTHY_THRESHOLD_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Healthy,
    Unhealthy,
    Dead,
}

impl WorkerHealth {
    /// `now - last_seen`: `< 15s` healthy, `< 60s` unhealthy, `>= 60s`
    /// dead (and excluded from the registry view, §4.12).
    pub fn classify(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = (now - last_seen).num_seconds();
        if age < HEALTHY_THRESHOLD_SECS {
            WorkerHealth::Healthy
        } else if age < UNHEALTHY_THRESHOLD_SECS {
            WorkerHealth::Unhealthy
        } else {
            WorkerHealth::Dead
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerView {
    pub worker_id: String,
    pub memory_mb: f64,
    pub jobs_processed: u64,
    pub current_jobs: u32,
    pub uptime_secs: u64,
    pub last_seen: DateTime<Utc>,
    pub health: WorkerHealth,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerRegistryStats {
    pub total_processed: u64,
    pub total_active: u32,
    pub throughput_per_min: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerRegistryView {
    pub workers: Vec<WorkerView>,
    pub stats: WorkerRegistryStats,
}

fn heartbeat_to_view(heartbeat: WorkerHeartbeat, now: DateTime<Utc>) -> WorkerView {
    let health = WorkerHealth::classify(heartbeat.last_seen, now);
    WorkerView {
        worker_id: heartbeat.worker_id,
        memory_mb: heartbeat.memory_mb,
        jobs_processed: heartbeat.jobs_processed,
        current_jobs: heartbeat.current_jobs,
        uptime_secs: heartbeat.uptime_secs,
        last_seen: heartbeat.last_seen,
        health,
    }
}

/// Builds the `GET /workers` aggregated view: every live heartbeat
/// classified by health, with dead ones dropped, plus the registry-wide
/// aggregates (§4.12).
pub async fn registry_view(bus: &dyn Bus) -> Result<WorkerRegistryView> {
    let now = Utc::now();
    let heartbeats = bus.list_worker_heartbeats().await?;

    let workers: Vec<WorkerView> = heartbeats
        .into_iter()
        .map(|h| heartbeat_to_view(h, now))
        .filter(|w| w.health != WorkerHealth::Dead)
        .collect();

    let total_processed: u64 = workers.iter().map(|w| w.jobs_processed).sum();
    let total_active: u32 = workers.iter().map(|w| w.current_jobs).sum();
    let throughput_per_min = workers
        .iter()
        .map(|w| throughput_per_min(w.jobs_processed, w.uptime_secs))
        .sum();

    Ok(WorkerRegistryView {
        workers,
        stats: WorkerRegistryStats {
            total_processed,
            total_active,
            throughput_per_min,
        },
    })
}

fn throughput_per_min(jobs_processed: u64, uptime_secs: u64) -> f64 {
    if uptime_secs == 0 {
        return 0.0;
    }
    jobs_processed as f64 / (uptime_secs as f64 / 60.0)
}

/// `chrono::Duration` helper kept alongside the thresholds above so a
/// caller constructing test heartbeats doesn't need to reach for
/// `chrono` directly.
pub fn seconds_ago(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    now - ChronoDuration::seconds(secs)
}
