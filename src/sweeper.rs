//! Scheduler/sweeper background loops (§4.8, §4.9, §5 Timeouts, C14/C15):
//! the ScheduledJob mover, the suspension-expiry sweeper, the cron
//! scheduler tick, and the retention/pinning cleanup. Each is a plain
//! `tokio::spawn`-able async loop, mirroring the teacher's background
//! worker shape — no separate scheduling crate, just a `tokio::time`
//! interval and a tight error-log-and-continue body so one bad tick
//! never kills the loop.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};

use crate::bus::Bus;
use crate::db::connection::DatabasePool;
use crate::db::repositories::{ScheduledJobRepository, WorkflowRunRepository};
use crate::model::WorkItem;
use crate::secrets::SecretStore;
use crate::{suspend, trigger, Result};

/// Default retention window for unpinned terminal runs (§3 "Ownership &
/// lifecycle"). The spec leaves the exact duration unspecified; 30 days
/// matches the teacher's own default data-retention job.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Promotes every due `ScheduledJob` onto the jobs bus stream (§3, §4.8).
/// `suspend::create_sleep` already stashed the fully-built `WorkItem` as
/// the job's payload, so this just replays it — no rebuilding.
pub async fn scheduled_job_mover_tick(pool: &DatabasePool, bus: &dyn Bus) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let due = ScheduledJobRepository::list_due(pool, &now).await?;
    let mut moved = 0;
    for job in due {
        let item: WorkItem = match serde_json::from_str(&job.payload) {
            Ok(item) => item,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "corrupt scheduled job payload, skipping");
                continue;
            }
        };
        bus.enqueue_job(&item).await?;
        ScheduledJobRepository::mark_dispatched(pool, &job.id).await?;
        moved += 1;
    }
    Ok(moved)
}

/// Runs [`scheduled_job_mover_tick`] on a fixed interval until the
/// process exits.
pub async fn scheduled_job_mover_loop(pool: DatabasePool, bus: std::sync::Arc<dyn Bus>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match scheduled_job_mover_tick(&pool, bus.as_ref()).await {
            Ok(0) => {}
            Ok(n) => info!(moved = n, "scheduled job mover promoted jobs"),
            Err(e) => error!(error = %e, "scheduled job mover tick failed"),
        }
    }
}

/// Runs [`suspend::sweep_expired`] on a fixed interval (§5 Timeouts).
pub async fn suspension_sweeper_loop(pool: DatabasePool, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match suspend::sweep_expired(&pool).await {
            Ok(0) => {}
            Ok(n) => info!(resolved = n, "suspension sweeper resolved expired suspensions"),
            Err(e) => error!(error = %e, "suspension sweeper tick failed"),
        }
    }
}

/// Runs [`trigger::cron_tick`] once per `interval`, tracking the window
/// boundary itself so no tick is double-evaluated or skipped even if a
/// tick runs late (§4.9 Cron, §9 "never approximate next-run time").
pub async fn cron_scheduler_loop(
    pool: DatabasePool,
    bus: std::sync::Arc<dyn Bus>,
    secrets: std::sync::Arc<SecretStore>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut window_start = Utc::now();
    loop {
        ticker.tick().await;
        let window_end = Utc::now();
        match trigger::cron_tick(&pool, bus.as_ref(), secrets.as_ref(), window_start, window_end).await {
            Ok(runs) if runs.is_empty() => {}
            Ok(runs) => info!(count = runs.len(), "cron scheduler fired runs"),
            Err(e) => error!(error = %e, "cron scheduler tick failed"),
        }
        window_start = window_end;
    }
}

/// Deletes unpinned terminal runs past `retention_days`, along with every
/// row the run exclusively owns (§3 "Ownership & lifecycle": "A run
/// exclusively owns its events, chunks, suspensions, scheduled jobs, and
/// (for map nodes) batch operations and their results"). Child runs are
/// referenced weakly via `parent_run_id` and are left alone — this is not
/// a cascade across runs.
pub async fn retention_sweep_tick(pool: &DatabasePool, retention_days: i64) -> Result<usize> {
    let cutoff = (Utc::now() - ChronoDuration::days(retention_days)).to_rfc3339();
    let due = WorkflowRunRepository::list_terminal_before(pool, &cutoff).await?;
    let mut deleted = 0;
    for run in due {
        delete_run_owned_rows(pool, &run.id).await?;
        WorkflowRunRepository::delete(pool, &run.id).await?;
        deleted += 1;
    }
    Ok(deleted)
}

async fn delete_run_owned_rows(pool: &DatabasePool, run_id: &str) -> Result<()> {
    sqlx::query(
        "DELETE FROM batch_results WHERE batch_id IN (SELECT id FROM batch_operations WHERE run_id = ?)",
    )
    .bind(run_id)
    .execute(pool)
    .await?;
    sqlx::query("DELETE FROM batch_operations WHERE run_id = ?")
        .bind(run_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM scheduled_jobs WHERE run_id = ?")
        .bind(run_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM suspensions WHERE run_id = ?")
        .bind(run_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM stream_chunks WHERE run_id = ?")
        .bind(run_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM run_events WHERE run_id = ?")
        .bind(run_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Runs [`retention_sweep_tick`] on a fixed interval. Deliberately coarse
/// (hourly by convention) since retention is a housekeeping concern, not
/// a latency-sensitive one.
pub async fn retention_sweeper_loop(pool: DatabasePool, interval: Duration, retention_days: i64) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match retention_sweep_tick(&pool, retention_days).await {
            Ok(0) => {}
            Ok(n) => info!(deleted = n, "retention sweeper deleted terminal runs"),
            Err(e) => warn!(error = %e, "retention sweep tick failed"),
        }
    }
}

pub fn seconds_ago(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    now - ChronoDuration::seconds(secs)
}
