//! Suspension Manager (§4.8, C8): durable suspensions resumable by
//! webhook token, scheduled time, or (handled in [`crate::mapflow`]) child
//! completion.

use chrono::{Duration as ChronoDuration, Utc};
use rand::RngCore;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::bus::Bus;
use crate::db::connection::DatabasePool;
use crate::db::models::SuspensionRow;
use crate::db::repositories::{ScheduledJobRepository, SuspensionRepository};
use crate::eventlog;
use crate::model::{EventType, SuspensionType, WebhookWaitConfig, WorkItem};
use crate::{OrchestratorError, Result};

/// 128 bits of randomness, hex-encoded, for `resume_token`.
fn generate_resume_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Creates a `webhook` suspension for a webhook-wait node and writes
/// `NODE_SUSPENDED`. Called from the dispatch path in place of a normal
/// bus enqueue (§4.8).
pub async fn create_webhook_wait(
    pool: &DatabasePool,
    run_id: &str,
    node_id: &str,
    cfg: &WebhookWaitConfig,
) -> Result<SuspensionRow> {
    let token = generate_resume_token();
    let expires_at = Utc::now() + ChronoDuration::milliseconds(cfg.timeout_ms as i64);
    let suspension = SuspensionRepository::create(
        pool,
        &Uuid::new_v4().to_string(),
        run_id,
        node_id,
        SuspensionType::Webhook.as_str(),
        Some(&token),
        None,
        "{}",
        Some(&expires_at.to_rfc3339()),
    )
    .await?;

    eventlog::append_node_event(
        pool,
        run_id,
        node_id,
        EventType::NodeSuspended,
        0,
        &json!({"suspensionType": "webhook", "resumeToken": token}),
    )
    .await?;

    Ok(suspension)
}

/// Creates a `sleep` suspension for a delay node backed by a
/// [`crate::db::models::ScheduledJobRow`]; a sweeper promotes it onto the
/// bus once due (§4.8, §5 Timeouts). `work_item` is the already-built
/// `DELAY` job, stashed as the scheduled job's payload so the sweeper has
/// nothing left to build — only to replay.
pub async fn create_sleep(
    pool: &DatabasePool,
    run_id: &str,
    node_id: &str,
    duration_ms: u64,
    work_item: &WorkItem,
) -> Result<()> {
    let scheduled_for = Utc::now() + ChronoDuration::milliseconds(duration_ms as i64);
    let payload = serde_json::to_string(work_item)?;
    ScheduledJobRepository::create(
        pool,
        &Uuid::new_v4().to_string(),
        run_id,
        node_id,
        &scheduled_for.to_rfc3339(),
        &payload,
    )
    .await?;

    SuspensionRepository::create(
        pool,
        &Uuid::new_v4().to_string(),
        run_id,
        node_id,
        SuspensionType::Sleep.as_str(),
        None,
        Some(&scheduled_for.to_rfc3339()),
        "{}",
        Some(&scheduled_for.to_rfc3339()),
    )
    .await?;

    eventlog::append_node_event(
        pool,
        run_id,
        node_id,
        EventType::NodeSuspended,
        0,
        &json!({"suspensionType": "sleep", "scheduledFor": scheduled_for.to_rfc3339()}),
    )
    .await?;
    Ok(())
}

/// Outcome of a resume attempt, mapped to HTTP status at the boundary
/// (§6.2 `POST /webhooks/resume/{token}`: 202 / 404 / 410 / 409).
pub enum ResumeOutcome {
    Resumed,
    NotFound,
    Expired,
    RunTerminal,
}

/// Resolves a webhook suspension by token and enqueues a `WebhookResume`
/// work item carrying the caller's payload (§4.8, §8 "idempotent resume"
/// law: a second call on the same token never resolves twice).
pub async fn resume_webhook(
    pool: &DatabasePool,
    bus: &dyn Bus,
    token: &str,
    payload: Value,
) -> Result<ResumeOutcome> {
    use crate::jobbuilder::control_job;
    use crate::model::BusJobType;

    let Some(suspension) = SuspensionRepository::find_by_token(pool, token).await? else {
        return Ok(ResumeOutcome::NotFound);
    };
    if suspension.resolved {
        return Ok(ResumeOutcome::NotFound);
    }
    if let Some(expires_at) = &suspension.expires_at {
        if expires_at.as_str() < Utc::now().to_rfc3339().as_str() {
            return Ok(ResumeOutcome::Expired);
        }
    }

    let run = crate::db::repositories::WorkflowRunRepository::get_by_id(pool, &suspension.run_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("run {} not found", suspension.run_id)))?;
    if run.is_terminal() {
        return Ok(ResumeOutcome::RunTerminal);
    }

    SuspensionRepository::resolve(pool, &suspension.id).await?;
    eventlog::append_node_event(
        pool,
        &suspension.run_id,
        &suspension.node_id,
        EventType::NodeResumed,
        0,
        &json!({"source": "webhook"}),
    )
    .await?;

    let item = control_job(
        &suspension.node_id,
        &suspension.run_id,
        BusJobType::Webhookresume,
        json!({"payload": payload}),
    );
    bus.enqueue_job(&item).await?;

    Ok(ResumeOutcome::Resumed)
}

/// Sweeper entry point (C14/C15): resolves every expired, still-open
/// suspension into a timeout `NODE_FAILED` (§5 Timeouts). Returns the
/// number resolved.
pub async fn sweep_expired(pool: &DatabasePool) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let expired = SuspensionRepository::list_expired(pool, &now).await?;
    let mut count = 0;
    for suspension in expired {
        SuspensionRepository::resolve(pool, &suspension.id).await?;
        eventlog::append_node_event(
            pool,
            &suspension.run_id,
            &suspension.node_id,
            EventType::NodeFailed,
            0,
            &json!({"error": "timeout", "code": "SUSPENSION_EXPIRED"}),
        )
        .await
        .ok();
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::db::repositories::WorkflowRunRepository;

    async fn setup_db() -> DatabasePool {
        let pool = sqlx::sqlite::SqlitePool::connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(include_str!("../migrations/0001_init.sql"))
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
    async fn create_then_resume_once() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let cfg = WebhookWaitConfig { timeout_ms: 60_000, description: None };
        let susp = create_webhook_wait(&pool, "run-1", "W", &cfg).await.unwrap();

        let first = resume_webhook(&pool, &bus, susp.resume_token.as_deref().unwrap(), json!({"ok": true}))
            .await
            .unwrap();
        assert!(matches!(first, ResumeOutcome::Resumed));

        let second = resume_webhook(&pool, &bus, susp.resume_token.as_deref().unwrap(), json!({"ok": true}))
            .await
            .unwrap();
        assert!(matches!(second, ResumeOutcome::NotFound));
        assert_eq!(bus.job_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_token_not_found() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let outcome = resume_webhook(&pool, &bus, "nope", json!({})).await.unwrap();
        assert!(matches!(outcome, ResumeOutcome::NotFound));
    }

    #[tokio::test]
    async fn sweep_resolves_expired() {
        let pool = setup_db().await;
        SuspensionRepository::create(
            &pool, "susp-1", "run-1", "W", "webhook", Some("tok"), None, "{}", Some("2000-01-01T00:00:00Z"),
        )
        .await
        .unwrap();
        let n = sweep_expired(&pool).await.unwrap();
        assert_eq!(n, 1);
        let events = eventlog::list_for_run(&pool, "run-1").await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "NODE_FAILED"));
    }
}
