//! Trigger Intake (§4.9, C9): the three external entry points into the
//! orchestrator — manual, webhook, and cron — plus the idempotency,
//! signature, and rate-limit rules webhooks need. Sub-flow/map entry is
//! internal and lives in [`crate::mapflow`] (§4.9 "internal — handled by
//! C7").

use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::bus::Bus;
use crate::db::connection::DatabasePool;
use crate::db::models::WorkflowRow;
use crate::db::repositories::{
    WebhookDeliveryRepository, WorkflowRepository, WorkflowRunRepository, WorkflowVersionRepository,
};
use crate::lifecycle;
use crate::model::{Graph, OverlapMode, TriggerKind};
use crate::secrets::SecretStore;
use crate::{OrchestratorError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Keyed per-workflow token buckets for webhook intake (100/min) and
/// share-link issuance (10/min), §5 "Rate limits".
pub struct TriggerRateLimiters {
    webhook: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    share: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl TriggerRateLimiters {
    pub fn new() -> Self {
        Self {
            webhook: RateLimiter::keyed(Quota::per_minute(NonZeroU32::new(100).unwrap())),
            share: RateLimiter::keyed(Quota::per_minute(NonZeroU32::new(10).unwrap())),
        }
    }

    pub fn check_webhook(&self, workflow_id: &str) -> bool {
        self.webhook.check_key(&workflow_id.to_string()).is_ok()
    }

    pub fn check_share(&self, workflow_id: &str) -> bool {
        self.share.check_key(&workflow_id.to_string()).is_ok()
    }
}

impl Default for TriggerRateLimiters {
    fn default() -> Self {
        Self::new()
    }
}

/// Manual trigger result, mirroring `POST /triggers/manual`'s response
/// shape `{runId, scheduledNodes[]}`.
pub struct TriggerResult {
    pub run_id: String,
    pub scheduled_nodes: Vec<String>,
}

/// `POST /triggers/manual` (§4.9 Manual): starts a new run from the
/// supplied graph, or the workflow's draft when only `workflow_id` is
/// given. `start_from_node` restricts scheduling to that node and its
/// downstream.
pub async fn trigger_manual(
    pool: &DatabasePool,
    bus: &dyn Bus,
    secrets: &SecretStore,
    workflow_id: Option<&str>,
    graph: Option<Graph>,
    input_data: Value,
    start_from_node: Option<&str>,
) -> Result<TriggerResult> {
    let graph = match graph {
        Some(g) => g,
        None => {
            let workflow_id = workflow_id.ok_or_else(|| {
                OrchestratorError::Validation("manual trigger requires graph or workflowId".to_string())
            })?;
            let workflow = WorkflowRepository::get_by_id(pool, workflow_id)
                .await?
                .ok_or_else(|| OrchestratorError::NotFound(format!("workflow {workflow_id} not found")))?;
            serde_json::from_str(&workflow.draft_graph)
                .map_err(|e| OrchestratorError::Infrastructure(format!("corrupt draft_graph: {e}")))?
        }
    };

    let run_id = lifecycle::new_id();
    let (_run, scheduled_nodes) = lifecycle::create_and_start(
        pool,
        bus,
        secrets,
        &run_id,
        workflow_id,
        None,
        &graph,
        TriggerKind::Manual,
        &input_data,
        None,
        None,
        0,
        start_from_node,
    )
    .await?;

    Ok(TriggerResult { run_id, scheduled_nodes })
}

/// Outcome of a webhook delivery, mapped to HTTP status at the boundary
/// (§6.2 `POST /webhooks/{flowId}`: 202 new / 202 replayed / 400 / 401 /
/// 403 / 429). Everything the caller can legitimately hit is a variant
/// here, not an `Err` — `Err` stays reserved for DB/bus outages.
pub enum WebhookOutcome {
    Scheduled { run_id: String, scheduled_nodes: Vec<String> },
    Replayed { status: u16, body: Value },
    Disabled,
    NoPublishedVersion,
    RateLimited,
    InvalidSignature,
}

/// `POST /webhooks/{flowId}` (§4.9 Webhook). Checks, in order: workflow
/// exists and webhooks enabled, an active published version exists, the
/// rate limit, idempotency replay, and (if a secret is configured) the
/// `X-Webhook-Signature` HMAC.
#[allow(clippy::too_many_arguments)]
pub async fn trigger_webhook(
    pool: &DatabasePool,
    bus: &dyn Bus,
    secrets: &SecretStore,
    limiters: &TriggerRateLimiters,
    workflow_id: &str,
    raw_body: &[u8],
    signature_header: Option<&str>,
    idempotency_header: Option<&str>,
) -> Result<WebhookOutcome> {
    let workflow = WorkflowRepository::get_by_id(pool, workflow_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("workflow {workflow_id} not found")))?;

    if !workflow.webhook_enabled {
        return Ok(WebhookOutcome::Disabled);
    }
    let Some(active_version_id) = workflow.active_version_id.clone() else {
        return Ok(WebhookOutcome::NoPublishedVersion);
    };

    if !limiters.check_webhook(workflow_id) {
        return Ok(WebhookOutcome::RateLimited);
    }

    let idempotency_key = match idempotency_header {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => hex_encode(&Sha256::digest(raw_body)),
    };
    if let Some(existing) = WebhookDeliveryRepository::find(pool, workflow_id, &idempotency_key).await? {
        let body: Value = serde_json::from_str(&existing.response_body).unwrap_or(Value::Null);
        return Ok(WebhookOutcome::Replayed {
            status: existing.response_status as u16,
            body,
        });
    }

    if let Some(secret) = &workflow.webhook_secret {
        let Some(signature) = signature_header else {
            return Ok(WebhookOutcome::InvalidSignature);
        };
        if !verify_signature(secret, raw_body, signature) {
            return Ok(WebhookOutcome::InvalidSignature);
        }
    }

    let input_data: Value = serde_json::from_slice(raw_body).unwrap_or(Value::Null);

    let version = WorkflowVersionRepository::get_by_id(pool, &active_version_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("workflow version {active_version_id} not found")))?;
    let graph: Graph = serde_json::from_str(&version.graph)
        .map_err(|e| OrchestratorError::Infrastructure(format!("corrupt workflow version graph: {e}")))?;

    let run_id = lifecycle::new_id();
    let (_run, scheduled_nodes) = lifecycle::create_and_start(
        pool,
        bus,
        secrets,
        &run_id,
        Some(workflow_id),
        Some(&active_version_id),
        &graph,
        TriggerKind::Webhook,
        &input_data,
        None,
        None,
        0,
        None,
    )
    .await?;

    let response_body = json!({"runId": run_id, "scheduledNodes": scheduled_nodes});
    WebhookDeliveryRepository::store(
        pool,
        workflow_id,
        &idempotency_key,
        Some(&run_id),
        202,
        &response_body.to_string(),
    )
    .await?;

    Ok(WebhookOutcome::Scheduled { run_id, scheduled_nodes })
}

/// Verifies `X-Webhook-Signature: sha256=<hex>` over the raw body using
/// constant-time comparison (HMAC verification is constant-time by
/// construction in the `hmac`/`subtle` stack).
fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Some(sig_bytes) = hex_decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// True-cron evaluation (§9 "never approximate next-run time"): does
/// `expr` (in `tz`) fire strictly after `window_start` and at or before
/// `window_end`? Driven off `cron::Schedule::after`, not an approximate
/// interval check.
fn fires_in_window(
    expr: &str,
    tz: Tz,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<bool> {
    let schedule = Schedule::from_str(expr)
        .map_err(|e| OrchestratorError::Validation(format!("invalid cron expression {expr:?}: {e}")))?;
    let after = window_start.with_timezone(&tz);
    match schedule.after(&after).next() {
        Some(next) => Ok(next.with_timezone(&Utc) <= window_end),
        None => Ok(false),
    }
}

/// One scheduler tick (§4.9 Cron, C15): fires every enabled schedule due
/// in `(window_start, window_end]`, honoring `overlap_mode`. Returns the
/// run ids created.
pub async fn cron_tick(
    pool: &DatabasePool,
    bus: &dyn Bus,
    secrets: &SecretStore,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<String>> {
    let mut created = Vec::new();
    let workflows = WorkflowRepository::list_with_schedule_enabled(pool).await?;
    for workflow in workflows {
        let Some(expr) = workflow.schedule_cron.clone() else { continue };
        let tz: Tz = workflow
            .schedule_timezone
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Tz::UTC);

        if !fires_in_window(&expr, tz, window_start, window_end)? {
            continue;
        }
        if let Some(run_id) = fire_cron_workflow(pool, bus, secrets, &workflow).await? {
            created.push(run_id);
        }
    }
    Ok(created)
}

async fn fire_cron_workflow(
    pool: &DatabasePool,
    bus: &dyn Bus,
    secrets: &SecretStore,
    workflow: &WorkflowRow,
) -> Result<Option<String>> {
    let overlap_mode: OverlapMode = workflow
        .schedule_overlap_mode
        .parse()
        .unwrap_or(OverlapMode::Skip);

    match overlap_mode {
        OverlapMode::Skip => {
            if WorkflowRunRepository::has_open_cron_run(pool, &workflow.id).await? {
                return Ok(None);
            }
        }
        OverlapMode::QueueOne => {
            if WorkflowRunRepository::count_queued_cron_runs(pool, &workflow.id).await? > 0 {
                return Ok(None);
            }
        }
        OverlapMode::Parallel => {}
    }

    let Some(active_version_id) = workflow.active_version_id.clone() else {
        return Ok(None);
    };
    let version = WorkflowVersionRepository::get_by_id(pool, &active_version_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("workflow version {active_version_id} not found")))?;
    let graph: Graph = serde_json::from_str(&version.graph)
        .map_err(|e| OrchestratorError::Infrastructure(format!("corrupt workflow version graph: {e}")))?;
    let input_data: Value = serde_json::from_str(&workflow.schedule_input_data).unwrap_or(Value::Null);

    let run_id = lifecycle::new_id();
    lifecycle::create_and_start(
        pool,
        bus,
        secrets,
        &run_id,
        Some(&workflow.id),
        Some(&active_version_id),
        &graph,
        TriggerKind::Cron,
        &input_data,
        None,
        None,
        0,
        None,
    )
    .await?;
    Ok(Some(run_id))
}

impl std::str::FromStr for OverlapMode {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "skip" => Ok(OverlapMode::Skip),
            "queue_one" => Ok(OverlapMode::QueueOne),
            "parallel" => Ok(OverlapMode::Parallel),
            other => Err(OrchestratorError::Validation(format!("unknown overlap mode: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;

    async fn setup_db() -> DatabasePool {
        let pool = sqlx::sqlite::SqlitePool::connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(include_str!("../migrations/0001_init.sql"))
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    fn secret_store(pool: DatabasePool) -> SecretStore {
        SecretStore::new(pool)
    }

    #[tokio::test]
    async fn manual_trigger_uses_supplied_graph() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = secret_store(pool.clone());

        let graph = Graph {
            nodes: vec![crate::model::Node {
                id: "A".to_string(),
                node_type: crate::model::NodeType::Delay,
                data: json!({"durationMs": 1}),
            }],
            edges: vec![],
            viewport: None,
        };

        let result = trigger_manual(&pool, &bus, &secrets, None, Some(graph), json!({}), None)
            .await
            .unwrap();
        assert_eq!(result.scheduled_nodes, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn manual_trigger_without_graph_or_workflow_id_is_validation_error() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = secret_store(pool.clone());
        let result = trigger_manual(&pool, &bus, &secrets, None, None, json!({}), None).await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[tokio::test]
    async fn webhook_disabled_is_reported_not_erred() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = secret_store(pool.clone());
        let limiters = TriggerRateLimiters::new();
        WorkflowRepository::create(&pool, "wf-1", "Test", "{}").await.unwrap();

        let result = trigger_webhook(&pool, &bus, &secrets, &limiters, "wf-1", b"{}", None, None).await.unwrap();
        assert!(matches!(result, WebhookOutcome::Disabled));
    }

    #[tokio::test]
    async fn webhook_without_published_version_is_reported_not_erred() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = secret_store(pool.clone());
        let limiters = TriggerRateLimiters::new();
        WorkflowRepository::create(&pool, "wf-1", "Test", "{}").await.unwrap();
        WorkflowRepository::set_webhook_settings(&pool, "wf-1", true, None).await.unwrap();

        let result = trigger_webhook(&pool, &bus, &secrets, &limiters, "wf-1", b"{}", None, None).await.unwrap();
        assert!(matches!(result, WebhookOutcome::NoPublishedVersion));
    }

    #[tokio::test]
    async fn webhook_replays_stored_response_on_duplicate_idempotency_key() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = secret_store(pool.clone());
        let limiters = TriggerRateLimiters::new();
        WorkflowRepository::create(&pool, "wf-1", "Test", "{\"nodes\":[],\"edges\":[]}").await.unwrap();
        WorkflowRepository::set_webhook_settings(&pool, "wf-1", true, None).await.unwrap();
        let version = crate::db::repositories::WorkflowVersionRepository::create_next(
            &pool, "v-1", "wf-1", "{\"nodes\":[],\"edges\":[]}",
        )
        .await
        .unwrap();
        WorkflowRepository::set_active_version(&pool, "wf-1", &version.id).await.unwrap();

        let first = trigger_webhook(&pool, &bus, &secrets, &limiters, "wf-1", b"{}", None, Some("idem-1"))
            .await
            .unwrap();
        let run_id = match first {
            WebhookOutcome::Scheduled { run_id, .. } => run_id,
            _ => panic!("expected Scheduled"),
        };

        let second = trigger_webhook(&pool, &bus, &secrets, &limiters, "wf-1", b"{}", None, Some("idem-1"))
            .await
            .unwrap();
        match second {
            WebhookOutcome::Replayed { status, body } => {
                assert_eq!(status, 202);
                assert_eq!(body["runId"], run_id);
            }
            _ => panic!("expected Replayed"),
        }
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = secret_store(pool.clone());
        let limiters = TriggerRateLimiters::new();
        WorkflowRepository::create(&pool, "wf-1", "Test", "{\"nodes\":[],\"edges\":[]}").await.unwrap();
        WorkflowRepository::set_webhook_settings(&pool, "wf-1", true, Some("shh")).await.unwrap();
        let version = crate::db::repositories::WorkflowVersionRepository::create_next(
            &pool, "v-1", "wf-1", "{\"nodes\":[],\"edges\":[]}",
        )
        .await
        .unwrap();
        WorkflowRepository::set_active_version(&pool, "wf-1", &version.id).await.unwrap();

        let result = trigger_webhook(
            &pool, &bus, &secrets, &limiters, "wf-1", b"{}", Some("sha256=deadbeef"), None,
        )
        .await
        .unwrap();
        assert!(matches!(result, WebhookOutcome::InvalidSignature));
    }

    #[tokio::test]
    async fn webhook_accepts_valid_signature() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = secret_store(pool.clone());
        let limiters = TriggerRateLimiters::new();
        WorkflowRepository::create(&pool, "wf-1", "Test", "{\"nodes\":[],\"edges\":[]}").await.unwrap();
        WorkflowRepository::set_webhook_settings(&pool, "wf-1", true, Some("shh")).await.unwrap();
        let version = crate::db::repositories::WorkflowVersionRepository::create_next(
            &pool, "v-1", "wf-1", "{\"nodes\":[],\"edges\":[]}",
        )
        .await
        .unwrap();
        WorkflowRepository::set_active_version(&pool, "wf-1", &version.id).await.unwrap();

        let body = b"{\"x\":1}";
        let mut mac = HmacSha256::new_from_slice(b"shh").unwrap();
        mac.update(body);
        let sig = hex_encode(&mac.finalize().into_bytes());
        let header = format!("sha256={sig}");

        let result = trigger_webhook(&pool, &bus, &secrets, &limiters, "wf-1", body, Some(&header), None)
            .await
            .unwrap();
        assert!(matches!(result, WebhookOutcome::Scheduled { .. }));
    }

    #[test]
    fn cron_fires_exactly_once_per_matching_minute() {
        use chrono::TimeZone;
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 11, 59, 30).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap();
        assert!(fires_in_window("0 0 12 * * *", Tz::UTC, start, end).unwrap());

        let start2 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 31).unwrap();
        let end2 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap();
        assert!(!fires_in_window("0 0 12 * * *", Tz::UTC, start2, end2).unwrap());
    }

    #[test]
    fn hex_round_trip() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(hex_decode(&hex_encode(&bytes)).unwrap(), bytes);
    }
}
