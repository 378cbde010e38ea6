//! Shared dispatch helper used by the Run Lifecycle Manager (root nodes)
//! and the Orchestrator (next-wave nodes): writes `NODE_SCHEDULED` exactly
//! once per `(run_id, node_id, retry_count)`, then routes the node to the
//! right subsystem. Centralizing this keeps the "don't re-dispatch an
//! already-scheduled node" invariant (§4.3, §4.5 step 5, §8 invariant 2)
//! in one place instead of duplicated across every call site.
//!
//! Most node types just become a bus job. Three are special: `webhook-wait`
//! and `delay` create durable suspensions instead of waiting on a worker
//! result (§4.8); `subflow` and `map` hand off to [`crate::mapflow`]
//! (§4.7), which creates child runs rather than enqueuing a job at all.

use std::collections::HashMap;

use serde_json::{json, Value};

use chrono::Utc;

use crate::bus::Bus;
use crate::db::connection::DatabasePool;
use crate::eventlog;
use crate::interpolate::{interpolate_str, InterpolationContext};
use crate::jobbuilder::{DispatchContext, JobBuilder};
use crate::mapflow;
use crate::model::{EventType, Node, NodeConfig, NodeResultMessage, NodeType};
use crate::router::{coerce_route_value, RouterEvaluator};
use crate::suspend;
use crate::Result;

/// Router expressions run inside the control plane itself (C6), not on a
/// worker, so they get a much tighter budget than a real node execution.
const ROUTER_TIMEOUT_MS: u64 = 50;
const ROUTER_MEMORY_BYTES: usize = 16 * 1024 * 1024;

/// Everything a dispatch needs, bundled so call sites don't pass eight
/// positional arguments.
pub struct DispatchEnv<'a> {
    pub pool: &'a DatabasePool,
    pub bus: &'a dyn Bus,
    pub run_id: &'a str,
    pub run_depth: i64,
    pub secrets: &'a HashMap<String, String>,
    pub trigger: &'a Value,
    pub node_outputs: &'a HashMap<String, Value>,
}

impl<'a> DispatchEnv<'a> {
    fn job_ctx(&self) -> DispatchContext<'a> {
        DispatchContext {
            run_id: self.run_id,
            run_depth: self.run_depth,
            secrets: self.secrets,
            trigger: self.trigger,
            node_outputs: self.node_outputs,
        }
    }
}

/// Dispatches `node` at `retry_count` (0 for the first attempt). Returns
/// `true` if this call actually scheduled the node, `false` if it was
/// already scheduled by a concurrent step (idempotent no-op).
pub async fn dispatch_ready_node(env: &DispatchEnv<'_>, node: &Node, retry_count: u32) -> Result<bool> {
    let scheduled = eventlog::append_node_event_once(
        env.pool,
        env.run_id,
        &node.id,
        EventType::NodeScheduled,
        retry_count as i64,
        &json!({}),
    )
    .await?;
    if scheduled.is_none() {
        return Ok(false);
    }

    match node.node_type {
        NodeType::WebhookWait => {
            let NodeConfig::WebhookWait(cfg) = NodeConfig::parse(node)? else { unreachable!() };
            suspend::create_webhook_wait(env.pool, env.run_id, &node.id, &cfg).await?;
        }
        NodeType::Delay => {
            let NodeConfig::Delay(cfg) = NodeConfig::parse(node)? else { unreachable!() };
            let item = JobBuilder::build(node, &env.job_ctx())?;
            suspend::create_sleep(env.pool, env.run_id, &node.id, cfg.duration_ms, &item).await?;
        }
        NodeType::Subflow => {
            mapflow::dispatch_subflow(env, node).await?;
        }
        NodeType::Map => {
            mapflow::dispatch_map(env, node).await?;
        }
        NodeType::Router => {
            evaluate_router(env, node, retry_count).await?;
        }
        _ => {
            let mut item = JobBuilder::build(node, &env.job_ctx())?;
            item.retry_count = retry_count;
            env.bus.enqueue_job(&item).await?;
        }
    }
    Ok(true)
}

/// Routers evaluate synchronously in-process (§4.6) rather than on a
/// worker, but still publish onto the `results` stream so the
/// Orchestrator's completion pipeline is the only place that interprets
/// a `NODE_COMPLETED` (§4.5 step 3's router-specific edge filtering).
async fn evaluate_router(env: &DispatchEnv<'_>, node: &Node, retry_count: u32) -> Result<()> {
    let NodeConfig::Router(cfg) = NodeConfig::parse(node)? else { unreachable!() };
    let ictx = InterpolationContext::new(env.secrets, env.trigger, env.node_outputs);
    let resolved_str = interpolate_str(&cfg.route_by, &ictx);
    let resolved = coerce_route_value(&resolved_str);

    let evaluator = RouterEvaluator::new(ROUTER_TIMEOUT_MS, ROUTER_MEMORY_BYTES);
    let fired = evaluator.evaluate(&resolved, &cfg.conditions, cfg.mode, cfg.default_output.as_deref());

    let message = NodeResultMessage {
        node_id: node.id.clone(),
        run_id: env.run_id.to_string(),
        status_code: 200,
        body: serde_json::json!({"fired": fired}),
        timestamp: Utc::now(),
        duration_ms: None,
        isolated: None,
        retry_count,
    };
    env.bus.publish_result(&message).await?;
    Ok(())
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

    fn http_node() -> Node {
        Node {
            id: "A".into(),
            node_type: NodeType::HttpRequest,
            data: json!({"url": "https://example.com", "method": "GET"}),
        }
    }

    #[tokio::test]
    async fn dispatches_once() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = HashMap::new();
        let outputs = HashMap::new();
        let node = http_node();
        let env = DispatchEnv {
            pool: &pool,
            bus: &bus,
            run_id: "run-1",
            run_depth: 0,
            secrets: &secrets,
            trigger: &Value::Null,
            node_outputs: &outputs,
        };

        let first = dispatch_ready_node(&env, &node, 0).await.unwrap();
        assert!(first);
        let second = dispatch_ready_node(&env, &node, 0).await.unwrap();
        assert!(!second);
        assert_eq!(bus.job_count().await, 1);
    }

    #[tokio::test]
    async fn webhook_wait_suspends_instead_of_enqueuing() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = HashMap::new();
        let outputs = HashMap::new();
        let node = Node {
            id: "W".into(),
            node_type: NodeType::WebhookWait,
            data: json!({"timeoutMs": 60_000}),
        };
        let env = DispatchEnv {
            pool: &pool,
            bus: &bus,
            run_id: "run-1",
            run_depth: 0,
            secrets: &secrets,
            trigger: &Value::Null,
            node_outputs: &outputs,
        };

        dispatch_ready_node(&env, &node, 0).await.unwrap();
        assert_eq!(bus.job_count().await, 0);
        let events = eventlog::list_for_run(&pool, "run-1").await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "NODE_SUSPENDED"));
    }
}
