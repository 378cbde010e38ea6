//! Orchestrator (§4.5, C5): the core run-transition loop. Every node
//! completion or failure — whether a real worker result or an internal
//! control job bridged back onto the `results` stream — flows through
//! [`advance`], which is the only place that writes `NODE_COMPLETED`/
//! `NODE_FAILED`, computes what becomes ready next, and detects run
//! termination.
//!
//! Two background loops drive this from the bus: [`consume_results_loop`]
//! reads real and bridged results and calls `advance`; [`control_job_loop`]
//! reads `SubFlowResume`/`MapChildComplete`/`WebhookResume` control jobs
//! off the `jobs` stream and republishes them as synthetic results so
//! `consume_results_loop` is the only consumer that needs to understand
//! `NodeResultMessage` (§4.8).

use std::sync::Arc;

use serde_json::{json, Value};

use crate::bus::Bus;
use crate::db::connection::DatabasePool;
use crate::db::models::WorkflowRunRow;
use crate::db::repositories::WorkflowRunRepository;
use crate::eventlog;
use crate::executor::{self, DispatchEnv};
use crate::lifecycle;
use crate::locks::LockRegistry;
use crate::mapflow;
use crate::model::{BusJobType, Edge, EventType, Graph, NodeResultMessage, NodeType};
use crate::secrets::SecretStore;
use crate::{OrchestratorError, Result};

/// Whether `edge` is part of the branch its source actually took. Normal
/// nodes have exactly one branch (always live); `router` fires zero or
/// more named outputs, `subflow`/`map` fire exactly one of `success`/
/// `error`. A source that hasn't completed yet is conservatively "not
/// live" — the caller re-checks once it has.
fn edge_is_live(graph: &Graph, edge: &Edge, node_outputs: &std::collections::HashMap<String, Value>) -> bool {
    let Some(source) = graph.node(&edge.source) else { return true };
    match source.node_type {
        NodeType::Router => {
            let Some(out) = node_outputs.get(&edge.source) else { return false };
            let fired = out.get("fired").and_then(Value::as_array);
            match (fired, edge.source_handle.as_deref()) {
                (Some(fired), Some(handle)) => fired.iter().any(|f| f.as_str() == Some(handle)),
                _ => false,
            }
        }
        NodeType::Subflow | NodeType::Map => {
            let Some(out) = node_outputs.get(&edge.source) else { return false };
            let route_to = out.get("route_to").and_then(Value::as_str).unwrap_or("success");
            if route_to == "error" {
                edge.source_handle.as_deref() == Some("error")
            } else {
                matches!(edge.source_handle.as_deref(), Some("success") | None)
            }
        }
        _ => true,
    }
}

/// Fixpoint pass over `graph`: repeatedly folds the event log into
/// completed/failed/in-flight sets and, for every node not yet settled,
/// either dispatches it (every live incoming edge done and none failed),
/// cascades a failure (a live incoming edge's source failed), skips it
/// (it has incoming edges but none of them are live — an unreached
/// routing branch), or leaves it waiting. Converges because each pass
/// that makes no progress exits the loop, and every write moves a node
/// from "pending" to a settled state it can never leave.
async fn advance_ready(
    pool: &DatabasePool,
    bus: &dyn Bus,
    secrets: &SecretStore,
    run: &WorkflowRunRow,
    graph: &Graph,
) -> Result<()> {
    loop {
        let completed = eventlog::completed_node_ids(pool, &run.id).await?;
        let failed = eventlog::failed_node_ids(pool, &run.id).await?;
        let in_flight = eventlog::in_flight_node_ids(pool, &run.id).await?;
        let node_outputs = eventlog::node_outputs(pool, &run.id).await?;

        let mut progressed = false;

        for node in &graph.nodes {
            if completed.contains(&node.id) || failed.contains(&node.id) || in_flight.contains(&node.id) {
                continue;
            }
            let incoming = graph.incoming_edges(&node.id);
            if incoming.is_empty() {
                // Roots are dispatched by lifecycle::start; a node with no
                // incoming edges reached here only because it has none by
                // construction, never anything to re-check.
                continue;
            }

            let mut any_live = false;
            let mut any_live_failed = false;
            let mut all_live_settled = true;
            for edge in &incoming {
                let source_settled = completed.contains(&edge.source) || failed.contains(&edge.source);
                if !edge_is_live(graph, edge, &node_outputs) {
                    if !source_settled {
                        all_live_settled = false;
                    }
                    continue;
                }
                any_live = true;
                if failed.contains(&edge.source) {
                    any_live_failed = true;
                } else if !completed.contains(&edge.source) {
                    all_live_settled = false;
                }
            }

            if !all_live_settled {
                continue;
            }

            if any_live_failed {
                let wrote = eventlog::append_node_event_once(
                    pool,
                    &run.id,
                    &node.id,
                    EventType::NodeFailed,
                    0,
                    &json!({"error": "upstream dependency failed", "code": "UPSTREAM_DEPENDENCY_FAILED"}),
                )
                .await?;
                progressed |= wrote.is_some();
                continue;
            }

            if !any_live {
                // Every incoming edge belongs to a branch its source didn't
                // take (e.g. the other side of an if/else router). This
                // node never runs; record it as a no-op completion so run
                // termination still converges.
                let wrote = eventlog::append_node_event_once(
                    pool,
                    &run.id,
                    &node.id,
                    EventType::NodeCompleted,
                    0,
                    &json!({"output": Value::Null, "skipped": true}),
                )
                .await?;
                progressed |= wrote.is_some();
                continue;
            }

            let secret_map = secrets.all().await?;
            let trigger: Value = serde_json::from_str(&run.input_data).unwrap_or(Value::Null);
            let env = DispatchEnv {
                pool,
                bus,
                run_id: &run.id,
                run_depth: run.depth,
                secrets: secret_map.as_ref(),
                trigger: &trigger,
                node_outputs: &node_outputs,
            };
            if executor::dispatch_ready_node(&env, node, 0).await? {
                progressed = true;
            }
        }

        if !progressed {
            return Ok(());
        }
    }
}

/// The single entry point for any node outcome, real or bridged (§4.5
/// steps 1-7). Acquires the run's serialization lock for the whole step
/// (§5) so two results for the same run never interleave.
pub async fn advance(
    pool: &DatabasePool,
    bus: &dyn Bus,
    locks: &LockRegistry,
    secrets: &SecretStore,
    result: &NodeResultMessage,
) -> Result<()> {
    let _guard = locks.runs.lock(&result.run_id).await;

    let Some(run) = WorkflowRunRepository::get_by_id(pool, &result.run_id).await? else {
        return Ok(());
    };
    if run.is_terminal() {
        return Ok(());
    }
    let graph = lifecycle::parse_snapshot(&run)?;
    let Some(node) = graph.node(&result.node_id).cloned() else {
        return Ok(());
    };

    let success = result.is_success();
    let cancelled = result.is_cancelled();

    if !success && !cancelled {
        let max_retries = node.node_type.default_max_retries();
        if result.retry_count < max_retries {
            let scheduled = eventlog::append_node_event_once(
                pool,
                &run.id,
                &node.id,
                EventType::NodeRetryScheduled,
                result.retry_count as i64,
                &json!({"error": result.body, "statusCode": result.status_code}),
            )
            .await?;
            if scheduled.is_some() {
                let secret_map = secrets.all().await?;
                let trigger: Value = serde_json::from_str(&run.input_data).unwrap_or(Value::Null);
                let node_outputs = eventlog::node_outputs(pool, &run.id).await?;
                let env = DispatchEnv {
                    pool,
                    bus,
                    run_id: &run.id,
                    run_depth: run.depth,
                    secrets: secret_map.as_ref(),
                    trigger: &trigger,
                    node_outputs: &node_outputs,
                };
                executor::dispatch_ready_node(&env, &node, result.retry_count + 1).await?;
            }
            return Ok(());
        }
    }

    let event_type = if success { EventType::NodeCompleted } else { EventType::NodeFailed };
    let payload = if success {
        json!({"output": result.body, "statusCode": result.status_code, "durationMs": result.duration_ms})
    } else {
        json!({
            "error": result.body,
            "statusCode": result.status_code,
            "durationMs": result.duration_ms,
            "cancelled": cancelled,
        })
    };
    let applied =
        eventlog::append_node_event_once(pool, &run.id, &node.id, event_type, result.retry_count as i64, &payload)
            .await?;
    if applied.is_none() {
        return Ok(());
    }

    advance_ready(pool, bus, secrets, &run, &graph).await?;

    let terminal = lifecycle::finalize_if_terminal(pool, &run).await?;
    if terminal.is_some() && run.parent_run_id.is_some() {
        let finished = WorkflowRunRepository::get_by_id(pool, &run.id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("run {} not found", run.id)))?;
        mapflow::on_child_run_terminal(pool, bus, locks, &finished).await?;
    }

    Ok(())
}

/// Converts a bridged control job into the synthetic result it
/// represents and calls [`advance`] on it, same as a real worker result.
async fn apply_control_job(
    pool: &DatabasePool,
    bus: &dyn Bus,
    locks: &LockRegistry,
    secrets: &SecretStore,
    item: &crate::model::WorkItem,
) -> Result<()> {
    let status_code = item
        .node
        .data
        .get("statusCode")
        .and_then(Value::as_u64)
        .unwrap_or(200) as u16;
    let body = match item.node.job_type {
        BusJobType::Webhookresume => item.node.data.get("payload").cloned().unwrap_or(Value::Null),
        _ => item.node.data.get("body").cloned().unwrap_or(Value::Null),
    };
    let message = NodeResultMessage {
        node_id: item.id.clone(),
        run_id: item.run_id.clone(),
        status_code,
        body,
        timestamp: chrono::Utc::now(),
        duration_ms: None,
        isolated: None,
        retry_count: 0,
    };
    advance(pool, bus, locks, secrets, &message).await
}

/// Background loop: drains the `jobs` stream, bridges
/// `SubFlowResume`/`MapChildComplete`/`WebhookResume` items into
/// `advance` calls, and drops everything else (those go to real
/// workers, not this process).
pub async fn control_job_loop(
    pool: DatabasePool,
    bus: Arc<dyn Bus>,
    locks: Arc<LockRegistry>,
    secrets: Arc<SecretStore>,
) -> Result<()> {
    let mut last_id = "0".to_string();
    loop {
        let entries = bus.read_jobs(&last_id, 5_000).await?;
        for entry in entries {
            last_id = entry.id;
            if matches!(
                entry.payload.node.job_type,
                BusJobType::Subflowresume | BusJobType::Mapchildcomplete | BusJobType::Webhookresume
            ) {
                apply_control_job(&pool, bus.as_ref(), &locks, &secrets, &entry.payload).await?;
            }
        }
    }
}

/// Background loop: drains the `results` stream and calls [`advance`] for
/// every real worker result.
pub async fn consume_results_loop(
    pool: DatabasePool,
    bus: Arc<dyn Bus>,
    locks: Arc<LockRegistry>,
    secrets: Arc<SecretStore>,
) -> Result<()> {
    let mut last_id = "0".to_string();
    loop {
        let entries = bus.read_results(&last_id, 5_000).await?;
        for entry in entries {
            last_id = entry.id;
            advance(&pool, bus.as_ref(), &locks, &secrets, &entry.payload).await?;
        }
    }
}
