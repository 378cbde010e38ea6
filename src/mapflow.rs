//! Map/SubFlow Coordinator (§4.7, C7): dispatches `subflow`/`map` nodes as
//! child runs instead of bus jobs, tracks their completion, and folds the
//! result back into the parent as a `NODE_COMPLETED`/`NODE_FAILED` event.
//!
//! Child completion never calls the parent directly. Instead
//! [`on_child_run_terminal`] (invoked by [`crate::orchestrator`] right
//! after [`crate::lifecycle::finalize_if_terminal`] fires on a run with a
//! `parent_run_id`) builds a `SubflowResume`/`MapChildComplete` control
//! job and enqueues it on the `jobs` stream the same way a real worker
//! result would arrive — [`crate::orchestrator::control_job_loop`] turns it
//! back into a `NodeResultMessage` so it flows through the ordinary
//! `NODE_COMPLETED` path (§4.8) rather than needing a special case in the
//! completion handler.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::bus::Bus;
use crate::db::connection::DatabasePool;
use crate::db::models::WorkflowRunRow;
use crate::db::repositories::{
    BatchRepository, SuspensionRepository, WorkflowRepository, WorkflowVersionRepository,
};
use crate::eventlog;
use crate::executor::DispatchEnv;
use crate::interpolate::{interpolate_value, InterpolationContext};
use crate::jobbuilder::control_job;
use crate::lifecycle;
use crate::locks::LockRegistry;
use crate::model::{
    BatchStats, BusJobType, EventType, Graph, Node, NodeConfig, SubflowConfig,
    SubflowExecutionContext, SuspensionType, TriggerKind,
};
use crate::secrets::SecretStore;
use crate::{OrchestratorError, Result};

/// Resolves the target graph for a `subflow`/`map` node: an explicit
/// `versionId`, or else the workflow's currently active version.
async fn resolve_target(
    pool: &DatabasePool,
    workflow_id: &str,
    version_id: Option<&str>,
) -> Result<(Graph, String)> {
    let version = match version_id {
        Some(vid) => WorkflowVersionRepository::get_by_id(pool, vid)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workflow version {vid} not found")))?,
        None => {
            let workflow = WorkflowRepository::get_by_id(pool, workflow_id)
                .await?
                .ok_or_else(|| OrchestratorError::NotFound(format!("workflow {workflow_id} not found")))?;
            let active = workflow.active_version_id.ok_or_else(|| {
                OrchestratorError::Validation(format!("workflow {workflow_id} has no published version"))
            })?;
            WorkflowVersionRepository::get_by_id(pool, &active)
                .await?
                .ok_or_else(|| OrchestratorError::NotFound(format!("workflow version {active} not found")))?
        }
    };
    let graph: Graph = serde_json::from_str(&version.graph)
        .map_err(|e| OrchestratorError::Infrastructure(format!("corrupt workflow version graph: {e}")))?;
    Ok((graph, version.id))
}

/// Navigates a dot-separated path into a JSON value (§4.7 `outputPath`).
/// A missing segment resolves to `null` rather than erroring — the spec
/// treats a bad output path as "nothing there", not a failure.
fn dot_path(value: &Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// §4.7 SubFlow dispatch: spawns the child run and suspends the parent
/// node until the child completes.
pub async fn dispatch_subflow(env: &DispatchEnv<'_>, node: &Node) -> Result<()> {
    let NodeConfig::Subflow(cfg) = NodeConfig::parse(node)? else { unreachable!() };
    let effective_limit = cfg.depth_limit.min(crate::MAX_DEPTH);
    let child_depth = env.run_depth + 1;
    if child_depth > effective_limit {
        return fail_recursion_limit(env, node, effective_limit).await;
    }

    let (graph, resolved_version_id) =
        resolve_target(env.pool, &cfg.workflow_id, cfg.version_id.as_deref()).await?;

    let ictx = InterpolationContext::new(env.secrets, env.trigger, env.node_outputs);
    let resolved_input = interpolate_value(&cfg.input, &ictx);

    spawn_subflow_child(env, node, &cfg, &graph, &resolved_version_id, &resolved_input, 0).await
}

#[allow(clippy::too_many_arguments)]
async fn spawn_subflow_child(
    env: &DispatchEnv<'_>,
    node: &Node,
    cfg: &SubflowConfig,
    graph: &Graph,
    resolved_version_id: &str,
    resolved_input: &Value,
    retry_count: u32,
) -> Result<()> {
    let child_id = lifecycle::new_id();
    let secrets = SecretStore::new(env.pool.clone());
    lifecycle::create_and_start(
        env.pool,
        env.bus,
        &secrets,
        &child_id,
        Some(&cfg.workflow_id),
        Some(resolved_version_id),
        graph,
        TriggerKind::Subflow,
        resolved_input,
        Some(env.run_id),
        Some(&node.id),
        env.run_depth + 1,
        None,
    )
    .await?;

    let context = SubflowExecutionContext {
        workflow_id: cfg.workflow_id.clone(),
        version_id: Some(resolved_version_id.to_string()),
        input: resolved_input.clone(),
        output_path: cfg.output_path.clone(),
        depth_limit: cfg.depth_limit,
        timeout_ms: cfg.timeout_ms,
        fail_on_error: cfg.fail_on_error,
        max_retries: cfg.max_retries,
        retry_count,
    };
    let context_json = serde_json::to_string(&context)?;

    SuspensionRepository::create(
        env.pool,
        &Uuid::new_v4().to_string(),
        env.run_id,
        &node.id,
        SuspensionType::Subflow.as_str(),
        None,
        None,
        &context_json,
        None,
    )
    .await?;

    eventlog::append_node_event(
        env.pool,
        env.run_id,
        &node.id,
        EventType::NodeSuspended,
        0,
        &json!({"suspensionType": "subflow", "childRunId": child_id, "retryCount": retry_count}),
    )
    .await?;

    Ok(())
}

async fn fail_recursion_limit(env: &DispatchEnv<'_>, node: &Node, effective_limit: i64) -> Result<()> {
    eventlog::append_node_event(
        env.pool,
        env.run_id,
        &node.id,
        EventType::NodeFailed,
        0,
        &json!({
            "error": format!("recursion limit exceeded: depth {} > {}", env.run_depth + 1, effective_limit),
            "code": "DEPTH_LIMIT_EXCEEDED",
        }),
    )
    .await?;
    Ok(())
}

/// §4.7 Map dispatch: builds the batch row and claims the initial wave of
/// children up to `concurrency`.
pub async fn dispatch_map(env: &DispatchEnv<'_>, node: &Node) -> Result<()> {
    let NodeConfig::Map(cfg) = NodeConfig::parse(node)? else { unreachable!() };
    let effective_limit = cfg.depth_limit.min(crate::MAX_DEPTH);
    let child_depth = env.run_depth + 1;
    if child_depth > effective_limit {
        return fail_recursion_limit(env, node, effective_limit).await;
    }

    let (graph, resolved_version_id) =
        resolve_target(env.pool, &cfg.workflow_id, cfg.version_id.as_deref()).await?;

    let ictx = InterpolationContext::new(env.secrets, env.trigger, env.node_outputs);
    let resolved = interpolate_value(&cfg.map_input_array, &ictx);
    let items: Vec<Value> = match resolved {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };

    let batch_id = Uuid::new_v4().to_string();
    let child_graph_json = serde_json::to_string(&graph)?;
    let items_json = serde_json::to_string(&items)?;
    BatchRepository::create(
        env.pool,
        &batch_id,
        env.run_id,
        &node.id,
        items.len() as i64,
        cfg.concurrency as i64,
        cfg.fail_fast,
        &child_graph_json,
        child_depth,
        &items_json,
    )
    .await?;

    eventlog::append_node_event(
        env.pool,
        env.run_id,
        &node.id,
        EventType::NodeSuspended,
        0,
        &json!({"suspensionType": "map", "batchId": batch_id, "total": items.len()}),
    )
    .await?;

    if items.is_empty() {
        return finish_batch(env.pool, env.bus, &batch_id, &node.id, env.run_id).await;
    }

    for _ in 0..cfg.concurrency.min(items.len() as u32) {
        claim_and_spawn_map_child(
            env.pool,
            env.bus,
            &batch_id,
            &cfg.workflow_id,
            &resolved_version_id,
            &graph,
            &items,
            env.run_id,
            &node.id,
            child_depth,
        )
        .await?;
    }

    Ok(())
}

/// Atomically claims the next item index and, if one was available,
/// spawns its child run. No-op (not an error) once the batch is
/// exhausted — callers loop until capacity or items run out.
#[allow(clippy::too_many_arguments)]
async fn claim_and_spawn_map_child(
    pool: &DatabasePool,
    bus: &dyn Bus,
    batch_id: &str,
    workflow_id: &str,
    resolved_version_id: &str,
    graph: &Graph,
    items: &[Value],
    parent_run_id: &str,
    map_node_id: &str,
    child_depth: i64,
) -> Result<()> {
    let Some(index) = BatchRepository::claim_next_index(pool, batch_id).await? else {
        return Ok(());
    };
    let item = items.get(index as usize).cloned().unwrap_or(Value::Null);
    let child_id = lifecycle::new_id();
    let secrets = SecretStore::new(pool.clone());

    let result = lifecycle::create_and_start(
        pool,
        bus,
        &secrets,
        &child_id,
        Some(workflow_id),
        Some(resolved_version_id),
        graph,
        TriggerKind::Map,
        &json!({"item": item, "index": index, "batchId": batch_id}),
        Some(parent_run_id),
        Some(map_node_id),
        child_depth,
        None,
    )
    .await;

    if let Err(e) = result {
        BatchRepository::record_result(pool, batch_id, index, None, false, None, Some(&e.to_string()), None)
            .await?;
    }
    Ok(())
}

/// Called by the Orchestrator after a child run becomes terminal (§4.5
/// sub-flow completion hook). Dispatches to the subflow or map handler
/// based on the child run's own trigger.
pub async fn on_child_run_terminal(
    pool: &DatabasePool,
    bus: &dyn Bus,
    locks: &LockRegistry,
    child_run: &WorkflowRunRow,
) -> Result<()> {
    if child_run.is_map_child() {
        on_map_child_terminal(pool, bus, locks, child_run).await
    } else if child_run.is_subflow_child() {
        on_subflow_child_terminal(pool, bus, child_run).await
    } else {
        Ok(())
    }
}

async fn on_map_child_terminal(
    pool: &DatabasePool,
    bus: &dyn Bus,
    locks: &LockRegistry,
    child_run: &WorkflowRunRow,
) -> Result<()> {
    let input: Value = serde_json::from_str(&child_run.input_data).unwrap_or(Value::Null);
    let batch_id = input.get("batchId").and_then(Value::as_str).map(str::to_string);
    let index = input.get("index").and_then(Value::as_i64);
    let (Some(batch_id), Some(index)) = (batch_id, index) else { return Ok(()) };
    let Some(parent_node_id) = child_run.parent_node_id.clone() else { return Ok(()) };
    let Some(parent_run_id) = child_run.parent_run_id.clone() else { return Ok(()) };

    let success = child_run.status == "completed";
    let output: Value = child_run
        .output_data
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Value::Null);

    let _guard = locks.batches.lock(&batch_id).await;
    BatchRepository::record_result(
        pool,
        &batch_id,
        index,
        Some(&child_run.id),
        success,
        if success { Some(&output.to_string()) } else { None },
        if success { None } else { Some(&output.to_string()) },
        None,
    )
    .await?;

    let batch = BatchRepository::get_by_id(pool, &batch_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("batch {batch_id} not found")))?;

    // Once fail_fast has seen a failure, stop claiming new items but let
    // in-flight children drain (§4.7: "do not dispatch further items, but
    // let in-flight children drain"). The batch only finishes once every
    // already-dispatched child has reported in, i.e. `active_count == 0`,
    // not immediately on the triggering failure.
    let dispatch_halted = batch.fail_fast && batch.failed_count > 0;

    if batch.status == "active" && !dispatch_halted && batch.has_capacity() {
        let items: Vec<Value> = serde_json::from_str(&batch.items_json).unwrap_or_default();
        let graph: Graph = serde_json::from_str(&batch.child_graph)?;
        // workflow_id/version are not stored on the batch row; recovered from
        // the parent map node's config instead of re-resolving here would
        // require the parent's snapshot, so the batch keeps its own
        // `child_graph` and dispatches children directly against it.
        let workflow_id = child_run.workflow_id.clone().unwrap_or_default();
        let version_id = child_run.workflow_version_id.clone().unwrap_or_default();
        claim_and_spawn_map_child(
            pool,
            bus,
            &batch_id,
            &workflow_id,
            &version_id,
            &graph,
            &items,
            &parent_run_id,
            &parent_node_id,
            batch.child_depth,
        )
        .await?;
    }

    let finished = batch.is_drained() || (dispatch_halted && batch.active_count == 0);
    drop(_guard);
    if finished {
        finish_batch(pool, bus, &batch_id, &parent_node_id, &parent_run_id).await?;
    }
    Ok(())
}

/// Builds the `{results, stats, route_to}` output (§4.7) and enqueues a
/// `MapChildComplete` control job targeting the parent's map node.
async fn finish_batch(
    pool: &DatabasePool,
    bus: &dyn Bus,
    batch_id: &str,
    map_node_id: &str,
    parent_run_id: &str,
) -> Result<()> {
    let batch = BatchRepository::get_by_id(pool, batch_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("batch {batch_id} not found")))?;
    if batch.status == "completed" || batch.status == "cancelled" {
        return Ok(());
    }
    BatchRepository::mark_finished(pool, batch_id, "completed").await?;

    let results = BatchRepository::list_results_ordered(pool, batch_id).await?;
    let started_at = chrono::DateTime::parse_from_rfc3339(&batch.started_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    let duration_secs = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
    let total = batch.total_items as u32;
    let completed = batch.completed_count as u32;
    let failed = batch.failed_count as u32;

    let durations: Vec<i64> = results.iter().filter_map(|r| r.duration_ms).collect();
    let avg_latency_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<i64>() as f64 / durations.len() as f64
    };
    let items_per_sec = if duration_secs > 0.0 { total as f64 / duration_secs } else { 0.0 };

    let stats = BatchStats {
        total,
        completed,
        failed,
        duration_secs,
        items_per_sec,
        avg_latency_ms,
        concurrency_used: batch.peak_active_count as u32,
    };

    let route_to = if failed == total && total > 0 || (batch.fail_fast && failed > 0) {
        "error"
    } else {
        "success"
    };

    let results_json: Vec<Value> = results
        .into_iter()
        .map(|r| {
            json!({
                "itemIndex": r.item_index,
                "childRunId": r.child_run_id,
                "success": r.success,
                "output": r.output.as_deref().and_then(|s| serde_json::from_str::<Value>(s).ok()),
                "error": r.error,
                "durationMs": r.duration_ms,
            })
        })
        .collect();

    let body = json!({
        "results": results_json,
        "stats": stats,
        "route_to": route_to,
    });

    let item = control_job(map_node_id, parent_run_id, BusJobType::Mapchildcomplete, json!({"statusCode": 200, "body": body}));
    bus.enqueue_job(&item).await?;
    Ok(())
}

async fn on_subflow_child_terminal(pool: &DatabasePool, bus: &dyn Bus, child_run: &WorkflowRunRow) -> Result<()> {
    let Some(parent_run_id) = child_run.parent_run_id.clone() else { return Ok(()) };
    let Some(parent_node_id) = child_run.parent_node_id.clone() else { return Ok(()) };

    let Some(suspension) =
        SuspensionRepository::find_open(pool, &parent_run_id, &parent_node_id, SuspensionType::Subflow.as_str())
            .await?
    else {
        return Ok(());
    };

    let mut context: SubflowExecutionContext = serde_json::from_str(&suspension.execution_context)
        .map_err(|e| OrchestratorError::Infrastructure(format!("corrupt subflow execution context: {e}")))?;

    let succeeded = child_run.status == "completed";
    let child_output: Value = child_run
        .output_data
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Value::Null);

    if !succeeded && context.retry_count < context.max_retries {
        context.retry_count += 1;
        SuspensionRepository::update_execution_context(pool, &suspension.id, &serde_json::to_string(&context)?)
            .await?;

        let (graph, resolved_version_id) =
            resolve_target(pool, &context.workflow_id, context.version_id.as_deref()).await?;
        let node = Node {
            id: parent_node_id,
            node_type: crate::model::NodeType::Subflow,
            data: Value::Null,
        };
        let cfg = SubflowConfig {
            workflow_id: context.workflow_id.clone(),
            version_id: context.version_id.clone(),
            input: context.input.clone(),
            fail_on_error: context.fail_on_error,
            depth_limit: context.depth_limit,
            timeout_ms: context.timeout_ms,
            output_path: context.output_path.clone(),
            max_retries: context.max_retries,
        };
        let env = DispatchEnv {
            pool,
            bus,
            run_id: &parent_run_id,
            run_depth: child_run.depth - 1,
            secrets: &std::collections::HashMap::new(),
            trigger: &Value::Null,
            node_outputs: &std::collections::HashMap::new(),
        };
        return spawn_subflow_child(&env, &node, &cfg, &graph, &resolved_version_id, &context.input, context.retry_count).await;
    }

    SuspensionRepository::resolve(pool, &suspension.id).await?;

    let output = if succeeded {
        match &context.output_path {
            Some(path) => dot_path(&child_output, path),
            None => child_output,
        }
    } else {
        child_output
    };
    let status_code: u16 = if succeeded || !context.fail_on_error { 200 } else { 500 };

    let item = control_job(
        &parent_node_id,
        &parent_run_id,
        BusJobType::Subflowresume,
        json!({"statusCode": status_code, "body": output}),
    );
    bus.enqueue_job(&item).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::db::repositories::WorkflowRunRepository;

    #[test]
    fn dot_path_navigates_nested_object() {
        let v = json!({"data": {"user": {"name": "ada"}}});
        assert_eq!(dot_path(&v, "data.user.name"), json!("ada"));
    }

    #[test]
    fn dot_path_missing_segment_is_null() {
        let v = json!({"data": {}});
        assert_eq!(dot_path(&v, "data.missing.deep"), Value::Null);
    }

    #[test]
    fn dot_path_empty_returns_whole_value() {
        let v = json!({"a": 1});
        assert_eq!(dot_path(&v, ""), v);
    }

    async fn setup_db() -> DatabasePool {
        let pool = sqlx::sqlite::SqlitePool::connect("sqlite::memory:").await.unwrap();
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

    fn child_run(id: &str, index: i64, status: &str, output: Value) -> WorkflowRunRow {
        WorkflowRunRow {
            id: id.to_string(),
            workflow_id: Some("wf-1".to_string()),
            workflow_version_id: Some("v1".to_string()),
            snapshot_graph: "{}".to_string(),
            status: status.to_string(),
            trigger: "map".to_string(),
            input_data: json!({"item": index, "index": index, "batchId": "batch-1"}).to_string(),
            output_data: Some(output.to_string()),
            parent_run_id: Some("run-1".to_string()),
            parent_node_id: Some("M".to_string()),
            depth: 1,
            pinned: false,
            created_at: Utc::now().to_rfc3339(),
            started_at: Some(Utc::now().to_rfc3339()),
            finished_at: Some(Utc::now().to_rfc3339()),
        }
    }

    /// §4.7: a fail_fast failure must stop further dispatch but let
    /// already-claimed children drain; the batch only finishes once the
    /// last in-flight child reports in, not on the triggering failure.
    #[tokio::test]
    async fn fail_fast_drains_in_flight_before_finishing_and_stops_new_dispatch() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let locks = LockRegistry::new();

        let items: Vec<Value> = (0..5).map(|i| json!(i)).collect();
        BatchRepository::create(
            &pool, "batch-1", "run-1", "M", items.len() as i64, 3, true, "{}", 1,
            &serde_json::to_string(&items).unwrap(),
        )
        .await
        .unwrap();

        // Initial wave: 3 children claimed up to the concurrency limit.
        for _ in 0..3 {
            BatchRepository::claim_next_index(&pool, "batch-1").await.unwrap();
        }

        // Index 0 fails first. fail_fast must not finish the batch yet
        // (two siblings are still in flight) and must not claim index 3.
        let failing = child_run("child-0", 0, "failed", json!({"error": "boom"}));
        on_map_child_terminal(&pool, &bus, &locks, &failing).await.unwrap();

        let batch = BatchRepository::get_by_id(&pool, "batch-1").await.unwrap().unwrap();
        assert_eq!(batch.status, "active", "must not finish while siblings are still in flight");
        assert_eq!(batch.current_index, 3, "must not claim further items once fail_fast has tripped");
        assert_eq!(batch.active_count, 2);

        // A sibling succeeds; still one in-flight child remains.
        let ok1 = child_run("child-1", 1, "completed", json!({"ok": true}));
        on_map_child_terminal(&pool, &bus, &locks, &ok1).await.unwrap();
        let batch = BatchRepository::get_by_id(&pool, "batch-1").await.unwrap().unwrap();
        assert_eq!(batch.status, "active");
        assert_eq!(batch.active_count, 1);

        // Last in-flight child reports in: now the batch finishes.
        let ok2 = child_run("child-2", 2, "completed", json!({"ok": true}));
        on_map_child_terminal(&pool, &bus, &locks, &ok2).await.unwrap();
        let batch = BatchRepository::get_by_id(&pool, "batch-1").await.unwrap().unwrap();
        assert_eq!(batch.status, "completed");
        assert_eq!(batch.active_count, 0);
        assert_eq!(batch.current_index, 3, "items 3 and 4 were never claimed");

        let results = BatchRepository::list_results_ordered(&pool, "batch-1").await.unwrap();
        assert_eq!(results.len(), 3, "only the dispatched items produce a result");

        assert_eq!(bus.job_count().await, 1, "exactly one MapChildComplete control job enqueued");
    }
}
