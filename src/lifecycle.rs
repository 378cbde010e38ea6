//! Run Lifecycle Manager (§4.4, C4): creates runs, starts them, detects
//! terminal states, and aggregates outputs.

use std::collections::HashMap;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::bus::Bus;
use crate::db::connection::DatabasePool;
use crate::db::models::WorkflowRunRow;
use crate::db::repositories::WorkflowRunRepository;
use crate::eventlog;
use crate::executor::{dispatch_ready_node, DispatchEnv};
use crate::model::{EventType, Graph, RunStatus, TriggerKind};
use crate::secrets::SecretStore;
use crate::{OrchestratorError, Result};

/// Creates a new run row plus its `RUN_CREATED` event. Does not start it —
/// callers call [`start`] once the caller-visible id is known (e.g. after
/// returning it in an API response) or immediately, depending on trigger.
#[allow(clippy::too_many_arguments)]
pub async fn create(
    pool: &DatabasePool,
    run_id: &str,
    workflow_id: Option<&str>,
    workflow_version_id: Option<&str>,
    graph: &Graph,
    trigger: TriggerKind,
    input_data: &Value,
    parent_run_id: Option<&str>,
    parent_node_id: Option<&str>,
    depth: i64,
) -> Result<WorkflowRunRow> {
    if depth > crate::MAX_DEPTH {
        return Err(OrchestratorError::Orchestration(format!(
            "recursion limit exceeded: depth {depth} > {}",
            crate::MAX_DEPTH
        )));
    }
    let snapshot = serde_json::to_string(graph)?;
    let run = WorkflowRunRepository::create(
        pool,
        run_id,
        workflow_id,
        workflow_version_id,
        &snapshot,
        trigger.as_str(),
        &input_data.to_string(),
        parent_run_id,
        parent_node_id,
        depth,
    )
    .await?;

    eventlog::append_run_event(pool, run_id, EventType::RunCreated, &json!({"trigger": trigger.as_str()}))
        .await?;
    Ok(run)
}

/// Transitions `pending -> running`, writes `RUN_STARTED(rootNodes)`, and
/// dispatches each root (§4.4 Start). `start_from_node`, when set,
/// restricts dispatch to that node and everything downstream of it
/// (`POST /triggers/manual`'s `startFromNode`).
pub async fn start(
    pool: &DatabasePool,
    bus: &dyn Bus,
    secrets: &SecretStore,
    run: &WorkflowRunRow,
    graph: &Graph,
    start_from_node: Option<&str>,
) -> Result<Vec<String>> {
    let roots: Vec<&crate::model::Node> = match start_from_node {
        Some(start_id) => {
            let downstream = graph.downstream_of(start_id);
            graph
                .nodes
                .iter()
                .filter(|n| downstream.contains(&n.id))
                .filter(|n| graph.incoming_edges(&n.id).iter().all(|e| !downstream.contains(&e.source)))
                .collect()
        }
        None => graph.root_nodes(),
    };
    let root_ids: Vec<String> = roots.iter().map(|n| n.id.clone()).collect();

    WorkflowRunRepository::mark_running(pool, &run.id).await?;
    eventlog::append_run_event(
        pool,
        &run.id,
        EventType::RunStarted,
        &json!({"rootNodes": root_ids}),
    )
    .await?;

    let input_data: Value = serde_json::from_str(&run.input_data).unwrap_or(Value::Null);
    let secret_map = secrets.all().await?;
    let node_outputs: HashMap<String, Value> = HashMap::new();
    let env = DispatchEnv {
        pool,
        bus,
        run_id: &run.id,
        run_depth: run.depth,
        secrets: secret_map.as_ref(),
        trigger: &input_data,
        node_outputs: &node_outputs,
    };

    let mut scheduled = Vec::new();
    for node in roots {
        if dispatch_ready_node(&env, node, 0).await? {
            scheduled.push(node.id.clone());
        }
    }
    Ok(scheduled)
}

/// Convenience: [`create`] immediately followed by [`start`], used by
/// manual/webhook/cron triggers and sub-flow/map child dispatch.
#[allow(clippy::too_many_arguments)]
pub async fn create_and_start(
    pool: &DatabasePool,
    bus: &dyn Bus,
    secrets: &SecretStore,
    run_id: &str,
    workflow_id: Option<&str>,
    workflow_version_id: Option<&str>,
    graph: &Graph,
    trigger: TriggerKind,
    input_data: &Value,
    parent_run_id: Option<&str>,
    parent_node_id: Option<&str>,
    depth: i64,
    start_from_node: Option<&str>,
) -> Result<(WorkflowRunRow, Vec<String>)> {
    let run = create(
        pool, run_id, workflow_id, workflow_version_id, graph, trigger, input_data,
        parent_run_id, parent_node_id, depth,
    )
    .await?;
    let scheduled = start(pool, bus, secrets, &run, graph, start_from_node).await?;
    Ok((run, scheduled))
}

/// Parses a run's `snapshot_graph` column.
pub fn parse_snapshot(run: &WorkflowRunRow) -> Result<Graph> {
    serde_json::from_str(&run.snapshot_graph)
        .map_err(|e| OrchestratorError::Infrastructure(format!("corrupt snapshot_graph: {e}")))
}

/// Whether every node in `graph` is either completed or failed (§4.4
/// Terminal detection, §8 invariant 1).
pub fn is_fully_done(graph: &Graph, completed: &std::collections::HashSet<String>, failed: &std::collections::HashSet<String>) -> bool {
    graph.node_ids().iter().all(|id| completed.contains(id) || failed.contains(id))
}

/// Assembles the run's `output_data` from leaf node outputs (§4.4): one
/// leaf -> that output directly; multiple leaves -> `{nodeId: output}`.
pub fn assemble_output(graph: &Graph, node_outputs: &HashMap<String, Value>) -> Value {
    let leaves = graph.leaf_nodes();
    if leaves.len() == 1 {
        node_outputs.get(&leaves[0].id).cloned().unwrap_or(Value::Null)
    } else {
        let mut map = serde_json::Map::new();
        for leaf in leaves {
            map.insert(leaf.id.clone(), node_outputs.get(&leaf.id).cloned().unwrap_or(Value::Null));
        }
        Value::Object(map)
    }
}

/// Checks whether `graph`'s done-set covers all nodes and, if so, writes
/// `RUN_COMPLETED`/`RUN_FAILED` with the assembled output and updates the
/// run row. Returns the terminal status if the run became terminal this
/// call, `None` if there's still work outstanding.
pub async fn finalize_if_terminal(
    pool: &DatabasePool,
    run: &WorkflowRunRow,
) -> Result<Option<RunStatus>> {
    let graph = parse_snapshot(run)?;
    let completed = eventlog::completed_node_ids(pool, &run.id).await?;
    let failed = eventlog::failed_node_ids(pool, &run.id).await?;

    if !is_fully_done(&graph, &completed, &failed) {
        return Ok(None);
    }

    let node_outputs = eventlog::node_outputs(pool, &run.id).await?;
    let status = if failed.is_empty() { RunStatus::Completed } else { RunStatus::Failed };
    let output = assemble_output(&graph, &node_outputs);

    WorkflowRunRepository::mark_terminal(
        pool,
        &run.id,
        status.as_str(),
        Some(&output.to_string()),
    )
    .await?;

    let event_type = if status == RunStatus::Completed { EventType::RunCompleted } else { EventType::RunFailed };
    eventlog::append_run_event(pool, &run.id, event_type, &output).await?;

    Ok(Some(status))
}

/// Cancellation (§4.4, §5): if the run is non-terminal, transition to
/// `cancelled`, write `RUN_CANCELLED`, and publish a cancel signal so
/// workers can abort in-flight operations. Returns `false` if the run was
/// already terminal (a no-op).
pub async fn cancel(pool: &DatabasePool, bus: &dyn Bus, run_id: &str) -> Result<bool> {
    let run = WorkflowRunRepository::get_by_id(pool, run_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("run {run_id} not found")))?;
    if run.is_terminal() {
        return Ok(false);
    }
    WorkflowRunRepository::mark_terminal(pool, run_id, RunStatus::Cancelled.as_str(), None).await?;
    eventlog::append_run_event(pool, run_id, EventType::RunCancelled, &json!({})).await?;
    bus.publish_cancel(run_id).await?;
    Ok(true)
}

/// Replay (§6.2 `POST /runs/{runId}/replay`, §8 "Replay determinism"): a
/// fresh top-level run from `run_id`'s own snapshot graph, trigger kind,
/// and input data. Not a resume — a brand new run id and event history,
/// so the original stays queryable exactly as it finished.
pub async fn replay(
    pool: &DatabasePool,
    bus: &dyn Bus,
    secrets: &SecretStore,
    run_id: &str,
) -> Result<(WorkflowRunRow, Vec<String>)> {
    let source = WorkflowRunRepository::get_by_id(pool, run_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("run {run_id} not found")))?;
    let graph = parse_snapshot(&source)?;
    let trigger: TriggerKind = source.trigger.parse()?;
    let input_data: Value = serde_json::from_str(&source.input_data).unwrap_or(Value::Null);

    create_and_start(
        pool,
        bus,
        secrets,
        &new_id(),
        source.workflow_id.as_deref(),
        source.workflow_version_id.as_deref(),
        &graph,
        trigger,
        &input_data,
        None,
        None,
        0,
        None,
    )
    .await
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::model::{Edge, Node, NodeType};

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

    fn linear_graph() -> Graph {
        Graph {
            nodes: vec![
                Node { id: "A".into(), node_type: NodeType::Delay, data: json!({"durationMs": 0}) },
                Node { id: "B".into(), node_type: NodeType::Delay, data: json!({"durationMs": 0}) },
            ],
            edges: vec![Edge { source: "A".into(), target: "B".into(), source_handle: None }],
            viewport: None,
        }
    }

    #[tokio::test]
    async fn create_and_start_dispatches_root_only() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = SecretStore::new(pool.clone());
        let graph = linear_graph();

        let (run, scheduled) = create_and_start(
            &pool, &bus, &secrets, "run-1", Some("wf-1"), None, &graph,
            TriggerKind::Manual, &json!({}), None, None, 0, None,
        )
        .await
        .unwrap();

        assert_eq!(run.status, "running");
        assert_eq!(scheduled, vec!["A"]);
    }

    #[tokio::test]
    async fn terminal_detection_requires_all_nodes_done() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = SecretStore::new(pool.clone());
        let graph = linear_graph();

        let (run, _) = create_and_start(
            &pool, &bus, &secrets, "run-1", Some("wf-1"), None, &graph,
            TriggerKind::Manual, &json!({}), None, None, 0, None,
        )
        .await
        .unwrap();

        eventlog::append_node_event(&pool, &run.id, "A", EventType::NodeCompleted, 0, &json!({"output": 1}))
            .await
            .unwrap();
        let still_running = finalize_if_terminal(&pool, &run).await.unwrap();
        assert!(still_running.is_none());

        eventlog::append_node_event(&pool, &run.id, "B", EventType::NodeCompleted, 0, &json!({"output": 2}))
            .await
            .unwrap();
        let terminal = finalize_if_terminal(&pool, &run).await.unwrap();
        assert_eq!(terminal, Some(RunStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let pool = setup_db().await;
        let bus = InProcessBus::new();
        let secrets = SecretStore::new(pool.clone());
        let graph = linear_graph();
        let (run, _) = create_and_start(
            &pool, &bus, &secrets, "run-1", Some("wf-1"), None, &graph,
            TriggerKind::Manual, &json!({}), None, None, 0, None,
        )
        .await
        .unwrap();

        assert!(cancel(&pool, &bus, &run.id).await.unwrap());
        assert!(!cancel(&pool, &bus, &run.id).await.unwrap());
    }
}
