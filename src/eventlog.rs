//! Event log (§4.3, C3): the sole source of truth for run state.
//!
//! A thin, typed layer over [`crate::db::repositories::RunEventRepository`]
//! that speaks in [`EventType`]/[`Node`] terms instead of raw strings, and
//! folds the append-only log into the derived views the Orchestrator and
//! Run Lifecycle Manager need (`node_outputs`, "already scheduled" sets).
//! Never updates or deletes a row — every method here either appends or
//! reads.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::db::connection::DatabasePool;
use crate::db::models::RunEventRow;
use crate::db::repositories::RunEventRepository;
use crate::model::EventType;
use crate::{OrchestratorError, Result};

/// Appends a run-scoped (no node) event, e.g. `RUN_CREATED`, `RUN_STARTED`.
pub async fn append_run_event(
    pool: &DatabasePool,
    run_id: &str,
    event_type: EventType,
    payload: &Value,
) -> Result<RunEventRow> {
    let row = RunEventRepository::append(
        pool,
        run_id,
        None,
        event_type.as_str(),
        None,
        &payload.to_string(),
    )
    .await?;
    Ok(row)
}

/// Appends a node-attempt event, idempotent on
/// `(run_id, node_id, retry_count, event_type)`. A duplicate insert
/// surfaces as a constraint-violation error the caller treats as
/// "already applied" rather than a hard failure — callers that care
/// should check [`find_attempt`] first when idempotency must be silent.
pub async fn append_node_event(
    pool: &DatabasePool,
    run_id: &str,
    node_id: &str,
    event_type: EventType,
    retry_count: i64,
    payload: &Value,
) -> Result<RunEventRow> {
    let row = RunEventRepository::append(
        pool,
        run_id,
        Some(node_id),
        event_type.as_str(),
        Some(retry_count),
        &payload.to_string(),
    )
    .await?;
    Ok(row)
}

/// Appends a node event only if it hasn't already been recorded for this
/// `retry_count`. Used for `NODE_SCHEDULED` at the top of dispatch, where a
/// concurrent re-delivery must not double-schedule (§4.3, §8 invariant 2).
pub async fn append_node_event_once(
    pool: &DatabasePool,
    run_id: &str,
    node_id: &str,
    event_type: EventType,
    retry_count: i64,
    payload: &Value,
) -> Result<Option<RunEventRow>> {
    let existing = RunEventRepository::find_attempt(
        pool,
        run_id,
        node_id,
        retry_count,
        event_type.as_str(),
    )
    .await?;
    if existing.is_some() {
        return Ok(None);
    }
    Ok(Some(
        append_node_event(pool, run_id, node_id, event_type, retry_count, payload).await?,
    ))
}

/// Folds `NODE_COMPLETED` events into a `node_id -> output` map (§4.5 step
/// 3). Later events for the same node (a completed retry after an earlier
/// failed attempt) overwrite earlier ones; node ids are unique per run.
pub async fn node_outputs(pool: &DatabasePool, run_id: &str) -> Result<HashMap<String, Value>> {
    let rows = RunEventRepository::list_for_run_by_types(
        pool,
        run_id,
        &[EventType::NodeCompleted.as_str()],
    )
    .await?;
    let mut outputs = HashMap::new();
    for row in rows {
        let Some(node_id) = row.node_id.clone() else { continue };
        let payload: Value = serde_json::from_str(&row.payload).unwrap_or(Value::Null);
        let output = payload.get("output").cloned().unwrap_or(payload);
        outputs.insert(node_id, output);
    }
    Ok(outputs)
}

/// Node ids with a `NODE_COMPLETED` event.
pub async fn completed_node_ids(pool: &DatabasePool, run_id: &str) -> Result<HashSet<String>> {
    let rows = RunEventRepository::list_for_run_by_types(
        pool,
        run_id,
        &[EventType::NodeCompleted.as_str()],
    )
    .await?;
    Ok(rows.into_iter().filter_map(|r| r.node_id).collect())
}

/// Node ids with a `NODE_FAILED` event and no later retry in flight, i.e.
/// the node's failure is the last recorded attempt outcome.
pub async fn failed_node_ids(pool: &DatabasePool, run_id: &str) -> Result<HashSet<String>> {
    let rows =
        RunEventRepository::list_for_run_by_types(pool, run_id, &[EventType::NodeFailed.as_str()])
            .await?;
    Ok(rows.into_iter().filter_map(|r| r.node_id).collect())
}

/// Node ids currently in flight: scheduled, started, or suspended, and not
/// yet completed or failed. The Orchestrator uses this to avoid
/// re-dispatching a node that is already being worked (§4.3, §4.5 step 5).
pub async fn in_flight_node_ids(pool: &DatabasePool, run_id: &str) -> Result<HashSet<String>> {
    let pending = RunEventRepository::list_for_run_by_types(
        pool,
        run_id,
        &[
            EventType::NodeScheduled.as_str(),
            EventType::NodeStarted.as_str(),
            EventType::NodeSuspended.as_str(),
        ],
    )
    .await?;
    let done = {
        let mut done = completed_node_ids(pool, run_id).await?;
        done.extend(failed_node_ids(pool, run_id).await?);
        done
    };
    Ok(pending
        .into_iter()
        .filter_map(|r| r.node_id)
        .filter(|id| !done.contains(id))
        .collect())
}

/// All events for a run, in append order — used by `GET /runs/{runId}`.
pub async fn list_for_run(pool: &DatabasePool, run_id: &str) -> Result<Vec<RunEventRow>> {
    Ok(RunEventRepository::list_for_run(pool, run_id).await?)
}

/// Parses a row's `event_type` column back into [`EventType`]; a row with
/// an unrecognized event type indicates data corruption, not a recoverable
/// condition.
pub fn parse_event_type(row: &RunEventRow) -> Result<EventType> {
    row.event_type
        .parse()
        .map_err(|_| OrchestratorError::Infrastructure(format!("unknown event type: {}", row.event_type)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::WorkflowRunRepository;
    use serde_json::json;

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
    async fn folds_node_outputs() {
        let pool = setup_db().await;
        append_node_event(
            &pool, "run-1", "A", EventType::NodeCompleted, 0,
            &json!({"output": {"userId": 1}}),
        )
        .await
        .unwrap();

        let outputs = node_outputs(&pool, "run-1").await.unwrap();
        assert_eq!(outputs["A"]["userId"], 1);
    }

    #[tokio::test]
    async fn once_is_idempotent() {
        let pool = setup_db().await;
        let first = append_node_event_once(
            &pool, "run-1", "A", EventType::NodeScheduled, 0, &json!({}),
        )
        .await
        .unwrap();
        assert!(first.is_some());

        let second = append_node_event_once(
            &pool, "run-1", "A", EventType::NodeScheduled, 0, &json!({}),
        )
        .await
        .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn in_flight_excludes_completed() {
        let pool = setup_db().await;
        append_node_event(&pool, "run-1", "A", EventType::NodeScheduled, 0, &json!({}))
            .await
            .unwrap();
        append_node_event(&pool, "run-1", "B", EventType::NodeScheduled, 0, &json!({}))
            .await
            .unwrap();
        append_node_event(
            &pool, "run-1", "A", EventType::NodeCompleted, 0, &json!({"output": 1}),
        )
        .await
        .unwrap();

        let in_flight = in_flight_node_ids(&pool, "run-1").await.unwrap();
        assert!(!in_flight.contains("A"));
        assert!(in_flight.contains("B"));
    }
}
