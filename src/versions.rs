//! Version Store (§4.11, C11): publish/rollback/discard/restore over a
//! workflow's draft graph and its immutable version history.
//!
//! Draft and versions are kept deliberately separate tables
//! (`workflows.draft_graph` vs `workflow_versions.graph`) so that
//! publishing is a copy, not a move — the draft keeps evolving after a
//! publish without touching what's already live.

use crate::db::connection::DatabasePool;
use crate::db::models::{WorkflowRow, WorkflowVersionRow};
use crate::db::repositories::{WorkflowRepository, WorkflowVersionRepository};
use crate::lifecycle::new_id;
use crate::{OrchestratorError, Result};

/// Snapshots the current draft as a new version and makes it active
/// (§4.11 Publish, §8 invariant 6: "its graph is byte-equal to the
/// workflow's draft at the moment of publish").
pub async fn publish(pool: &DatabasePool, workflow_id: &str) -> Result<WorkflowVersionRow> {
    let workflow = get_workflow(pool, workflow_id).await?;
    let version = WorkflowVersionRepository::create_next(
        pool,
        &new_id(),
        workflow_id,
        &workflow.draft_graph,
    )
    .await?;
    WorkflowRepository::set_active_version(pool, workflow_id, &version.id).await?;
    Ok(version)
}

/// Repoints `active_version_id` at an earlier version. Does not touch
/// the draft (§4.11 Rollback).
pub async fn rollback(
    pool: &DatabasePool,
    workflow_id: &str,
    version_id: &str,
) -> Result<WorkflowVersionRow> {
    let _workflow = get_workflow(pool, workflow_id).await?;
    let version = get_version(pool, version_id, workflow_id).await?;
    WorkflowRepository::set_active_version(pool, workflow_id, &version.id).await?;
    Ok(version)
}

/// Copies the active version's graph back into the draft, discarding
/// unpublished draft edits (§4.11 Discard).
pub async fn discard(pool: &DatabasePool, workflow_id: &str) -> Result<WorkflowRow> {
    let workflow = get_workflow(pool, workflow_id).await?;
    let active_id = workflow.active_version_id.clone().ok_or_else(|| {
        OrchestratorError::Validation(format!("workflow {workflow_id} has no published version to discard to"))
    })?;
    let version = get_version(pool, &active_id, workflow_id).await?;
    WorkflowRepository::update_draft_graph(pool, workflow_id, &version.graph).await?;
    get_workflow(pool, workflow_id).await
}

/// Copies an arbitrary version's graph into the draft without changing
/// which version is active (§4.11 Restore) — lets an author preview or
/// resume editing from any point in history.
pub async fn restore(
    pool: &DatabasePool,
    workflow_id: &str,
    version_id: &str,
) -> Result<WorkflowRow> {
    let _workflow = get_workflow(pool, workflow_id).await?;
    let version = get_version(pool, version_id, workflow_id).await?;
    WorkflowRepository::update_draft_graph(pool, workflow_id, &version.graph).await?;
    get_workflow(pool, workflow_id).await
}

/// §6.2 `POST /flows/{id}/versions` history listing, newest first.
pub async fn list_versions(pool: &DatabasePool, workflow_id: &str) -> Result<Vec<WorkflowVersionRow>> {
    let _workflow = get_workflow(pool, workflow_id).await?;
    Ok(WorkflowVersionRepository::list_for_workflow(pool, workflow_id).await?)
}

async fn get_workflow(pool: &DatabasePool, workflow_id: &str) -> Result<WorkflowRow> {
    WorkflowRepository::get_by_id(pool, workflow_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("workflow {workflow_id} not found")))
}

async fn get_version(pool: &DatabasePool, version_id: &str, workflow_id: &str) -> Result<WorkflowVersionRow> {
    let version = WorkflowVersionRepository::get_by_id(pool, version_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("workflow version {version_id} not found")))?;
    if version.workflow_id != workflow_id {
        return Err(OrchestratorError::Validation(format!(
            "version {version_id} does not belong to workflow {workflow_id}"
        )));
    }
    Ok(version)
}
