//! Control-plane orchestration core for the flowctl workflow execution system.
//!
//! Users author directed graphs of nodes (HTTP calls, sandboxed code, delays,
//! routers, LLM calls, webhook waits, sub-flows, and parallel map operations)
//! in a visual editor. This crate schedules those nodes onto a pool of
//! stateless external workers via a durable message bus, advances each run as
//! node results arrive, persists an append-only event log for durability and
//! replay, and streams live progress to browsers.
//!
//! Node execution itself, the graph editor, and authentication of HTTP
//! callers are external collaborators — only their interfaces are modeled
//! here.

pub mod api;
pub mod bus;
pub mod config;
pub mod db;
pub mod eventlog;
pub mod executor;
pub mod interpolate;
pub mod jobbuilder;
pub mod lifecycle;
pub mod locks;
pub mod mapflow;
pub mod model;
pub mod orchestrator;
pub mod router;
pub mod secrets;
pub mod suspend;
pub mod sweeper;
pub mod trigger;
pub mod versions;
pub mod workers;

use thiserror::Error;

/// Errors surfaced by the orchestration core.
///
/// Variants correspond to the error kinds of the control-plane error model:
/// validation and authorization failures are synchronous and caller-visible;
/// rate limiting is synchronous but throttling rather than rejecting;
/// execution failures are per-node and recorded as `NODE_FAILED`;
/// orchestration failures cover internal invariants (recursion limits,
/// missing versions); infrastructure failures are DB/bus outages retried
/// with backoff before a run is failed with `reason=system`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Missing required fields, invalid cron expressions, malformed JSON input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Webhook disabled, missing/invalid signature, revoked share link.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Webhook or share-link throttled.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Node body threw or returned non-2xx; recorded as `NODE_FAILED`.
    #[error("execution error: {0}")]
    Execution(String),

    /// Recursion limit exceeded, missing version, or any other orchestration
    /// invariant violation.
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// Database or bus outage.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// Requested entity does not exist. Not one of the spec's six error
    /// kinds by name, but every `GET`/`PATCH`/`DELETE` by id needs a way to
    /// say so; mapped to a 404 at the HTTP boundary.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OrchestratorError::NotFound("row not found".to_string()),
            other => OrchestratorError::Infrastructure(format!("database error: {other}")),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for OrchestratorError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        OrchestratorError::Infrastructure(format!("migration error: {err}"))
    }
}

impl From<crate::db::error::DatabaseError> for OrchestratorError {
    fn from(err: crate::db::error::DatabaseError) -> Self {
        OrchestratorError::Infrastructure(err.to_string())
    }
}

impl From<crate::bus::BusError> for OrchestratorError {
    fn from(err: crate::bus::BusError) -> Self {
        OrchestratorError::Infrastructure(err.to_string())
    }
}

impl From<crate::config::ConfigError> for OrchestratorError {
    fn from(err: crate::config::ConfigError) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

/// Result type used throughout the orchestration core.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Hard recursion cap shared by sub-flow and map dispatch (§4.7).
pub const MAX_DEPTH: i64 = 10;

/// Get version information.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: OrchestratorError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }
}
