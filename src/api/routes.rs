//! API route definitions (§6.2).

use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::bus::Bus;
use crate::db::connection::DatabasePool;
use crate::db::DatabaseConnection;
use crate::secrets::SecretStore;
use crate::trigger::TriggerRateLimiters;

use crate::api::{handlers, middleware::{cors_layer, logging_layer}};

/// Shared application state threaded through every handler. `db` carries
/// the health-check/pool-statistics wrapper the teacher already built;
/// `pool` is the bare `DatabasePool` the domain modules (`trigger`,
/// `lifecycle`, `versions`, ...) take directly.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub pool: DatabasePool,
    pub bus: Arc<dyn Bus>,
    pub secrets: Arc<SecretStore>,
    pub limiters: Arc<TriggerRateLimiters>,
}

/// Build the complete API router (§6.2).
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/api/v1/system/health", get(handlers::health_detailed))
        // Trigger intake (C9)
        .route("/triggers/manual", post(handlers::trigger_manual))
        .route("/webhooks/:flow_id", post(handlers::trigger_webhook))
        .route("/webhooks/resume/:token", post(handlers::resume_webhook))
        // Runs (C1/C3/C13)
        .route("/runs", get(handlers::list_runs))
        .route("/runs/active", get(handlers::active_run))
        .route(
            "/runs/:run_id",
            get(handlers::get_run).patch(handlers::patch_run).delete(handlers::delete_run),
        )
        .route("/runs/:run_id/cancel", post(handlers::cancel_run))
        .route("/runs/:run_id/replay", post(handlers::replay_run))
        // Live stream fan-out (C10)
        .route("/stream", get(handlers::stream))
        // Worker registry (C12)
        .route("/workers", get(handlers::list_workers))
        // Version store (C11)
        .route("/flows/:workflow_id/versions", get(handlers::list_versions).post(handlers::publish_version))
        .route("/flows/:workflow_id/rollback", post(handlers::rollback_version))
        .route("/flows/:workflow_id/discard", post(handlers::discard_draft))
        .route("/flows/:workflow_id/restore", post(handlers::restore_version))
        .route("/flows/:workflow_id/schedule", patch(handlers::set_schedule))
        .layer(cors_layer())
        .layer(logging_layer())
        .with_state(app_state)
}

#[cfg(test)]
pub async fn create_test_app_state() -> AppState {
    use crate::bus::InProcessBus;

    let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
    db.run_migrations().await.unwrap();
    let pool = db.pool().clone();
    AppState {
        db,
        pool: pool.clone(),
        bus: Arc::new(InProcessBus::new()),
        secrets: Arc::new(SecretStore::new(pool)),
        limiters: Arc::new(TriggerRateLimiters::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_builds_without_panic() {
        let state = create_test_app_state().await;
        let _router = create_router(state);
    }
}
