//! Health check endpoint handlers.

use axum::extract::State;

use crate::api::{
    models::{DatabaseHealth, DetailedHealthResponse, HealthResponse},
    response,
    routes::AppState,
};

/// `GET /health`: liveness only, no database round-trip.
pub async fn health() -> impl axum::response::IntoResponse {
    response::ok(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/v1/system/health`: readiness, including a DB ping and pool
/// occupancy (§6.3).
pub async fn health_detailed(State(app_state): State<AppState>) -> impl axum::response::IntoResponse {
    let healthy = app_state.db.health_check().await.is_ok();
    let stats = app_state.db.get_pool_statistics();

    let body = DetailedHealthResponse {
        status: if healthy { "ok".to_string() } else { "degraded".to_string() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: DatabaseHealth {
            healthy,
            pool_size: stats.max_connections,
            idle_connections: stats.idle_connections,
        },
    };
    response::ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::create_test_app_state;

    #[tokio::test]
    async fn detailed_health_reports_connected_pool() {
        let state = create_test_app_state().await;
        let _ = health_detailed(State(state)).await;
    }
}
