//! Orchestrator server binary.
//!
//! Wires the HTTP surface (§6.2) to the background loops that actually
//! advance runs: the results/control-job consumers (C5), the scheduled-job
//! mover, suspension sweeper, cron scheduler, and retention sweeper (C8,
//! C9, §5). Everything here is plumbing — the logic lives in the library.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flowctl_orchestrator::api::routes::{create_router, AppState};
use flowctl_orchestrator::bus::{Bus, InProcessBus, RedisBus};
use flowctl_orchestrator::config::ServerConfig;
use flowctl_orchestrator::db::DatabaseConnection;
use flowctl_orchestrator::locks::LockRegistry;
use flowctl_orchestrator::secrets::SecretStore;
use flowctl_orchestrator::sweeper::{
    cron_scheduler_loop, retention_sweeper_loop, scheduled_job_mover_loop, suspension_sweeper_loop,
    DEFAULT_RETENTION_DAYS,
};
use flowctl_orchestrator::trigger::TriggerRateLimiters;
use flowctl_orchestrator::orchestrator::{consume_results_loop, control_job_loop};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    tracing::info!("loading server configuration");
    let config = ServerConfig::load()?;
    tracing::info!(
        database = %config.database_url(),
        bus = %config.bus.redis_url,
        "configuration loaded"
    );

    let db = DatabaseConnection::with_max_connections(&config.database_url(), config.database.pool_size)
        .await?;
    tracing::info!("running database migrations");
    db.run_migrations().await?;
    db.health_check().await?;

    let pool = db.pool().clone();

    let bus: Arc<dyn Bus> = if config.bus.redis_url == "memory" {
        tracing::warn!("REDIS_URL=memory — using the in-process bus, not durable across restarts");
        Arc::new(InProcessBus::new())
    } else {
        Arc::new(RedisBus::connect(&config.bus.redis_url).await?)
    };

    let secrets = Arc::new(SecretStore::new(pool.clone()));
    let limiters = Arc::new(TriggerRateLimiters::new());
    let locks = Arc::new(LockRegistry::new());

    // Background loops driving run advancement and suspension resolution
    // (C5, C8, C9, §5). Each is a tight tick-and-log loop; one bad tick
    // never kills the process, and an unrecoverable bus error just
    // restarts its own loop rather than the whole server.
    spawn_restarting("results-consumer", {
        let pool = pool.clone();
        let bus = bus.clone();
        let locks = locks.clone();
        let secrets = secrets.clone();
        move || consume_results_loop(pool.clone(), bus.clone(), locks.clone(), secrets.clone())
    });
    spawn_restarting("control-job-consumer", {
        let pool = pool.clone();
        let bus = bus.clone();
        let locks = locks.clone();
        let secrets = secrets.clone();
        move || control_job_loop(pool.clone(), bus.clone(), locks.clone(), secrets.clone())
    });

    tokio::spawn(scheduled_job_mover_loop(pool.clone(), bus.clone(), Duration::from_secs(1)));
    tokio::spawn(suspension_sweeper_loop(pool.clone(), Duration::from_secs(5)));
    tokio::spawn(cron_scheduler_loop(
        pool.clone(),
        bus.clone(),
        secrets.clone(),
        Duration::from_secs(30),
    ));
    tokio::spawn(retention_sweeper_loop(
        pool.clone(),
        Duration::from_secs(3600),
        DEFAULT_RETENTION_DAYS,
    ));

    let app_state = AppState {
        db,
        pool,
        bus,
        secrets,
        limiters,
    };
    let app = create_router(app_state);

    let port: u16 = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string()).parse()?;
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    tracing::info!(%addr, "starting orchestrator server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("orchestrator server shut down gracefully");
    Ok(())
}

/// Restarts a fallible background loop on error rather than letting one
/// bus hiccup take the whole process down with it.
fn spawn_restarting<F, Fut>(name: &'static str, mut make_loop: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = flowctl_orchestrator::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if let Err(e) = make_loop().await {
                tracing::error!(loop_name = name, error = %e, "background loop failed, restarting");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received CTRL-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
