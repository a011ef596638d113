use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use security_service::config::SecurityConfig;
use security_service::services::notification::{HttpNotifier, Notifier};
use security_service::services::otp_cache::OtpCacheStore;
use security_service::services::persistence::{MongoStore, PersistenceStore};
use security_service::services::scoring::{AnomalyScorer, HttpScorer, NoopScorer};
use security_service::{build_router, AppState};

const FALLBACK_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = SecurityConfig::from_env()?;
    init_tracing("security-service", &config.log_level, &config.otlp_endpoint);

    let store: Arc<dyn PersistenceStore> = Arc::new(MongoStore::connect(&config.mongo).await?);
    let cache = Arc::new(OtpCacheStore::connect(&config.redis.url).await);
    cache.spawn_sweeper(FALLBACK_SWEEP_PERIOD);

    let notifier: Arc<dyn Notifier> = Arc::new(HttpNotifier::new(&config.notifier)?);
    let scorer: Arc<dyn AnomalyScorer> = if config.scoring.endpoint.is_empty() {
        tracing::info!("no anomaly scorer configured, using local heuristics only");
        Arc::new(NoopScorer)
    } else {
        Arc::new(HttpScorer::new(&config.scoring)?)
    };

    let port = config.port;
    let state = AppState::build(config, store, cache, notifier, scorer);
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "security-service listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining connections");
}
