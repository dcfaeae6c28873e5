//! FloorEye Camserver
//!
//! Main entry point for the Camserver application.

use flooreye::{
    monitor_loop::{MonitorDeps, MonitorHandle, MonitorLoop},
    snapshot_service::SnapshotService,
    state::{AppConfig, AppState, DatabaseConfig},
    web_api,
};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bounded wait for the monitor task at shutdown
const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

async fn connect_database(db: &DatabaseConfig, max_connections: u32) -> flooreye::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(db.connect_options()?)
        .await?;
    Ok(pool)
}

/// Spawn the monitor when enabled and its collaborators exist
fn start_monitor(state: &AppState) -> anyhow::Result<Option<MonitorHandle>> {
    if !state.config.enable_monitor {
        tracing::info!("Monitor disabled (ENABLE_MONITOR not set)");
        return Ok(None);
    }

    let Some(storage) = &state.storage else {
        tracing::error!("Monitor enabled but no storage is configured, monitor not started");
        return Ok(None);
    };

    let Some(detector) = &state.detector else {
        tracing::error!("Monitor enabled but YOLO_SERVICE_URL is not set, monitor not started");
        return Ok(None);
    };

    let frames = Arc::new(SnapshotService::new(state.config.monitor.capture_timeout)?);

    let deps = MonitorDeps {
        cameras: storage.registry.clone(),
        recipients: storage.registry.clone(),
        frames,
        detector: detector.clone(),
        events: storage.events.clone(),
        alerts: state.notifier.clone(),
    };

    let monitor = MonitorLoop::new(
        state.config.monitor.clone(),
        deps,
        state.monitor_stats.clone(),
    );

    Ok(Some(MonitorHandle::spawn(monitor)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flooreye=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FloorEye Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        database = ?config.database,
        detector_url = ?config.detector.service_url,
        conf_threshold = config.detector.threshold,
        monitor_enabled = config.enable_monitor,
        event_image_dir = ?config.event_image_dir,
        "Configuration loaded"
    );

    // Database is optional
    let pool = match &config.database {
        Some(db) => match connect_database(db, config.db_max_connections).await {
            Ok(pool) => {
                tracing::info!("Database connected");
                Some(pool)
            }
            Err(e) => {
                tracing::error!(error = %e, "Database connection failed, running without storage");
                None
            }
        },
        None => {
            tracing::warn!("No database configured, registry, history and monitor are disabled");
            None
        }
    };

    let state = AppState::new(config, pool)?;
    match &state.detector {
        Some(detector) => tracing::info!(url = %detector.url(), "Detector configured"),
        None => tracing::warn!("YOLO_SERVICE_URL not set, detection endpoints and monitor disabled"),
    }
    tracing::info!(
        email_transports = ?state.notifier.chain_names(),
        whatsapp = state.notifier.whatsapp_configured(),
        "Notifier initialized"
    );

    match SnapshotService::check_ffmpeg().await {
        Ok(version) => tracing::info!(version = %version, "ffmpeg available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg not available, stream capture will fail"),
    }

    let monitor = start_monitor(&state)?;

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = monitor {
        if handle.shutdown(MONITOR_JOIN_TIMEOUT).await {
            tracing::info!("Monitor stopped");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
