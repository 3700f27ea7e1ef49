use anyhow::{Context, Result};
use attendo_core::{DistanceMatcher, MonotonicClock};
use attendo_store::SqliteStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod extractor;
mod routes;
mod service;
mod worker;

use config::Config;
use extractor::RemoteExtractor;
use service::{AttendanceService, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "attendod starting");

    let config = Config::load()?;
    tracing::info!(
        bind = %config.bind_addr,
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        metric = ?config.metric,
        timeout_secs = config.tracking_timeout_secs,
        unknown = ?config.unknown_policy,
        "configuration loaded"
    );

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let store = worker::spawn_store(store)?;

    let extractor = RemoteExtractor::new(&config.extractor_url, config.extractor_timeout())?;
    tracing::info!(url = extractor.url(), "face extraction delegated to sidecar");
    let settings = Settings {
        matcher: DistanceMatcher::new(config.match_threshold, config.metric),
        unknown_policy: config.unknown_policy,
        tracking_timeout: config.tracking_timeout(),
        photo_dir: config.photo_dir.clone(),
    };
    let service = AttendanceService::start(
        settings,
        store,
        Arc::new(extractor),
        Arc::new(MonotonicClock::new()),
    )
    .await?;

    let sweeper = tokio::spawn(sweep(service.clone(), config.sweep_interval()));

    let app = routes::router(service.clone());
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "attendod ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    let status = service.shutdown().await;
    if status.pending > 0 {
        tracing::error!(pending = status.pending, "appearances left unpersisted at shutdown");
    }
    tracing::info!("attendod stopped");
    Ok(())
}

/// Periodically close intervals of sessions that stopped sending frames.
async fn sweep(service: AttendanceService, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let status = service.sweep().await;
        if let Some(error) = status.error {
            tracing::warn!(%error, pending = status.pending, "sweep could not persist");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
