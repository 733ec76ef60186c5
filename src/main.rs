use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aqi_alert_service::{
    alerts::{AlertEngine, Dispatcher},
    api::{self, AppState},
    config::Config,
    db,
    history::HistoryRecorder,
    notify::Transports,
    pipeline::Pipeline,
    scheduler::ScanScheduler,
    source::WaqiClient,
    store::PgStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; env vars may be set externally
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url, config.scan_concurrency).await?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    let store = Arc::new(PgStore::new(pool));
    let source = Arc::new(WaqiClient::new(&config)?);
    let transports = Transports::from_config(&config)?;

    // Spawn the scan loop
    {
        let dispatcher = Dispatcher::new(
            transports,
            store.clone(),
            Duration::from_secs(config.delivery_timeout_secs),
        );
        let pipeline = Pipeline::new(
            source,
            HistoryRecorder::new(store.clone()),
            AlertEngine::new(config.change_alerts, config.suppression),
            dispatcher,
            store.clone(),
            store.clone(),
            Duration::from_secs(config.fetch_timeout_secs),
        );
        let scheduler = ScanScheduler::new(
            Arc::new(pipeline),
            store.clone(),
            config.scan_interval_secs,
            config.scan_concurrency,
        );
        tokio::spawn(Arc::new(scheduler).run());
    }

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    let state = AppState {
        directory: store.clone(),
        history: store.clone(),
        alerts: store,
    };
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
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

    info!("Shutdown signal received");
}
