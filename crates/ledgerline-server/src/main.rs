//! Ledgerline Server - Main entry point

use anyhow::{Context, Result};
use ledgerline_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tracing::info;

use ledgerline_server::{
    api::{self, AppState},
    attribution, db,
    config::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("ledgerline-server")
        .filter_directives("ledgerline_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_logging(&log_config)?;

    info!("Starting Ledgerline Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Without working task-local propagation every mutation would go unattributed.
    attribution::verify_propagation()
        .await
        .context("Attribution context propagation is unavailable")?;
    info!(
        session_variable = %config.audit.session_variable,
        trust_user_header = config.audit.trust_user_header,
        "Attribution verified"
    );

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let state = AppState::new(pool, &config);
    let app = api::create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, then gives in-flight requests a grace period
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(e) => {
                tracing::error!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending().await
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            },
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending().await
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    };

    let grace = Duration::from_secs(timeout_secs.min(5));
    info!(signal = received, grace_secs = grace.as_secs(), "Shutting down");
    tokio::time::sleep(grace).await;
}
