//! Silt crawl ingestion service.
//!
//! Main entry point for the Silt server. Initializes all subsystems
//! and coordinates graceful startup and shutdown.

use std::{str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use silt_api::{AppState, Config};
use silt_core::Storage;
use silt_indexer::IndexEngine;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from defaults, silt.toml, and environment
    let config = Config::load()?;

    init_tracing(&config.log_filter);

    info!("Starting Silt crawl ingestion service");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        index_worker_count = config.index_worker_count,
        "Configuration loaded"
    );

    let addr = config.parse_server_addr()?;
    let shutdown_grace = Duration::from_secs(config.shutdown_timeout_seconds);

    // Create database connection pool
    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    // Run database migrations
    silt_core::run_migrations(&db_pool).await.context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let storage = Arc::new(Storage::new(db_pool.clone()));

    // Start the outbox hand-off engine
    let mut engine = IndexEngine::new(storage.clone(), config.to_engine_config())
        .context("Failed to create index engine")?;
    engine.start().await;
    info!("Index engine started");

    // Start HTTP server
    let state = AppState { storage, config: Arc::new(config) };
    let server_handle = tokio::spawn(async move {
        if let Err(e) = silt_api::start_server(state, addr).await {
            error!(error = %e, "Server failed");
        }
    });

    info!(addr = %addr, "Silt is ready to receive crawl webhooks");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    // Drain in-flight index hand-offs
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "Index engine shutdown incomplete");
    }

    // Give in-flight requests time to complete
    tokio::select! {
        () = tokio::time::sleep(shutdown_grace) => {
            info!("Shutdown grace period expired");
        }
        _ = server_handle => {
            info!("Server stopped");
        }
    }

    // Close database connections
    db_pool.close().await;
    info!("Database connections closed");

    info!("Silt shutdown complete");
    Ok(())
}

/// Initializes tracing with structured logging.
///
/// `RUST_LOG` takes precedence over the configured filter.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .context("Invalid database URL")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match SqlitePoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect_with(connect_options.clone())
            .await
        {
            Ok(pool) => {
                // Verify connection works
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
