//! Catalog Import Service
//!
//! Asynchronous spreadsheet ingestion:
//! - Import runs started over HTTP and executed in the background
//! - xlsx and csv parsing with per-row validation
//! - Batched, duplicate-skipping writes with live progress
//! - Retry of failed runs and owner-scoped run and record queries

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use api::{router, AppState};
use record_store::{StoreBackend, StoreConfig};
use telemetry::{health, init_tracing_from_env};
use worker::{HttpFetcher, MaintenanceConfig, MaintenanceScheduler, PipelineConfig, RunManager};

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    /// Fail Running runs whose lease expired before serving
    #[serde(default = "default_reconcile_on_startup")]
    reconcile_on_startup: bool,

    #[serde(default)]
    store: StoreConfig,

    #[serde(default)]
    pipeline: PipelineConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_reconcile_on_startup() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reconcile_on_startup: default_reconcile_on_startup(),
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Catalog Import Service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(
        backend = ?config.store.backend,
        local_root = ?config.pipeline.local_root,
        batch_size = config.pipeline.batch_size(),
        batch_delay_ms = config.pipeline.batch_delay_ms,
        max_concurrent_runs = config.pipeline.max_concurrent_runs(),
        "Loaded configuration"
    );

    let store = record_store::connect(&config.store)
        .await
        .context("Failed to connect record store")?;

    let maintenance = Arc::new(MaintenanceScheduler::new(
        MaintenanceConfig {
            lease_ttl: config.pipeline.lease_ttl(),
            ..Default::default()
        },
        store.clone(),
    ));
    if maintenance.check_store().await {
        info!("Record store connection: healthy");
    } else {
        error!("Record store connection: unhealthy");
    }

    let fetcher = HttpFetcher::new(
        config.pipeline.fetch_timeout(),
        config.pipeline.max_source_bytes,
    )
    .context("Failed to create source fetcher")?
    .with_local_root(config.pipeline.local_root.clone());
    let manager = Arc::new(RunManager::new(
        store.clone(),
        Arc::new(fetcher),
        config.pipeline.clone(),
    ));

    if config.reconcile_on_startup && config.store.backend == StoreBackend::Memory {
        warn!("Startup reconciliation has nothing to reclaim with the in-memory store");
    } else if config.reconcile_on_startup {
        if let Err(e) = manager.reconcile_orphans().await {
            error!("Failed to reconcile orphaned runs: {}", e);
        }
    }

    health().workers.set_healthy();
    let _maintenance_handles = maintenance.start();

    let app = router(AppState::new(manager.clone()));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    health().workers.set_unhealthy("shutting down");

    let in_flight = manager.in_flight();
    if in_flight > 0 {
        warn!(
            in_flight,
            "Runs still executing will be failed once their lease expires"
        );
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("IMPORT")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // The config crate's nested parsing doesn't work reliably with underscored field names
    if let Ok(url) = std::env::var("IMPORT_STORE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
        config.store.url = url;
    }
    if let Ok(backend) = std::env::var("IMPORT_STORE_BACKEND") {
        config.store.backend = match backend.trim().to_ascii_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "postgres" | "postgresql" => StoreBackend::Postgres,
            other => anyhow::bail!("Unknown store backend '{}'", other),
        };
    }
    if let Ok(root) = std::env::var("IMPORT_PIPELINE_LOCAL_ROOT") {
        let root = root.trim();
        config.pipeline.local_root = (!root.is_empty()).then(|| root.into());
    }
    if let Ok(delay) = std::env::var("IMPORT_PIPELINE_BATCH_DELAY_MS") {
        config.pipeline.batch_delay_ms = delay
            .parse()
            .context("IMPORT_PIPELINE_BATCH_DELAY_MS must be an integer")?;
    }

    Ok(config)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
