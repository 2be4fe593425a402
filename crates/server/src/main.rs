use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scriptrelay_core::{
    create_authenticator, load_config, validate_config, ArtifactStore, Authenticator, EventBus,
    FsArtifactStore, JobQueue, ScriptExecutor, SplashExecutor, SqliteStore,
};
use scriptrelay_server::{create_router, metrics::record_job_finished, AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long running jobs get to finish once the server stops
const QUEUE_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("SCRIPTRELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        auth = ?config.auth.method,
        database = ?config.database.path,
        "Configuration loaded"
    );

    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    let store = Arc::new(
        SqliteStore::new(&config.database.path).context("Failed to open database")?,
    );
    info!("Script store initialized");

    tokio::fs::create_dir_all(&config.media.root)
        .await
        .with_context(|| format!("Failed to create media root {:?}", config.media.root))?;
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(
        config.media.root.clone(),
        config.media.url_prefix.clone(),
    ));

    let executor: Arc<dyn ScriptExecutor> = Arc::new(
        SplashExecutor::new(config.executor.clone(), artifacts)
            .context("Failed to create Splash executor")?,
    );
    info!("Splash executor targeting {}", config.executor.endpoint_url);

    let queue = Arc::new(
        JobQueue::new(&config.queues).with_on_finished(Arc::new(record_job_finished)),
    );
    for stats in queue.stats() {
        info!(
            queue = %stats.name,
            workers = stats.workers,
            timeout_secs = stats.timeout_secs,
            "Queue started"
        );
    }

    let bus = EventBus::new();
    let state = Arc::new(AppState::new(
        config.clone(),
        authenticator,
        store,
        executor,
        Arc::clone(&queue),
        bus,
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped, draining job queues...");
    queue.shutdown(QUEUE_SHUTDOWN_GRACE).await;
    info!("Job queues stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
