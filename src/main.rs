use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cmm_report_api::{
    catalog::{CourseCatalog, InMemoryCatalog},
    config::{Config, StorageProvider},
    create_router,
    db::{create_pool, HostDatabase, PgJobRunner},
    middleware::{Authenticator, StaticTokenAuthenticator, UserThrottle},
    queue::{ChannelDispatcher, InMemoryJobRunner, JobRunner, RedisDispatcher, TaskDispatcher, Worker},
    reports::{InMemoryRoster, RosterSource},
    storage::{ArtifactStore, InMemoryArtifactStore, LocalReportStore},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cmm_report_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    // Host database, or in-memory collaborators when none is configured
    let pool = match &config.database.url {
        Some(_) => {
            let pool = create_pool(&config.database).await?;
            info!("Connected to host database");
            Some(pool)
        }
        None => {
            warn!("DATABASE_URL is not set, running with in-memory collaborators");
            None
        }
    };

    let catalog: Arc<dyn CourseCatalog>;
    let roster: Arc<dyn RosterSource>;
    let authenticator: Arc<dyn Authenticator>;
    match &pool {
        Some(pool) => {
            let host = Arc::new(HostDatabase::new(pool.clone()));
            catalog = host.clone();
            roster = host.clone();
            authenticator = host;
        }
        None => {
            let seeded = InMemoryCatalog::from_course_ids(&config.database.seed_courses)
                .context("Invalid course id in CMM_API_COURSES")?;
            if config.database.seed_courses.is_empty() {
                warn!("CMM_API_COURSES is empty, every course id will be rejected");
            }
            catalog = Arc::new(seeded);
            roster = Arc::new(InMemoryRoster::default());
            authenticator = Arc::new(StaticTokenAuthenticator::new(&config.auth.static_tokens));
        }
    }

    let artifacts: Arc<dyn ArtifactStore> = match config.storage.provider {
        StorageProvider::Local => {
            tokio::fs::create_dir_all(&config.storage.report_dir)
                .await
                .with_context(|| format!("Failed to create {}", config.storage.report_dir))?;
            Arc::new(LocalReportStore::new(&config.storage.report_dir, &config.storage.base_url))
        }
        StorageProvider::Memory => Arc::new(InMemoryArtifactStore::default()),
    };

    // Dispatcher and the worker for reports this service generates
    let mut redis_conn = None;
    let mut receiver = None;
    let dispatcher: Arc<dyn TaskDispatcher> = if config.redis.enabled {
        let redis = RedisDispatcher::connect(&config.redis).await?;
        info!("Job queue enabled on {}", config.redis.url);
        redis_conn = Some(redis.connection());
        Arc::new(redis)
    } else {
        let (channel, rx) = ChannelDispatcher::new();
        receiver = Some(rx);
        Arc::new(channel)
    };

    let runner: Arc<dyn JobRunner> = match &pool {
        Some(pool) => Arc::new(PgJobRunner::new(pool.clone(), dispatcher)),
        None => Arc::new(InMemoryJobRunner::new(dispatcher)),
    };

    let worker = Worker::new(runner.clone(), roster, artifacts.clone());
    let worker_handle = match (redis_conn, receiver) {
        (Some(conn), _) => tokio::spawn(worker.run_redis(conn, config.redis.service_queue.clone())),
        (None, Some(rx)) => tokio::spawn(worker.run(rx)),
        (None, None) => anyhow::bail!("No task dispatcher configured"),
    };

    let throttle = Arc::new(UserThrottle::new(&config.throttle.rate));
    let pruner_handle = throttle.spawn_pruner(config.throttle.rate.period.max(Duration::from_secs(60)));

    // Create shared state
    let state = AppState {
        throttle,
        config: Arc::new(config.clone()),
        pool,
        catalog,
        runner,
        artifacts,
        authenticator,
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid HOST or PORT")?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    worker_handle.abort();
    pruner_handle.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
