pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod metadata;
pub mod models;
pub mod queue;
pub mod storage;
pub mod tenancy;
pub mod web;

pub use db::Db;

use crate::cache::Caches;
use crate::config::config::Config;
use crate::ingest::consumer::ConsumerDeps;
use crate::metadata::MetadataService;
use crate::storage::{DiskMonitor, IngestGate, VolumeManager};
use crate::web::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{self, prelude::*};

pub async fn run(config: Config) {
    // Initialise logging
    if config.logging.log_to_file {
        let file_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::fs::File::create(&config.logging.log_file_path).unwrap());

        let stdout_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_appender)
            .with(stdout_appender)
            .try_init()
            .expect("Failed to initialise logging");
    } else {
        tracing_subscriber::fmt()
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    tracing::info!("🔧 Starting SPAX archive");

    let db = Db::connect(&config.database)
        .await
        .expect("Failed to connect to database");

    // One redis handle serves the shared cache; the stream queue manages
    // its own connection.
    let redis_manager = if config.cache.backend == "shared" {
        let client =
            redis::Client::open(config.redis.url.as_str()).expect("Failed to open redis client");
        Some(
            client
                .get_connection_manager()
                .await
                .expect("Failed to connect to redis"),
        )
    } else {
        None
    };

    let queue = queue::create_queue(&config.queue, &config.redis)
        .await
        .expect("Failed to create ingest queue");
    let caches = Caches::new(
        cache::create_backend(&config.cache, redis_manager).expect("Failed to create cache backend"),
    );

    let gate = Arc::new(IngestGate::default());
    let volume_rows = db::volumes::list(&db)
        .await
        .expect("Failed to load storage volumes");
    let volumes = Arc::new(VolumeManager::new(
        volume_rows,
        config.storage.default_template.clone(),
        gate.clone(),
    ));

    let metadata = Arc::new(MetadataService::new(
        db.clone(),
        volumes.clone(),
        caches.clone(),
    ));
    let lifecycle_engine = Arc::new(lifecycle::Engine::new(
        db.clone(),
        volumes.clone(),
        caches.clone(),
        metadata.clone(),
        &config.lifecycle,
    ));

    let spool_dir = PathBuf::from(&config.ingest.spool_dir);
    std::fs::create_dir_all(&spool_dir).expect("Failed to create spool directory");

    // Shared shutdown token, observed by every long-lived component.
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    let (consumer_handles, consumer_health) = ingest::start_consumers(
        ConsumerDeps {
            db: db.clone(),
            queue: queue.clone(),
            volumes: volumes.clone(),
            caches: caches.clone(),
            metadata: metadata.clone(),
            spool_dir: spool_dir.clone(),
            batch_size: config.ingest.batch_size,
        },
        config.ingest.consumer_threads,
        shutdown.clone(),
    );
    handles.extend(consumer_handles);
    tracing::info!(
        "🚚 Started {} ingest consumers",
        config.ingest.consumer_threads
    );

    let monitor = DiskMonitor::new(
        spool_dir.clone(),
        config.disk.threshold_mb,
        Duration::from_secs(config.disk.refresh_secs),
        gate.clone(),
    );
    handles.push(tokio::spawn(monitor.run(shutdown.clone())));

    handles.extend(lifecycle::start_scheduler(
        lifecycle_engine.clone(),
        &config.lifecycle,
        config.partitions.months_ahead,
        shutdown.clone(),
    ));
    tracing::info!("🗓️  Lifecycle scheduler started");

    let state: web::SharedState = Arc::new(AppState {
        db,
        queue,
        volumes,
        caches,
        metadata,
        lifecycle: lifecycle_engine,
        gate,
        spool_dir,
        consumer_health,
    });
    let router = web::build_router(state);

    let bind = format!("{}:{}", config.http.bind_address, config.http.bind_port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind {}: {}", bind, e));
    tracing::info!("🚀 HTTP listening on {}", bind);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .expect("HTTP server failed");
    });

    tracing::info!("✓ All components started. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c signal");

    tracing::info!("⏳ Shutting down...");
    shutdown.cancel();

    let _ = server.await;
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("✓ SPAX shut down gracefully.");
}
