//! Process Bootstrap
//!
//! Wires the store, cache, ingestion loop and HTTP server together and runs
//! them until SIGINT/SIGTERM, then shuts down in order: stop accepting,
//! drain in-flight requests, stop the background tasks, close the pool.

use std::sync::Arc;
use std::time::Duration;

use orderline_events::{IngestMetricsSnapshot, IngestionLoop, MessageSource};
use orderline_storage::{cache_sweep_task, BoundedCache, OrderStore};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::config::{AppConfig, IngestSource};
use crate::db::PgOrderStore;
use crate::error::{ApiError, ApiResult};
use crate::message_log::PgMessageLog;
use crate::routes::create_router;
use crate::services::OrderService;
use crate::telemetry::PrometheusObserver;

/// The orderline service process.
pub struct App {
    config: AppConfig,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(self) -> ApiResult<()> {
        let config = self.config;
        let addr = config.http.bind_addr()?;

        // ====================================================================
        // STORAGE
        // ====================================================================

        let pool = config.database.create_pool()?;
        let store = PgOrderStore::new(pool.clone());
        store.ensure_schema().await?;
        let message_log = PgMessageLog::new(pool.clone(), config.ingest.poll_interval);
        message_log.ensure_schema().await?;
        let store: Arc<dyn OrderStore> = Arc::new(store);

        let cache = Arc::new(BoundedCache::new(config.cache.clone()));
        let service = OrderService::new(Arc::clone(&store), Arc::clone(&cache));

        if let Err(err) = service.warm_cache().await {
            tracing::warn!(error = %err, "Cache warm-up failed, starting cold");
        }

        // ====================================================================
        // BACKGROUND TASKS
        // ====================================================================

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sweeper = tokio::spawn(cache_sweep_task(Arc::clone(&cache), shutdown_rx.clone()));

        let processor = Arc::new(service.clone());
        let ingestion = match config.ingest_source {
            IngestSource::Postgres => {
                let consumer = message_log
                    .consumer(config.ingest.group_id.clone(), &config.ingest.partitions)
                    .await?;
                spawn_ingestion(consumer, processor, &config, shutdown_rx.clone())
            }
            #[cfg(feature = "kafka")]
            IngestSource::Kafka => {
                let consumer =
                    crate::kafka::KafkaSource::subscribe(&config.kafka, &config.ingest.group_id)?;
                spawn_ingestion(consumer, processor, &config, shutdown_rx.clone())
            }
            #[cfg(not(feature = "kafka"))]
            IngestSource::Kafka => {
                return Err(ApiError::invalid_config(
                    "ingest.source is kafka but this binary was built without the `kafka` feature",
                ));
            }
        };

        // ====================================================================
        // HTTP SERVER
        // ====================================================================

        let router = create_router(service, store, &config.http);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
        tracing::info!(%addr, "Starting orderline API server");

        let mut server_shutdown = shutdown_rx.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.wait_for(|stop| *stop).await;
                })
                .await
        });

        let exited_early = tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("Shutdown signal received");
                None
            }
            result = &mut server => Some(result),
        };

        // ====================================================================
        // SHUTDOWN
        // ====================================================================

        let _ = shutdown_tx.send(true);
        let drain_timeout = config.shutdown_timeout;

        let server_result = match exited_early {
            Some(result) => server_outcome(result),
            None => match tokio::time::timeout(drain_timeout, &mut server).await {
                Ok(result) => server_outcome(result),
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = drain_timeout.as_secs(),
                        "HTTP drain timed out, aborting remaining requests"
                    );
                    server.abort();
                    Ok(())
                }
            },
        };

        if let Some(snapshot) = join_task("ingestion loop", ingestion, drain_timeout).await {
            tracing::info!(
                committed = snapshot.messages_committed,
                failed = snapshot.messages_failed,
                "Ingestion loop joined"
            );
        }
        if let Some(removed) = join_task("cache sweeper", sweeper, drain_timeout).await {
            tracing::info!(removed, "Cache sweeper joined");
        }

        pool.close();
        tracing::info!("Shutdown complete");
        server_result
    }
}

fn spawn_ingestion<S>(
    source: S,
    processor: Arc<OrderService>,
    config: &AppConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<IngestMetricsSnapshot>
where
    S: MessageSource + 'static,
{
    let ingestion = IngestionLoop::new(source, processor, config.ingest.clone())
        .with_observer(Arc::new(PrometheusObserver));
    tokio::spawn(ingestion.run(shutdown_rx))
}

fn server_outcome(result: Result<std::io::Result<()>, JoinError>) -> ApiResult<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ApiError::internal_error(format!("Server error: {}", e))),
        Err(e) => Err(ApiError::internal_error(format!("Server task failed: {}", e))),
    }
}

/// Wait for a background task, aborting it after `timeout`.
async fn join_task<T>(name: &str, mut handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!(task = name, error = %e, "Background task failed");
            None
        }
        Err(_) => {
            tracing::warn!(task = name, "Background task did not stop in time, aborting");
            handle.abort();
            None
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
}
