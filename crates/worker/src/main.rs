use std::sync::Arc;

use dermalens_detectors::{DetectorConfig, DetectorSet};
use dermalens_pipeline::{Orchestrator, PipelineConfig};
use dermalens_store::{CacheConfig, RedisJobQueue, ResponseCache};
use dermalens_worker::{WebhookDelivery, Worker, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env();
    tracing::info!(queue = %config.queue_key, app_env = config.app_env.as_str(), "Worker starting");

    let store = dermalens_store::connect(&config.redis_url).expect("Invalid REDIS_URL");
    if let Err(e) = dermalens_store::health_check(&store).await {
        tracing::warn!(error = %e, "Redis not reachable yet, the worker will keep retrying");
    }

    let cache = Arc::new(ResponseCache::new(
        Arc::new(store.clone()),
        CacheConfig::from_env(),
    ));
    let detectors =
        DetectorSet::from_config(&DetectorConfig::from_env()).expect("Failed to build HTTP client");
    let orchestrator = Arc::new(Orchestrator::new(
        detectors,
        cache,
        &PipelineConfig::from_env(),
    ));

    let worker = Worker::new(
        Arc::new(RedisJobQueue::new(store, config.queue_key.clone())),
        orchestrator,
        config.image_policy(),
        WebhookDelivery::new().expect("Failed to build webhook HTTP client"),
        config.poll_timeout,
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    worker.run(cancel).await;
    tracing::info!("Worker shut down");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dermalens_worker=debug,dermalens_pipeline=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, finishing current job"),
        () = terminate => tracing::info!("Received SIGTERM, finishing current job"),
    }
}
