use std::net::SocketAddr;
use std::sync::Arc;

use dermalens_api::config::ServerConfig;
use dermalens_api::router::build_app_router;
use dermalens_api::state::AppState;
use dermalens_detectors::{DetectorConfig, DetectorSet};
use dermalens_pipeline::{Orchestrator, PipelineConfig};
use dermalens_store::{
    CacheConfig, CounterStore, JobQueue, MemoryCounterStore, RateLimiter, RedisCounterStore,
    RedisJobQueue, ResponseCache,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        app_env = config.app_env.as_str(),
        "Loaded server configuration"
    );

    // --- Shared store ---
    let store = config.redis_url.as_deref().map(|url| {
        dermalens_store::connect(url).expect("Invalid REDIS_URL")
    });
    match &store {
        Some(store) => match dermalens_store::health_check(store).await {
            Ok(()) => tracing::info!("Redis health check passed"),
            Err(e) => tracing::warn!(error = %e, "Redis unreachable, serving from local tiers"),
        },
        None => tracing::warn!("REDIS_URL not set, running with local cache and no job queue"),
    }

    // --- Cache ---
    let cache_config = CacheConfig::from_env();
    let cache = Arc::new(match &store {
        Some(store) => ResponseCache::new(Arc::new(store.clone()), cache_config),
        None => ResponseCache::local_only(cache_config),
    });

    // --- Rate limiter ---
    let rate_limiter = if config.rate_limit.bypass {
        tracing::info!("Rate limiting bypassed");
        RateLimiter::bypass()
    } else {
        let counters: Arc<dyn CounterStore> = match &store {
            Some(store) => Arc::new(RedisCounterStore::new(store.clone())),
            None => Arc::new(MemoryCounterStore::new()),
        };
        RateLimiter::new(counters)
    };

    // --- Job queue ---
    let job_queue = store.clone().map(|store| {
        Arc::new(RedisJobQueue::new(store, config.queue_key.clone())) as Arc<dyn JobQueue>
    });

    // --- Pipeline ---
    let pipeline_config = PipelineConfig::from_env();
    pipeline_config
        .check_request_timeout(config.request_timeout())
        .expect("Pipeline deadlines must fit inside REQUEST_TIMEOUT_SECS");
    let detectors =
        DetectorSet::from_config(&DetectorConfig::from_env()).expect("Failed to build HTTP client");
    let orchestrator = Arc::new(Orchestrator::new(detectors, cache, &pipeline_config));
    tracing::info!("Inference pipeline ready");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator,
        rate_limiter: Arc::new(rate_limiter),
        image_policy: Arc::new(config.image_policy()),
        job_queue,
        store,
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "dermalens_api=debug,dermalens_pipeline=debug,tower_http=debug".into()
    });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
