//! Completion reconciler binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pcast_events::RedisEventPublisher;
use pcast_registry::RedisRegistry;
use pcast_worker::{CompletionEvaluator, EventPhaseTrigger, Reconciler, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("pcast=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting pcast-worker");

    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid worker config: {}", e);
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let registry = match RedisRegistry::from_env() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("Failed to create registry: {}", e);
            std::process::exit(1);
        }
    };

    let events = match RedisEventPublisher::new(&redis_url) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Failed to create event publisher: {}", e);
            std::process::exit(1);
        }
    };

    let evaluator = CompletionEvaluator::new(
        registry,
        events.clone(),
        Arc::new(EventPhaseTrigger::new(events.clone())),
    )
    .with_min_image_success_rate(config.min_image_success_rate);
    let evaluator = match evaluator {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!("Failed to create completion evaluator: {}", e);
            std::process::exit(1);
        }
    };

    let reconciler = Arc::new(Reconciler::new(evaluator, events));

    let runner = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.run().await })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    reconciler.shutdown();

    match tokio::time::timeout(config.shutdown_timeout, runner).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("Reconciler error: {}", e),
        Ok(Err(e)) => error!("Reconciler task failed: {}", e),
        Err(_) => error!("Reconciler did not stop within {:?}", config.shutdown_timeout),
    }

    info!("Worker shutdown complete");
}
