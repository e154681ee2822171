// Main entry point for the spot balancer admission webhook

use std::sync::Arc;

use anyhow::{Context, Result};
use balancer_core::domains::placement::Reconciler;
use balancer_core::kernel::orchestrator::{KubeOrchestrator, Orchestrator};
use balancer_core::kernel::store::{RedisStore, StateStore};
use balancer_core::server::app::{build_app, AppState};
use balancer_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; RUST_LOG wins over LOG_LEVEL
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
                tracing_subscriber::EnvFilter::new(level)
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Spark Spot Balancer admission webhook");

    // Load configuration; invalid configuration exits non-zero here
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);
    tracing::info!(mode = ?config.spot_preference, "Configuration loaded");

    // Connect to the state store
    let store: Arc<dyn StateStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("Failed to connect to state store")?,
    );
    tracing::info!("State store connected");

    // Kubernetes client for driver lookups and reconciliation
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(KubeOrchestrator::new(client, &config));

    let state = AppState::new(config.clone(), store.clone(), orchestrator.clone());

    // Spawn the reconciler as a background task
    if config.reconcile_enabled {
        let reconciler = Reconciler::new(
            orchestrator,
            store,
            state.tracker.clone(),
            state.counters.clone(),
            &config,
        );
        tokio::spawn(async move {
            if let Err(e) = reconciler.run_until_shutdown().await {
                tracing::error!(error = %e, "Reconciler exited with error");
            }
        });
    } else {
        tracing::info!("Reconciliation disabled");
    }

    // Start server
    let app = build_app(state);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
