//! Application setup and server configuration.

use std::sync::Arc;

use axum::extract::Extension;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::common::counters::RuntimeCounters;
use crate::config::Config;
use crate::domains::placement::PlacementTracker;
use crate::domains::ratio::RatioResolver;
use crate::kernel::orchestrator::Orchestrator;
use crate::kernel::store::StateStore;
use crate::server::routes::{healthz_handler, mutate_handler, validate_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn StateStore>,
    pub tracker: Arc<PlacementTracker>,
    pub resolver: Arc<RatioResolver>,
    pub counters: Arc<RuntimeCounters>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn StateStore>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        let tracker = Arc::new(PlacementTracker::new(store.clone(), &config));
        let resolver = Arc::new(RatioResolver::new(store.clone(), orchestrator, &config));
        Self {
            config,
            store,
            tracker,
            resolver,
            counters: Arc::new(RuntimeCounters::default()),
        }
    }
}

/// Build the Axum application router.
///
/// TLS terminates in front of this process; the admission endpoints serve
/// plain HTTP on the configured port.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/validate", post(validate_handler))
        .route("/healthz", get(healthz_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
