use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::common::counters::CounterSnapshot;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    state_store: StoreHealth,
    counters: CounterSnapshot,
}

#[derive(Serialize)]
pub struct StoreHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Returns 200 OK when the state store answers a ping within the webhook
/// timeout, 503 Service Unavailable otherwise.
pub async fn healthz_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let timeout = state.config.webhook_timeout;
    let store_health = match tokio::time::timeout(timeout, state.store.ping()).await {
        Ok(Ok(())) => StoreHealth {
            status: "ok".to_string(),
            error: None,
        },
        Ok(Err(e)) => StoreHealth {
            status: "error".to_string(),
            error: Some(format!("ping failed: {e}")),
        },
        Err(_) => StoreHealth {
            status: "error".to_string(),
            error: Some(format!("ping timeout (>{}s)", timeout.as_secs())),
        },
    };

    let is_healthy = store_health.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            state_store: store_health,
            counters: state.counters.snapshot(),
        }),
    )
}
