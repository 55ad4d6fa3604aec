//! Liveness endpoint.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use std::time::Duration;

/// Deadline for each dependency probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /v1/health - Probe the metadata store and the storage backend.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metadata = tokio::time::timeout(PROBE_TIMEOUT, state.metadata.health_check());
    let storage = tokio::time::timeout(PROBE_TIMEOUT, state.storage.health_check());
    let (metadata, storage) = tokio::join!(metadata, storage);

    let error = match (metadata, storage) {
        (Ok(Ok(())), Ok(Ok(()))) => None,
        (Err(_), _) => Some("metadata store timed out".to_string()),
        (Ok(Err(e)), _) => Some(format!("metadata store: {e}")),
        (_, Err(_)) => Some(format!("{} storage timed out", state.storage.backend_name())),
        (_, Ok(Err(e))) => Some(format!("{} storage: {e}", state.storage.backend_name())),
    };

    match error {
        None => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                error: None,
            }),
        ),
        Some(error) => {
            tracing::warn!(error = %error, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                    error: Some(error),
                }),
            )
        }
    }
}
