use axum::{extract::State, http::StatusCode};
use serde_json::json;

use super::super::AppState;
use super::{ApiResponse, ok};

pub async fn list_runtimes(State(state): State<AppState>) -> ApiResponse {
    ok(
        StatusCode::OK,
        json!({ "runtimes": state.manager.runtime_status() }),
    )
}

/// Probes every adapter now instead of waiting for the next interval.
pub async fn probe_runtimes(State(state): State<AppState>) -> ApiResponse {
    let probed: Vec<_> = state
        .manager
        .force_health_check()
        .await
        .into_iter()
        .map(|(id, health)| json!({ "id": id, "health": health }))
        .collect();
    ok(StatusCode::OK, json!({ "probed": probed }))
}

pub async fn list_external_triggers(State(state): State<AppState>) -> ApiResponse {
    ok(
        StatusCode::OK,
        json!({ "bindings": state.manager.triggers().external_bindings().await }),
    )
}

pub async fn gateway_health() -> ApiResponse {
    ok(
        StatusCode::OK,
        json!({ "service": "runway", "version": env!("CARGO_PKG_VERSION") }),
    )
}
