pub mod agents;
pub mod hooks;
pub mod runtimes;

use axum::{Json, http::StatusCode};
use runway_runtime::{ManagerError, TriggerError};
use serde_json::{Value, json};
use tracing::error;

pub(crate) type ApiResponse = (StatusCode, Json<Value>);

/// Merges `body` into `{"success": true}`.
pub(crate) fn ok(status: StatusCode, body: Value) -> ApiResponse {
    let mut out = json!({ "success": true });
    if let (Some(out), Value::Object(fields)) = (out.as_object_mut(), body) {
        out.extend(fields);
    }
    (status, Json(out))
}

pub(crate) fn fail(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

pub(crate) fn manager_error(e: ManagerError) -> ApiResponse {
    let status = match &e {
        ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
        ManagerError::AlreadyExists(_) => StatusCode::CONFLICT,
        ManagerError::Validation(v) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "success": false,
                    "error": e.to_string(),
                    "field": v.field,
                    "reason": v.reason,
                })),
            );
        }
        ManagerError::Trigger(TriggerError::WebhookConflict { .. }) => StatusCode::CONFLICT,
        ManagerError::Trigger(TriggerError::Schedule(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        ManagerError::Trigger(TriggerError::Scheduler(_))
        | ManagerError::Storage(_)
        | ManagerError::Execution(_) => {
            error!("Gateway request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    fail(status, e.to_string())
}
