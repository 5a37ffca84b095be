use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use hmac::{Hmac, Mac};
use runway_types::{ExecutionRequest, TriggerOrigin};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};

use super::super::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Ingress for webhook triggers. The path selects the agent; a configured secret
/// demands a valid HMAC-SHA256 signature over the raw body.
pub async fn webhook_endpoint(
    Path(path): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(route) = state.manager.triggers().webhook_route(&path) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "No webhook bound to this path" })),
        );
    };

    if let Some(secret) = route.secret.as_deref()
        && !verify_signature(&headers, &body, secret)
    {
        warn!("Rejected webhook /{} for '{}': bad signature", path, route.spec_id);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "Signature verification failed" })),
        );
    }

    let request = ExecutionRequest::new(
        route.spec_id.clone(),
        TriggerOrigin::Webhook,
        payload_from(&path, &headers, &body),
    );
    let request_id = request.request_id;
    info!("Webhook /{} accepted for '{}'", path, route.spec_id);
    state.manager.dispatch(request);

    (
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "request_id": request_id, "agent": route.spec_id })),
    )
}

/// JSON bodies pass through as-is; anything else is wrapped as text.
fn payload_from(path: &str, headers: &HeaderMap, body: &[u8]) -> Value {
    let body = match serde_json::from_slice::<Value>(body) {
        Ok(parsed) => parsed,
        Err(_) if body.is_empty() => Value::Null,
        Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
    };
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    json!({
        "path": format!("/{}", path.trim_matches('/')),
        "content_type": content_type,
        "body": body,
    })
}

/// Accepts `X-Hub-Signature-256: sha256=<hex>` or `X-Signature: <hex>` (prefix optional).
pub(crate) fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> bool {
    let presented = ["x-hub-signature-256", "x-signature"]
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()));
    let Some(presented) = presented else {
        return false;
    };
    let hex_sig = presented.trim();
    let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
    let Ok(signature) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Hex HMAC-SHA256 of `body`, as a sender would put it in `X-Signature`.
#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn github_and_generic_signatures_verify() {
        let body = br#"{"ref":"main"}"#;
        let sig = sign("s3cret", body);

        let mut github = HeaderMap::new();
        github.insert(
            "x-hub-signature-256",
            HeaderValue::from_str(&format!("sha256={sig}")).unwrap(),
        );
        assert!(verify_signature(&github, body, "s3cret"));
        assert!(!verify_signature(&github, body, "other"));
        assert!(!verify_signature(&github, b"tampered", "s3cret"));

        let mut generic = HeaderMap::new();
        generic.insert("x-signature", HeaderValue::from_str(&sig).unwrap());
        assert!(verify_signature(&generic, body, "s3cret"));
    }

    #[test]
    fn missing_or_garbled_signatures_fail_closed() {
        assert!(!verify_signature(&HeaderMap::new(), b"{}", "s3cret"));
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", HeaderValue::from_static("not-hex"));
        assert!(!verify_signature(&headers, b"{}", "s3cret"));
    }

    #[test]
    fn payloads_wrap_json_and_text_bodies() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let payload = payload_from("orders/new/", &headers, br#"{"id": 7}"#);
        assert_eq!(payload["path"], "/orders/new");
        assert_eq!(payload["body"]["id"], 7);

        let payload = payload_from("ping", &HeaderMap::new(), b"hello");
        assert_eq!(payload["body"], "hello");
        assert_eq!(payload["content_type"], "");
        assert_eq!(payload_from("ping", &HeaderMap::new(), b"")["body"], Value::Null);
    }
}
