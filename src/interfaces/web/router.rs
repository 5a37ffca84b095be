use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::handlers::{agents, hooks, runtimes};
use super::{AppState, auth};

fn build_localhost_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate(
            |origin: &HeaderValue, _| {
                origin.to_str().is_ok_and(|o| {
                    o.starts_with("http://127.0.0.1:") || o.starts_with("http://localhost:")
                })
            },
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    // Public routes: webhook senders authenticate with HMAC signatures instead
    let public_routes = Router::new()
        .route("/api/health", get(runtimes::gateway_health))
        .route("/api/hooks/{*path}", post(hooks::webhook_endpoint))
        .layer(middleware::from_fn(security_headers))
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route(
            "/api/agents",
            get(agents::list_agents).post(agents::create_agent),
        )
        .route(
            "/api/agents/{id}",
            get(agents::get_agent)
                .put(agents::update_agent)
                .delete(agents::delete_agent),
        )
        .route("/api/agents/{id}/status", get(agents::agent_status))
        .route("/api/agents/{id}/versions", get(agents::agent_versions))
        .route("/api/agents/{id}/results", get(agents::agent_results))
        .route("/api/agents/{id}/execute", post(agents::execute_agent))
        .route("/api/runtimes", get(runtimes::list_runtimes))
        .route("/api/runtimes/probe", post(runtimes::probe_runtimes))
        .route("/api/triggers/external", get(runtimes::list_external_triggers))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors())
        .with_state(state);

    public_routes.merge(authed_routes)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
