use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use runway_types::{AgentSpecification, ExecutionRequest, TriggerOrigin};
use serde::Deserialize;
use serde_json::{Value, json};

use super::super::AppState;
use super::{ApiResponse, fail, manager_error, ok};

const DEFAULT_RESULT_LIMIT: usize = 20;
const MAX_RESULT_LIMIT: usize = 500;

fn parse_spec(body: Value) -> Result<AgentSpecification, ApiResponse> {
    serde_json::from_value(body).map_err(|e| {
        fail(
            StatusCode::BAD_REQUEST,
            format!("Malformed specification: {e}"),
        )
    })
}

pub async fn list_agents(State(state): State<AppState>) -> ApiResponse {
    match state.manager.list().await {
        Ok(agents) => ok(StatusCode::OK, json!({ "agents": agents })),
        Err(e) => manager_error(e),
    }
}

pub async fn create_agent(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResponse {
    let spec = match parse_spec(body) {
        Ok(spec) => spec,
        Err(response) => return response,
    };
    match state.manager.create(spec).await {
        Ok(id) => ok(StatusCode::CREATED, json!({ "id": id })),
        Err(e) => manager_error(e),
    }
}

pub async fn get_agent(Path(id): Path<String>, State(state): State<AppState>) -> ApiResponse {
    match state.manager.get(&id).await {
        Ok(stored) => ok(
            StatusCode::OK,
            json!({
                "agent": stored.spec,
                "version": stored.version,
                "content_hash": stored.content_hash,
                "created_at": stored.created_at,
                "updated_at": stored.updated_at,
            }),
        ),
        Err(e) => manager_error(e),
    }
}

pub async fn update_agent(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResponse {
    let spec = match parse_spec(body) {
        Ok(spec) => spec,
        Err(response) => return response,
    };
    match state.manager.update(&id, spec).await {
        Ok(outcome) => ok(StatusCode::OK, json!({ "outcome": outcome })),
        Err(e) => manager_error(e),
    }
}

pub async fn delete_agent(Path(id): Path<String>, State(state): State<AppState>) -> ApiResponse {
    match state.manager.delete(&id).await {
        Ok(()) => ok(StatusCode::OK, json!({ "id": id })),
        Err(e) => manager_error(e),
    }
}

pub async fn agent_status(Path(id): Path<String>, State(state): State<AppState>) -> ApiResponse {
    match state.manager.status(&id).await {
        Ok(status) => ok(StatusCode::OK, json!({ "status": status })),
        Err(e) => manager_error(e),
    }
}

pub async fn agent_versions(Path(id): Path<String>, State(state): State<AppState>) -> ApiResponse {
    match state.manager.versions(&id).await {
        Ok(versions) => {
            let versions: Vec<Value> = versions
                .iter()
                .map(|v| {
                    json!({
                        "version": v.version,
                        "content_hash": v.content_hash,
                        "stored_at": v.stored_at,
                    })
                })
                .collect();
            ok(StatusCode::OK, json!({ "versions": versions }))
        }
        Err(e) => manager_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    limit: Option<usize>,
}

pub async fn agent_results(
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
    State(state): State<AppState>,
) -> ApiResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RESULT_LIMIT)
        .clamp(1, MAX_RESULT_LIMIT);
    match state.manager.store().recent_results(&id, limit).await {
        Ok(results) => ok(StatusCode::OK, json!({ "results": results })),
        Err(e) => manager_error(e.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    payload: Value,
    /// Collaborators serving file-watch or queue triggers name their origin here.
    #[serde(default)]
    origin: Option<TriggerOrigin>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// `false` answers 202 immediately and runs the request in the background.
    #[serde(default = "default_wait")]
    wait: bool,
}

fn default_wait() -> bool {
    true
}

pub async fn execute_agent(
    Path(id): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<ExecuteBody>>,
) -> ApiResponse {
    let body = body.map(|Json(b)| b).unwrap_or(ExecuteBody {
        wait: true,
        ..Default::default()
    });
    let request = ExecutionRequest::new(
        id.clone(),
        body.origin.unwrap_or(TriggerOrigin::Manual),
        body.payload,
    );
    let request_id = request.request_id;

    if !body.wait {
        if let Err(e) = state.manager.get(&id).await {
            return manager_error(e);
        }
        state.manager.dispatch(request);
        return ok(StatusCode::ACCEPTED, json!({ "request_id": request_id }));
    }

    let timeout = body.timeout_secs.map(Duration::from_secs);
    match state.manager.execute(request, timeout).await {
        Ok(result) => ok(StatusCode::OK, json!({ "result": result })),
        Err(e) => manager_error(e),
    }
}
