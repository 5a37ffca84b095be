use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode as AxumStatus};
use axum::routing::{get, post};
use axum::{Json, Router};
use runway_types::{
    AgentSpecification, ExecutionAdapter, ExecutionContext, HealthState, RunStatus, Step,
    StepAction, SubmitError, TriggerOrigin,
};
use serde_json::{Value, json};
use uuid::Uuid;

use super::*;

const KEY: &str = "test-key";

struct Mock {
    deploys: AtomicUsize,
    deploy_delay_ms: AtomicU64,
    deploying: AtomicUsize,
    peak_deploying: AtomicUsize,
    polls: AtomicUsize,
    execute_status: AtomicU16,
    stopped: StdMutex<Vec<String>>,
    payloads: StdMutex<Vec<Value>>,
}

type Shared = Arc<Mock>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        == Some(KEY)
}

async fn list(State(_): State<Shared>, headers: HeaderMap) -> (AxumStatus, Json<Value>) {
    if authorized(&headers) {
        (AxumStatus::OK, Json(json!({"data": []})))
    } else {
        (AxumStatus::UNAUTHORIZED, Json(json!({"message": "unauthorized"})))
    }
}

async fn deploy(State(mock): State<Shared>, Json(doc): Json<Value>) -> Json<Value> {
    let now = mock.deploying.fetch_add(1, Ordering::SeqCst) + 1;
    mock.peak_deploying.fetch_max(now, Ordering::SeqCst);
    let delay = mock.deploy_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
    mock.deploying.fetch_sub(1, Ordering::SeqCst);
    let n = mock.deploys.fetch_add(1, Ordering::SeqCst) + 1;
    assert!(doc["nodes"].is_array());
    Json(json!({"id": format!("wf-{n}"), "name": doc["name"]}))
}

async fn execute(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> (AxumStatus, Json<Value>) {
    let status = mock.execute_status.load(Ordering::SeqCst);
    if status != 200 {
        let code = AxumStatus::from_u16(status).unwrap_or(AxumStatus::INTERNAL_SERVER_ERROR);
        return (code, Json(json!({"message": "nope"})));
    }
    mock.payloads.lock().unwrap().push(body);
    (AxumStatus::OK, Json(json!({"data": {"executionId": format!("{id}-ex")}})))
}

async fn execution(State(mock): State<Shared>, Path(_id): Path<String>) -> Json<Value> {
    let polls = mock.polls.fetch_add(1, Ordering::SeqCst);
    if polls == 0 {
        Json(json!({"status": "running", "finished": false}))
    } else {
        Json(json!({"status": "success", "finished": true, "data": {"posted": 3}}))
    }
}

async fn stop(State(mock): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    mock.stopped.lock().unwrap().push(id);
    Json(json!({"status": "canceled"}))
}

async fn serve() -> (String, Shared) {
    let mock = Arc::new(Mock {
        deploys: AtomicUsize::new(0),
        deploy_delay_ms: AtomicU64::new(0),
        deploying: AtomicUsize::new(0),
        peak_deploying: AtomicUsize::new(0),
        polls: AtomicUsize::new(0),
        execute_status: AtomicU16::new(200),
        stopped: StdMutex::new(Vec::new()),
        payloads: StdMutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/api/v1/workflows", get(list).post(deploy))
        .route("/api/v1/workflows/{id}/execute", post(execute))
        .route("/api/v1/executions/{id}", get(execution))
        .route("/api/v1/executions/{id}/stop", post(stop))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api/v1/"), mock)
}

fn adapter_for(url: &str, key: Option<&str>) -> WorkflowAdapter {
    WorkflowAdapter::new(&WorkflowSettings {
        api_url: Some(url.to_string()),
        api_key: key.map(str::to_string),
        request_timeout_secs: 5,
        ..Default::default()
    })
    .unwrap()
}

fn spec() -> Arc<AgentSpecification> {
    let mut spec = AgentSpecification::new("notify", "Notify", "ops");
    spec.steps.push(
        Step::new("call", StepAction::HttpRequest).with_config("url", "https://example.com/hook"),
    );
    Arc::new(spec)
}

fn ctx() -> ExecutionContext {
    ExecutionContext {
        execution_id: Uuid::new_v4(),
        request_id: Uuid::new_v4(),
        ordinal: 1,
        origin: TriggerOrigin::Webhook,
        payload: json!({"ref": "main"}),
    }
}

#[tokio::test]
async fn deploys_once_per_content_hash_and_polls_to_completion() {
    let (url, mock) = serve().await;
    let adapter = adapter_for(&url, Some(KEY));

    let first = adapter.submit(spec(), ctx()).await.unwrap();
    let second = adapter.submit(spec(), ctx()).await.unwrap();
    assert_eq!(mock.deploys.load(Ordering::SeqCst), 1);
    assert_eq!(first.backend_ref, "wf-1-ex");
    assert_eq!(second.backend_ref, "wf-1-ex");
    assert_eq!(mock.payloads.lock().unwrap()[0]["data"], json!({"ref": "main"}));

    assert_eq!(adapter.poll(&first).await.unwrap(), RunStatus::Running);
    assert_eq!(
        adapter.poll(&first).await.unwrap(),
        RunStatus::Succeeded {
            output: json!({"posted": 3})
        }
    );

    let mut changed = (*spec()).clone();
    changed.name = "Notify v2".into();
    adapter.submit(Arc::new(changed), ctx()).await.unwrap();
    assert_eq!(mock.deploys.load(Ordering::SeqCst), 2);
    assert_eq!(adapter.deployed_count().await, 2);
}

#[tokio::test]
async fn slow_deploys_only_hold_up_their_own_content_hash() {
    let (url, mock) = serve().await;
    mock.deploy_delay_ms.store(200, Ordering::SeqCst);
    let adapter = adapter_for(&url, Some(KEY));
    let mut other = (*spec()).clone();
    other.name = "Notify elsewhere".into();
    let other = Arc::new(other);

    let (a, b, again) = tokio::join!(
        adapter.submit(spec(), ctx()),
        adapter.submit(other, ctx()),
        adapter.submit(spec(), ctx()),
    );
    a.unwrap();
    b.unwrap();
    again.unwrap();

    assert_eq!(mock.peak_deploying.load(Ordering::SeqCst), 2);
    assert_eq!(mock.deploys.load(Ordering::SeqCst), 2);
    assert_eq!(adapter.deployed_count().await, 2);
}

#[tokio::test]
async fn cancel_stops_the_remote_execution() {
    let (url, mock) = serve().await;
    let adapter = adapter_for(&url, Some(KEY));
    let handle = adapter.submit(spec(), ctx()).await.unwrap();
    adapter.cancel(&handle).await.unwrap();
    assert_eq!(*mock.stopped.lock().unwrap(), vec!["wf-1-ex".to_string()]);
}

#[tokio::test]
async fn http_statuses_map_to_submit_errors() {
    let (url, mock) = serve().await;
    let adapter = adapter_for(&url, Some(KEY));

    mock.execute_status.store(503, Ordering::SeqCst);
    assert!(matches!(
        adapter.submit(spec(), ctx()).await,
        Err(SubmitError::Transient(_))
    ));
    mock.execute_status.store(429, Ordering::SeqCst);
    assert!(matches!(
        adapter.submit(spec(), ctx()).await,
        Err(SubmitError::Transient(_))
    ));
    mock.execute_status.store(401, Ordering::SeqCst);
    assert!(matches!(
        adapter.submit(spec(), ctx()).await,
        Err(SubmitError::Unavailable(_))
    ));
    mock.execute_status.store(400, Ordering::SeqCst);
    assert!(matches!(
        adapter.submit(spec(), ctx()).await,
        Err(SubmitError::Rejected(_))
    ));
}

#[tokio::test]
async fn a_vanished_workflow_is_redeployed_on_the_next_submit() {
    let (url, mock) = serve().await;
    let adapter = adapter_for(&url, Some(KEY));

    mock.execute_status.store(404, Ordering::SeqCst);
    assert!(matches!(
        adapter.submit(spec(), ctx()).await,
        Err(SubmitError::Transient(_))
    ));
    assert_eq!(adapter.deployed_count().await, 0);

    mock.execute_status.store(200, Ordering::SeqCst);
    let handle = adapter.submit(spec(), ctx()).await.unwrap();
    assert_eq!(handle.backend_ref, "wf-2-ex");
}

#[tokio::test]
async fn probe_reports_auth_and_connection_failures_as_unavailable() {
    let (url, _mock) = serve().await;
    assert_eq!(
        adapter_for(&url, Some(KEY)).probe_health().await,
        HealthState::Healthy
    );
    assert_eq!(
        adapter_for(&url, Some("wrong")).probe_health().await,
        HealthState::Unavailable
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = format!("http://{}/api/v1", listener.local_addr().unwrap());
    drop(listener);
    let offline = adapter_for(&closed, Some(KEY));
    assert_eq!(offline.probe_health().await, HealthState::Unavailable);
    assert!(matches!(
        offline.submit(spec(), ctx()).await,
        Err(SubmitError::Unavailable(_))
    ));
}

#[tokio::test]
async fn loops_and_generation_are_outside_its_capabilities() {
    let adapter = adapter_for("http://127.0.0.1:9/api/v1", None);
    let mut spec = AgentSpecification::new("writer", "Writer", "ops");
    spec.steps.push(Step::new("draft", StepAction::GenerateContent));
    assert_eq!(
        adapter.submit(Arc::new(spec), ctx()).await.unwrap_err(),
        SubmitError::UnsupportedCapability {
            step_id: "draft".into()
        }
    );
}

#[test]
fn missing_url_is_a_config_error() {
    assert!(matches!(
        WorkflowAdapter::new(&WorkflowSettings::default()),
        Err(WorkflowConfigError::MissingUrl)
    ));
}
