use std::collections::VecDeque;
use std::sync::Mutex;

use base64::Engine;
use runway_types::{Step, StepAction, TriggerOrigin};
use serde_json::json;
use uuid::Uuid;

use super::*;

#[derive(Debug, Clone)]
struct Call {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
}

/// Replays canned outputs in order and records every invocation.
#[derive(Default)]
struct FakeRunner {
    replies: Mutex<VecDeque<io::Result<CommandOutput>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeRunner {
    fn with(replies: Vec<io::Result<CommandOutput>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
        _timeout: Duration,
    ) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call {
            program: program.to_string(),
            args: args.to_vec(),
            stdin: stdin.map(str::to_string),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::ok("")))
    }
}

fn spec() -> Arc<AgentSpecification> {
    let mut spec = AgentSpecification::new("Nightly_Report!", "Nightly report", "ops");
    spec.steps.push(Step::new("draft", StepAction::GenerateContent));
    spec.environment.insert("REGION".into(), "eu".into());
    Arc::new(spec)
}

fn ctx() -> ExecutionContext {
    ExecutionContext {
        execution_id: Uuid::parse_str("0b7c4e7a-1f2d-4c3b-9a8e-5d6f7a8b9c0d").unwrap(),
        request_id: Uuid::new_v4(),
        ordinal: 1,
        origin: TriggerOrigin::Schedule,
        payload: json!({"fired_at": "2026-10-19T09:00:00Z"}),
    }
}

fn docker(runner: Arc<FakeRunner>) -> ContainerAdapter {
    ContainerAdapter::docker(&DockerSettings::default(), runner)
}

#[test]
fn packaging_encodes_spec_and_trigger() {
    let unit = ExecutionUnit::package(&spec(), &ctx(), "runner:1").unwrap();
    assert_eq!(unit.name, "runway-nightly-report-0b7c4e7a");
    assert_eq!(unit.labels["runway.spec"], "nightly-report");
    assert_eq!(unit.env["REGION"], "eu");

    let decoded = BASE64.decode(&unit.env["RUNWAY_SPEC"]).unwrap();
    let roundtrip = AgentSpecification::from_json(std::str::from_utf8(&decoded).unwrap()).unwrap();
    assert_eq!(roundtrip, *spec());
    let trigger = BASE64.decode(&unit.env["RUNWAY_TRIGGER"]).unwrap();
    assert_eq!(
        serde_json::from_slice::<Value>(&trigger).unwrap(),
        ctx().payload
    );
}

#[tokio::test]
async fn docker_launch_builds_the_run_command() {
    let runner = FakeRunner::with(vec![Ok(CommandOutput::ok("c0ffee\n"))]);
    let adapter = docker(runner.clone());
    assert_eq!(adapter.id().as_str(), "docker");

    let handle = adapter.submit(spec(), ctx()).await.unwrap();
    assert_eq!(handle.backend_ref, "c0ffee");

    let calls = runner.calls();
    let call = &calls[0];
    assert_eq!(call.program, "docker");
    assert_eq!(&call.args[..3], &["run", "-d", "--rm=false"]);
    assert!(call.args.contains(&"runway.spec=nightly-report".to_string()));
    assert!(call.args.windows(2).any(|w| w[0] == "--memory" && w[1] == "512m"));
    assert!(call.args.iter().any(|a| a.starts_with("RUNWAY_SPEC=")));
    assert_eq!(call.args.last().unwrap(), "ghcr.io/runway-dev/runner:latest");
}

#[tokio::test]
async fn docker_poll_reads_state_logs_and_cleans_up() {
    let runner = FakeRunner::with(vec![
        Ok(CommandOutput::ok("c0ffee")),
        Ok(CommandOutput::ok("running 0")),
        Ok(CommandOutput::ok("exited 0")),
        Ok(CommandOutput::ok("starting\n{\"posted\": 2}\n")),
        Ok(CommandOutput::ok("c0ffee")),
    ]);
    let adapter = docker(runner.clone());
    let handle = adapter.submit(spec(), ctx()).await.unwrap();

    assert_eq!(adapter.poll(&handle).await.unwrap(), RunStatus::Running);
    assert_eq!(
        adapter.poll(&handle).await.unwrap(),
        RunStatus::Succeeded {
            output: json!({"posted": 2})
        }
    );
    let calls = runner.calls();
    assert_eq!(calls[3].args[..2], ["logs".to_string(), "--tail".to_string()]);
    assert_eq!(calls[4].args, vec!["rm", "-f", "c0ffee"]);
}

#[tokio::test]
async fn docker_failures_carry_the_log_tail() {
    let runner = FakeRunner::with(vec![
        Ok(CommandOutput::ok("c0ffee")),
        Ok(CommandOutput::ok("exited 3")),
        Ok(CommandOutput::ok("one\ntwo\nboom")),
    ]);
    let adapter = docker(runner);
    let handle = adapter.submit(spec(), ctx()).await.unwrap();
    match adapter.poll(&handle).await.unwrap() {
        RunStatus::Failed { reason } => {
            assert!(reason.starts_with("exited with code 3"));
            assert!(reason.ends_with("one | two | boom"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn docker_errors_are_classified() {
    let runner = FakeRunner::with(vec![
        Ok(CommandOutput::failed(
            1,
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        )),
        Ok(CommandOutput::failed(125, "Unable to find image 'nope:latest' locally")),
        Err(io::Error::new(io::ErrorKind::NotFound, "docker")),
    ]);
    let adapter = docker(runner);
    assert!(matches!(
        adapter.submit(spec(), ctx()).await,
        Err(SubmitError::Unavailable(_))
    ));
    assert!(matches!(
        adapter.submit(spec(), ctx()).await,
        Err(SubmitError::Rejected(_))
    ));
    assert!(matches!(
        adapter.submit(spec(), ctx()).await,
        Err(SubmitError::Unavailable(_))
    ));
}

#[tokio::test]
async fn docker_probe_maps_ping_results() {
    let runner = FakeRunner::with(vec![
        Ok(CommandOutput::ok("27.3.1")),
        Ok(CommandOutput::failed(1, "Cannot connect to the Docker daemon")),
        Err(io::Error::new(io::ErrorKind::TimedOut, "docker info")),
    ]);
    let adapter = docker(runner);
    assert_eq!(adapter.probe_health().await, HealthState::Healthy);
    assert_eq!(adapter.probe_health().await, HealthState::Unavailable);
    assert_eq!(adapter.probe_health().await, HealthState::Degraded);
}

#[tokio::test]
async fn kubernetes_applies_a_job_manifest_and_tracks_it() {
    let runner = FakeRunner::with(vec![
        Ok(CommandOutput::ok("job.batch/runway-nightly-report-0b7c4e7a created")),
        Ok(CommandOutput::ok("1,,")),
        Ok(CommandOutput::ok(",,1")),
        Ok(CommandOutput::ok("panic: out of budget")),
        Ok(CommandOutput::ok("")),
    ]);
    let settings = KubernetesSettings {
        namespace: "agents".into(),
        ..Default::default()
    };
    let adapter = ContainerAdapter::kubernetes(&settings, runner.clone());
    assert_eq!(adapter.id().as_str(), "kubernetes");

    let handle = adapter.submit(spec(), ctx()).await.unwrap();
    assert_eq!(handle.backend_ref, "runway-nightly-report-0b7c4e7a");

    let calls = runner.calls();
    let apply = &calls[0];
    assert_eq!(apply.program, "kubectl");
    assert_eq!(apply.args, vec!["apply", "-f", "-", "-n", "agents"]);
    let manifest: Value = serde_json::from_str(apply.stdin.as_deref().unwrap()).unwrap();
    assert_eq!(manifest["kind"], "Job");
    assert_eq!(manifest["metadata"]["namespace"], "agents");
    assert_eq!(manifest["spec"]["backoffLimit"], 0);
    let container = &manifest["spec"]["template"]["spec"]["containers"][0];
    assert_eq!(container["resources"]["limits"]["cpu"], "800m");
    assert!(
        container["env"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["name"] == "RUNWAY_TRIGGER")
    );

    assert_eq!(adapter.poll(&handle).await.unwrap(), RunStatus::Running);
    match adapter.poll(&handle).await.unwrap() {
        RunStatus::Failed { reason } => assert!(reason.contains("out of budget")),
        other => panic!("expected failure, got {other:?}"),
    }
    let delete = runner.calls().pop().unwrap();
    assert_eq!(delete.args[..3], ["delete", "job", "runway-nightly-report-0b7c4e7a"]);
}

#[tokio::test]
async fn kubernetes_missing_jobs_fail_the_poll() {
    let runner = FakeRunner::with(vec![
        Ok(CommandOutput::ok("created")),
        Ok(CommandOutput::failed(
            1,
            "Error from server (NotFound): jobs.batch \"x\" not found",
        )),
    ]);
    let adapter = ContainerAdapter::kubernetes(&KubernetesSettings::default(), runner);
    let handle = adapter.submit(spec(), ctx()).await.unwrap();
    assert!(matches!(
        adapter.poll(&handle).await.unwrap(),
        RunStatus::Failed { .. }
    ));
}
