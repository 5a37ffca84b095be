use std::sync::Arc;
use std::time::Duration;

use runway_types::{
    AgentSpecification, ExecutionAdapter, ExecutionContext, HealthState, OnError, RunStatus, Step,
    StepAction, StepKind, SubmitError, TriggerOrigin,
};
use serde_json::{Value, json};
use uuid::Uuid;

use super::LocalAdapter;
use crate::settings::LocalSettings;
use crate::steps::StepRegistry;

fn adapter(settings: LocalSettings) -> LocalAdapter {
    LocalAdapter::new(StepRegistry::with_builtins(reqwest::Client::new()), &settings)
}

fn ctx(payload: Value) -> ExecutionContext {
    ExecutionContext {
        execution_id: Uuid::new_v4(),
        request_id: Uuid::new_v4(),
        ordinal: 1,
        origin: TriggerOrigin::Manual,
        payload,
    }
}

fn upper(id: &str, value: &str) -> Step {
    Step::new(id, StepAction::TransformData)
        .with_config("value", value)
        .with_config("operation", "upper")
}

async fn run_to_end(adapter: &LocalAdapter, spec: AgentSpecification, payload: Value) -> RunStatus {
    let handle = adapter
        .submit(Arc::new(spec), ctx(payload))
        .await
        .expect("accepted");
    loop {
        match adapter.poll(&handle).await.expect("known handle") {
            RunStatus::Running => tokio::time::sleep(Duration::from_millis(5)).await,
            done => return done,
        }
    }
}

fn output_of(status: RunStatus) -> Value {
    match status {
        RunStatus::Succeeded { output } => output,
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn steps_run_in_order_and_see_earlier_outputs() {
    let mut spec = AgentSpecification::new("chain", "chain", "ops");
    spec.steps.push(upper("shout", "hello"));
    spec.steps.push(
        Step::new("keep", StepAction::TransformData)
            .with_config("input_key", "step:shout:result")
            .with_config("operation", "identity"),
    );

    let output = output_of(run_to_end(&adapter(LocalSettings::default()), spec, Value::Null).await);
    assert_eq!(output["shout"]["result"], "HELLO");
    assert_eq!(output["keep"]["result"], "HELLO");
}

#[tokio::test]
async fn conditionals_run_only_the_taken_branch() {
    let mut spec = AgentSpecification::new("branchy", "branchy", "ops");
    spec.steps.push(Step::new(
        "gate",
        StepAction::Conditional {
            predicate: "trigger.action == push".into(),
            then_branch: vec!["on_push".into()],
            else_branch: vec!["otherwise".into()],
        },
    ));
    spec.steps.push(upper("on_push", "pushed"));
    spec.steps.push(upper("otherwise", "other"));
    spec.steps.push(upper("after", "done"));

    let output = output_of(
        run_to_end(
            &adapter(LocalSettings::default()),
            spec,
            json!({"action": "push"}),
        )
        .await,
    );
    assert_eq!(output["gate"]["branch"], "then");
    assert_eq!(output["on_push"]["result"], "PUSHED");
    assert!(output.get("otherwise").is_none());
    assert_eq!(output["after"]["result"], "DONE");
}

#[tokio::test]
async fn loops_stop_on_their_condition_or_limit() {
    let mut spec = AgentSpecification::new("loopy", "loopy", "ops");
    spec.steps.push(Step::new(
        "repeat",
        StepAction::Loop {
            condition: "step:repeat:iteration < 3".into(),
            body: vec!["tick".into()],
            max_iterations: None,
        },
    ));
    spec.steps.push(upper("tick", "t"));
    spec.steps.push(Step::new(
        "bounded",
        StepAction::Loop {
            condition: "true".into(),
            body: vec!["tock".into()],
            max_iterations: Some(2),
        },
    ));
    spec.steps.push(upper("tock", "t"));

    let output = output_of(run_to_end(&adapter(LocalSettings::default()), spec, Value::Null).await);
    assert_eq!(output["repeat"]["iterations"], 3);
    assert_eq!(output["bounded"]["iterations"], 2);
}

#[tokio::test]
async fn step_conditions_skip_and_errors_follow_on_error() {
    let mut spec = AgentSpecification::new("errors", "errors", "ops");
    let mut skipped = upper("maybe", "x");
    skipped.condition = Some("env.MODE == prod".into());
    spec.steps.push(skipped);
    let mut tolerant = Step::new("bad_filter", StepAction::FilterData)
        .with_config("value", json!([]))
        .with_config("pattern", "(");
    tolerant.on_error = OnError::Continue;
    spec.steps.push(tolerant);
    spec.steps.push(upper("last", "y"));
    spec.environment.insert("MODE".into(), "dev".into());

    let output = output_of(run_to_end(&adapter(LocalSettings::default()), spec.clone(), Value::Null).await);
    assert_eq!(output["maybe"]["skipped"], true);
    assert!(output["bad_filter"]["error"].as_str().unwrap().contains("invalid pattern"));
    assert_eq!(output["last"]["result"], "Y");

    spec.steps[1].on_error = OnError::Fail;
    match run_to_end(&adapter(LocalSettings::default()), spec, Value::Null).await {
        RunStatus::Failed { reason } => assert!(reason.contains("bad_filter")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unsupported_kinds_are_refused_with_the_first_step() {
    let mut spec = AgentSpecification::new("writer", "writer", "ops");
    spec.steps.push(upper("prep", "x"));
    spec.steps.push(Step::new("draft", StepAction::GenerateContent));
    spec.steps.push(Step::new("post", StepAction::SendMessage));

    let local = adapter(LocalSettings::default());
    assert!(!local.capabilities().contains(&StepKind::GenerateContent));
    let err = local.submit(Arc::new(spec), ctx(Value::Null)).await.unwrap_err();
    assert_eq!(
        err,
        SubmitError::UnsupportedCapability {
            step_id: "draft".into()
        }
    );
}

fn sleeper() -> AgentSpecification {
    let mut spec = AgentSpecification::new("sleepy", "sleepy", "ops");
    spec.steps
        .push(Step::new("wait", StepAction::Delay { duration_secs: 60 }));
    spec
}

#[tokio::test(start_paused = true)]
async fn saturation_degrades_health_and_a_full_queue_is_transient() {
    let local = adapter(LocalSettings {
        max_concurrent: 1,
        queue_capacity: 1,
    });
    assert_eq!(local.probe_health().await, HealthState::Healthy);

    let first = local.submit(Arc::new(sleeper()), ctx(Value::Null)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(local.running(), 1);
    assert_eq!(local.probe_health().await, HealthState::Degraded);

    let _second = local.submit(Arc::new(sleeper()), ctx(Value::Null)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(local.queued(), 1);

    let third = local.submit(Arc::new(sleeper()), ctx(Value::Null)).await;
    assert!(matches!(third, Err(SubmitError::Transient(_))));

    local.cancel(&first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(local.queued(), 0);
    assert_eq!(local.running(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_runs_are_forgotten() {
    let local = adapter(LocalSettings {
        max_concurrent: 1,
        queue_capacity: 4,
    });
    let running = local.submit(Arc::new(sleeper()), ctx(Value::Null)).await.unwrap();
    let waiting = local.submit(Arc::new(sleeper()), ctx(Value::Null)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(local.tracked(), 2);

    local.cancel(&running).await.unwrap();
    local.cancel(&waiting).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(local.tracked(), 0);
    assert_eq!(local.running(), 0);
    assert_eq!(local.queued(), 0);
    assert!(matches!(
        local.poll(&running).await,
        Err(SubmitError::Rejected(_))
    ));
    local.cancel(&running).await.unwrap();
}

#[tokio::test]
async fn finished_runs_are_forgotten_after_their_terminal_poll() {
    let local = adapter(LocalSettings::default());
    let mut spec = AgentSpecification::new("once", "once", "ops");
    spec.steps.push(upper("a", "b"));
    let handle = local.submit(Arc::new(spec), ctx(Value::Null)).await.unwrap();
    loop {
        if local.poll(&handle).await.unwrap() != RunStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(
        local.poll(&handle).await,
        Err(SubmitError::Rejected(_))
    ));
}
