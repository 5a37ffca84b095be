use std::time::Duration;

use runway_test_utils::{Behavior, ScriptedAdapter, spec_preferring};
use runway_types::{ExecutionPolicy, FailureCause, HealthState};

use super::{adapters_of, harness};

#[tokio::test(start_paused = true)]
async fn healthy_candidates_take_turns() {
    let a = ScriptedAdapter::new("a").into_arc();
    let b = ScriptedAdapter::new("b").into_arc();
    let h = harness(&[a.clone(), b.clone()], ExecutionPolicy::LoadBalance);
    h.monitor.force_probe_all().await;

    let first = h.run(spec_preferring("digest", &["a", "b"])).await;
    let second = h.run(spec_preferring("digest", &["a", "b"])).await;

    assert_eq!(adapters_of(&first), vec!["a"]);
    assert_eq!(adapters_of(&second), vec!["b"]);
    assert_eq!(a.submit_count(), 1);
    assert_eq!(b.submit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn business_failures_do_not_fall_back() {
    let a = ScriptedAdapter::new("a")
        .always(Behavior::FailAfter(Duration::ZERO, "bad input".into()))
        .into_arc();
    let b = ScriptedAdapter::new("b").into_arc();
    let h = harness(&[a, b.clone()], ExecutionPolicy::LoadBalance);
    h.monitor.force_probe_all().await;

    let result = h.run(spec_preferring("digest", &["a", "b"])).await;

    assert_eq!(result.failure_cause(), Some(FailureCause::AllAttemptsFailed));
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(b.submit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unavailability_falls_back_to_the_rest() {
    let a = ScriptedAdapter::new("a").always(Behavior::unavailable()).into_arc();
    let b = ScriptedAdapter::new("b").into_arc();
    let h = harness(&[a, b], ExecutionPolicy::LoadBalance);
    h.monitor.force_probe_all().await;

    let result = h.run(spec_preferring("digest", &["a", "b"])).await;

    assert!(result.is_success());
    assert_eq!(adapters_of(&result), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn after_the_chosen_candidate_any_failure_moves_on() {
    let a = ScriptedAdapter::new("a").always(Behavior::unavailable()).into_arc();
    let b = ScriptedAdapter::new("b")
        .always(Behavior::FailAfter(Duration::ZERO, "bad".into()))
        .into_arc();
    let c = ScriptedAdapter::new("c").into_arc();
    let h = harness(&[a, b, c.clone()], ExecutionPolicy::LoadBalance);
    h.monitor.force_probe_all().await;

    let result = h.run(spec_preferring("digest", &["a", "b", "c"])).await;

    assert!(result.is_success());
    assert_eq!(adapters_of(&result), vec!["a", "b", "c"]);
    assert_eq!(c.submit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn without_healthy_candidates_it_behaves_as_failover() {
    let a = ScriptedAdapter::new("a")
        .with_probes([HealthState::Degraded])
        .always(Behavior::FailAfter(Duration::ZERO, "bad".into()))
        .into_arc();
    let b = ScriptedAdapter::new("b")
        .with_probes([HealthState::Degraded])
        .into_arc();
    let h = harness(&[a, b], ExecutionPolicy::LoadBalance);
    h.monitor.force_probe_all().await;

    let result = h.run(spec_preferring("digest", &["a", "b"])).await;

    assert!(result.is_success());
    assert_eq!(adapters_of(&result), vec!["a", "b"]);
}
