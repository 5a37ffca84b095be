use proptest::prelude::*;
use serde_json::json;

use crate::spec::parse_input_ref;
use crate::*;

const DOCUMENT: &str = r#"{
  "id": "feed-digest",
  "name": "Feed digest",
  "owner": "ops",
  "rollout": {"canary": true, "percent": 10},
  "triggers": [
    {"kind": {"type": "schedule", "cron_expression": "0 9,15,20 * * *"}, "jitter_secs": 5}
  ],
  "steps": [
    {"id": "fetch", "action": {"type": "parse_feed"}, "config": {"url": "https://example.com/rss"}, "cache": "1h"},
    {"id": "wait", "action": {"type": "delay", "duration_secs": 2}, "inputs": ["step:fetch:items"]}
  ],
  "runtime_preferences": ["local", "docker"]
}"#;

#[test]
fn unknown_fields_survive_json_round_trip() {
    let spec = AgentSpecification::from_json(DOCUMENT).expect("parse");
    assert_eq!(spec.extra.get("rollout"), Some(&json!({"canary": true, "percent": 10})));
    assert_eq!(spec.triggers[0].extra.get("jitter_secs"), Some(&json!(5)));
    assert_eq!(spec.steps[0].extra.get("cache"), Some(&json!("1h")));

    let reloaded = AgentSpecification::from_json(&spec.to_json().expect("encode")).expect("reparse");
    assert_eq!(reloaded, spec);
}

#[test]
fn nested_unknown_fields_survive_round_trips() {
    let document = json!({
        "id": "nested",
        "metadata": {"version": "2.0.0", "team": "ops"},
        "sla": {"max_execution_time": 60, "burst": 3},
        "triggers": [
            {"kind": {"type": "manual", "future_kind_field": {"a": 1}}},
            {"kind": {"type": "webhook", "path": "hooks/in", "verify_tls": false}}
        ],
        "steps": [
            {"id": "fetch", "action": {"type": "http_request", "future_opt": true}},
            {"id": "pause", "action": {"type": "delay", "duration_secs": 1, "jitter": "50ms"}}
        ]
    });
    let spec = AgentSpecification::from_json(&document.to_string()).expect("parse");
    assert_eq!(spec.metadata.version, "2.0.0");
    assert_eq!(spec.metadata.extra.get("team"), Some(&json!("ops")));
    assert_eq!(spec.sla.extra.get("burst"), Some(&json!(3)));
    assert_eq!(*spec.triggers[0].kind, TriggerKind::Manual);
    assert_eq!(
        spec.triggers[1].kind.extra.get("verify_tls"),
        Some(&json!(false))
    );
    assert_eq!(*spec.steps[0].action, StepAction::HttpRequest);
    assert_eq!(spec.steps[1].action.extra.get("jitter"), Some(&json!("50ms")));
    assert!(!spec.steps[1].action.extra.contains_key("duration_secs"));

    let back: serde_json::Value =
        serde_json::from_str(&spec.to_json().expect("encode")).expect("json");
    assert_eq!(back["metadata"]["team"], "ops");
    assert_eq!(back["sla"]["burst"], 3);
    assert_eq!(back["triggers"][0]["kind"]["type"], "manual");
    assert_eq!(back["triggers"][0]["kind"]["future_kind_field"], json!({"a": 1}));
    assert_eq!(back["triggers"][1]["kind"]["verify_tls"], false);
    assert_eq!(back["steps"][0]["action"]["future_opt"], true);
    assert_eq!(back["steps"][1]["action"]["duration_secs"], 1);

    let from_yaml = AgentSpecification::from_yaml(&spec.to_yaml().expect("yaml")).expect("reparse");
    assert_eq!(from_yaml, spec);
    assert_eq!(from_yaml.content_hash(), spec.content_hash());
}

#[test]
fn unknown_fields_survive_yaml_round_trip() {
    let spec = AgentSpecification::from_json(DOCUMENT).expect("parse");
    let yaml = spec.to_yaml().expect("yaml");
    assert!(yaml.contains("rollout"), "yaml output lost the extension block:\n{yaml}");
    let reloaded = AgentSpecification::from_yaml(&yaml).expect("reparse yaml");
    assert_eq!(reloaded, spec);
}

#[test]
fn missing_optional_sections_take_defaults() {
    let spec = AgentSpecification::from_json(
        r#"{"id": "a", "name": "A", "owner": "o", "steps": [{"id": "s", "action": {"type": "http_request"}}]}"#,
    )
    .expect("parse");
    assert_eq!(
        spec.runtime_preferences,
        vec![BackendId::local(), BackendId::new("n8n")]
    );
    assert_eq!(spec.sla.max_execution_time, 300);
    assert_eq!(spec.sla.priority, Priority::Normal);
    assert_eq!(spec.metadata.version, "1.0.0");
    assert!(spec.triggers.is_empty());
    assert!(spec.steps[0].retry.max_attempts == 1);
}

#[test]
fn content_hash_tracks_document_changes() {
    let spec = AgentSpecification::from_json(DOCUMENT).expect("parse");
    let same = AgentSpecification::from_json(DOCUMENT).expect("parse");
    assert_eq!(spec.content_hash(), same.content_hash());
    assert_eq!(spec.content_hash().len(), 64);

    let mut changed = spec.clone();
    changed.extra.insert("rollout".into(), json!({"canary": false}));
    assert_ne!(spec.content_hash(), changed.content_hash());
}

#[test]
fn required_kinds_and_first_unsupported() {
    let spec = AgentSpecification::from_json(DOCUMENT).expect("parse");
    let kinds = spec.required_kinds();
    assert!(kinds.contains(&StepKind::ParseFeed));
    assert!(kinds.contains(&StepKind::Delay));
    assert_eq!(kinds.len(), 2);

    let only_delay = [StepKind::Delay].into_iter().collect();
    assert_eq!(
        spec.first_unsupported(&only_delay).map(|s| s.id.as_str()),
        Some("fetch")
    );
    assert_eq!(
        ensure_supported(&spec, &only_delay),
        Err(SubmitError::UnsupportedCapability {
            step_id: "fetch".into()
        })
    );
    assert!(ensure_supported(&spec, &StepKind::all()).is_ok());
}

#[test]
fn step_kind_names_match_serde_tags() {
    for kind in StepKind::ALL {
        let encoded = serde_json::to_value(kind).expect("encode");
        assert_eq!(encoded, json!(kind.as_str()));
        assert_eq!(StepKind::from_name(kind.as_str()), Some(kind));
    }
}

#[test]
fn submit_errors_map_to_failure_reasons() {
    let reason: FailureReason = SubmitError::Unavailable("refused".into()).into();
    assert!(reason.is_unavailability_class());
    let reason: FailureReason = SubmitError::Transient("503".into()).into();
    assert!(!reason.is_unavailability_class());

    assert!(AttemptOutcome::Timeout.warrants_fallback());
    assert!(
        !AttemptOutcome::Failure {
            reason: FailureReason::ExecutionFailure {
                message: "bad input".into()
            }
        }
        .warrants_fallback()
    );
}

#[test]
fn step_context_resolves_prior_outputs() {
    let mut ctx = StepContext::default();
    ctx.outputs
        .insert("fetch".into(), json!({"items": [1, 2, 3]}));
    assert_eq!(ctx.resolve("step:fetch:items"), Some(&json!([1, 2, 3])));
    assert_eq!(ctx.resolve("step:fetch:missing"), None);
    assert_eq!(ctx.resolve("fetch:items"), None);
}

#[test]
fn policy_defaults_to_failover() {
    assert_eq!(ExecutionPolicy::default(), ExecutionPolicy::Failover);
    let redundant: ExecutionPolicy =
        serde_json::from_value(json!({"mode": "redundant"})).expect("decode");
    assert_eq!(redundant, ExecutionPolicy::Redundant { fanout: 2 });
}

proptest! {
    #[test]
    fn input_refs_split_on_first_separator(id in "[a-z][a-z0-9_-]{0,12}", key in "[a-z][a-z0-9_:]{0,12}") {
        let reference = format!("step:{id}:{key}");
        prop_assert_eq!(parse_input_ref(&reference), Some((id.as_str(), key.as_str())));
    }
}
