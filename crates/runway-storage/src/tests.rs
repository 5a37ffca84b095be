use chrono::{Duration, Utc};
use runway_test_utils::simple_spec;
use runway_types::{
    AttemptOutcome, BackendId, ExecutionAttempt, ExecutionResult, FailureCause, RequestOutcome,
    TriggerOrigin,
};
use serde_json::json;
use uuid::Uuid;

use super::*;

fn result_for(spec_id: &str, age_minutes: i64, outcome: RequestOutcome) -> ExecutionResult {
    let finished = Utc::now() - Duration::minutes(age_minutes);
    let request_id = Uuid::new_v4();
    ExecutionResult {
        request_id,
        spec_id: spec_id.into(),
        origin: TriggerOrigin::Manual,
        attempts: vec![ExecutionAttempt {
            execution_id: Uuid::new_v4(),
            request_id,
            spec_id: spec_id.into(),
            adapter: BackendId::local(),
            ordinal: 1,
            started_at: finished,
            ended_at: finished,
            outcome: AttemptOutcome::Success,
        }],
        outcome,
        started_at: finished,
        finished_at: finished,
    }
}

#[tokio::test]
async fn insert_then_get_round_trips_document() {
    let store = SpecStore::open_in_memory().unwrap();
    let mut spec = simple_spec("digest");
    spec.extra.insert("x-team".into(), json!("platform"));

    let stored = store.insert_spec(&spec).await.unwrap();
    assert_eq!(stored.version, 1);

    let loaded = store.get_spec("digest").await.unwrap().expect("stored");
    assert_eq!(loaded.spec, spec);
    assert_eq!(loaded.content_hash, spec.content_hash());
    assert!(loaded.active);
}

#[tokio::test]
async fn duplicate_ids_conflict() {
    let store = SpecStore::open_in_memory().unwrap();
    store.insert_spec(&simple_spec("a")).await.unwrap();
    assert!(matches!(
        store.insert_spec(&simple_spec("a")).await,
        Err(StoreError::Conflict(id)) if id == "a"
    ));
}

#[tokio::test]
async fn replacing_identical_content_keeps_version() {
    let store = SpecStore::open_in_memory().unwrap();
    let spec = simple_spec("a");
    store.insert_spec(&spec).await.unwrap();

    assert_eq!(
        store.replace_spec(&spec).await.unwrap(),
        SaveOutcome::Unchanged { version: 1 }
    );

    let mut changed = spec.clone();
    changed.name = "renamed".into();
    assert_eq!(
        store.replace_spec(&changed).await.unwrap(),
        SaveOutcome::Saved { version: 2 }
    );
    assert_eq!(
        store.replace_spec(&changed).await.unwrap(),
        SaveOutcome::Unchanged { version: 2 }
    );

    let versions = store.spec_versions("a").await.unwrap();
    assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), vec![1, 2]);
    let first = store.spec_version_document("a", 1).await.unwrap().unwrap();
    assert_eq!(first.name, spec.name);
}

#[tokio::test]
async fn soft_delete_hides_but_keeps_document() {
    let store = SpecStore::open_in_memory().unwrap();
    store.insert_spec(&simple_spec("a")).await.unwrap();
    store.insert_spec(&simple_spec("b")).await.unwrap();

    assert!(store.deactivate_spec("a").await.unwrap());
    assert!(!store.deactivate_spec("a").await.unwrap());
    assert!(!store.deactivate_spec("missing").await.unwrap());

    let active: Vec<String> = store
        .list_specs(false)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.spec.id)
        .collect();
    assert_eq!(active, vec!["b"]);
    assert_eq!(store.list_specs(true).await.unwrap().len(), 2);

    let kept = store.get_spec("a").await.unwrap().expect("still stored");
    assert!(!kept.active);
    assert!(matches!(
        store.replace_spec(&simple_spec("a")).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.insert_spec(&simple_spec("a")).await,
        Err(StoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn results_are_listed_newest_first() {
    let store = SpecStore::open_in_memory().unwrap();
    store.insert_spec(&simple_spec("a")).await.unwrap();

    let old = result_for(
        "a",
        90,
        RequestOutcome::Failed {
            cause: FailureCause::AllAttemptsFailed,
        },
    );
    let new = result_for(
        "a",
        5,
        RequestOutcome::Succeeded {
            adapter: BackendId::local(),
            output: json!({"items": 3}),
        },
    );
    store.record_result(&old).await.unwrap();
    store.record_result(&new).await.unwrap();

    let recent = store.recent_results("a", 10).await.unwrap();
    assert_eq!(recent, vec![new.clone(), old.clone()]);
    assert_eq!(store.recent_results("a", 1).await.unwrap(), vec![new.clone()]);

    let since = store
        .results_since(Utc::now() - Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(since, vec![new]);
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("runway.db");
    {
        let store = SpecStore::open(&path).await.unwrap();
        store.insert_spec(&simple_spec("persisted")).await.unwrap();
    }
    let reopened = SpecStore::open(&path).await.unwrap();
    assert!(reopened.get_spec("persisted").await.unwrap().is_some());
}
