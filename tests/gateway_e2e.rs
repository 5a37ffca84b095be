
use gateway_harness::{GatewayHarness, TestResult, is_sandbox_error, run_cli};
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde_json::{Value, json};
use sha2::Sha256;
use std::time::Duration;

fn shouting_spec(id: &str, input_key: &str) -> Value {
    json!({
        "id": id,
        "name": "Shout",
        "owner": "ops",
        "steps": [{
            "id": "shout",
            "action": {"type": "transform_data"},
            "config": {"operation": "upper", "input_key": input_key}
        }]
    })
}

macro_rules! spawn_or_skip {
    ($spawn:expr) => {
        match $spawn.await {
            Ok(gateway) => gateway,
            Err(err) if is_sandbox_error(err.as_ref()) => {
                eprintln!("Skipping gateway E2E test: socket bind not permitted");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    };
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agents_execute_and_survive_a_restart() -> TestResult<()> {
    let gateway = spawn_or_skip!(GatewayHarness::spawn());

    let (status, _) = gateway
        .request(Method::POST, "/api/agents", Some(shouting_spec("shout", "trigger.text")))
        .await?;
    assert_eq!(status, 201);

    let (status, body) = gateway
        .request(
            Method::POST,
            "/api/agents/shout/execute",
            Some(json!({"payload": {"text": "ship it"}})),
        )
        .await?;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["result"]["outcome"]["state"], "succeeded");
    assert_eq!(body["result"]["outcome"]["adapter"], "local");

    let data_dir = gateway.stop();
    let gateway = spawn_or_skip!(GatewayHarness::spawn_in(data_dir));

    let (status, body) = gateway.request(Method::GET, "/api/agents/shout", None).await?;
    assert_eq!(status, 200);
    assert_eq!(body["version"], 1);
    let (_, body) = gateway
        .request(Method::GET, "/api/agents/shout/results", None)
        .await?;
    assert_eq!(body["results"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn management_routes_require_the_configured_token() -> TestResult<()> {
    let gateway = spawn_or_skip!(GatewayHarness::spawn());
    let resp = reqwest::get(format!("{}/api/agents", gateway.api_base)).await?;
    assert_eq!(resp.status().as_u16(), 401);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signed_webhooks_run_the_bound_agent() -> TestResult<()> {
    let gateway = spawn_or_skip!(GatewayHarness::spawn());
    let mut spec = shouting_spec("orders", "trigger.body.text");
    spec["triggers"] = json!([{"kind": {"type": "webhook", "path": "/orders", "secret": "s3cret"}}]);
    let (status, body) = gateway.request(Method::POST, "/api/agents", Some(spec)).await?;
    assert_eq!(status, 201, "{body}");

    let payload = r#"{"text":"new order"}"#;
    assert_eq!(gateway.post_raw("/api/hooks/orders", payload, &[]).await?, 401);

    let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret")?;
    mac.update(payload.as_bytes());
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    let status = gateway
        .post_raw(
            "/api/hooks/orders",
            payload,
            &[("x-hub-signature-256", signature.as_str())],
        )
        .await?;
    assert_eq!(status, 202);

    for _ in 0..50 {
        let (_, body) = gateway
            .request(Method::GET, "/api/agents/orders/results", None)
            .await?;
        if let Some(result) = body["results"].as_array().and_then(|r| r.first()) {
            assert_eq!(result["origin"], "webhook");
            assert_eq!(result["outcome"]["state"], "succeeded");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err("webhook execution was never recorded".into())
}

#[test]
fn validate_exits_non_zero_for_invalid_files() -> TestResult<()> {
    let dir = tempfile::tempdir()?;
    let valid = dir.path().join("valid.json");
    std::fs::write(&valid, shouting_spec("ok", "trigger.text").to_string())?;
    let invalid = dir.path().join("invalid.yaml");
    std::fs::write(&invalid, "id: broken\nname: Broken\nowner: ops\nsteps: []\n")?;

    let out = run_cli(dir.path(), &["validate", valid.to_str().unwrap_or_default()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = run_cli(dir.path(), &["validate", invalid.to_str().unwrap_or_default()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("steps"));
    Ok(())
}

#[test]
fn schedule_preview_prints_the_requested_fire_times() -> TestResult<()> {
    let dir = tempfile::tempdir()?;
    let out = run_cli(
        dir.path(),
        &["schedule", "0 9 * * 1", "--tz", "Europe/Berlin", "--count", "3"],
    );
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Next 3 fire time(s)"));
    assert_eq!(stdout.matches("UTC").count(), 3);
    Ok(())
}
