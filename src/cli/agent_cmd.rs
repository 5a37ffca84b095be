use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use serde_json::{Value, json};

use super::CommandArgs;
use super::client::GatewayClient;
use super::spec_cmd::load_spec_file;
use crate::core::terminal::{GuideSection, health_label, print_error, print_info};

const AGENT_USAGE: &str = "Usage: runway agent <list|create|update|show|delete|run|status|versions|results> [id] [file]";

pub async fn run_agent_command(
    sub_cmd: &str,
    args: &CommandArgs,
    client: &GatewayClient,
) -> Result<()> {
    match sub_cmd {
        "list" | "ls" => list(client).await,
        "create" => {
            let Some(file) = args.arg(0) else {
                bail!("Usage: runway agent create <file>");
            };
            create(client, Path::new(file)).await
        }
        "update" => {
            let (Some(id), Some(file)) = (args.arg(0), args.arg(1)) else {
                bail!("Usage: runway agent update <id> <file>");
            };
            update(client, id, Path::new(file)).await
        }
        "show" | "get" => show(client, require_id(args)?).await,
        "delete" | "remove" => {
            let id = require_id(args)?;
            let reply = client.delete(&format!("/api/agents/{id}")).await?;
            reply.report(&format!("Agent '{id}' deleted."));
            Ok(())
        }
        "run" | "execute" => run(client, require_id(args)?, args).await,
        "status" => status(client, require_id(args)?).await,
        "versions" => versions(client, require_id(args)?).await,
        "results" => {
            let limit = args.parsed_flag::<usize>("--limit")?.unwrap_or(10);
            results(client, require_id(args)?, limit).await
        }
        _ => {
            println!("{}", style(AGENT_USAGE).bold());
            println!("  Options: --api-url <url>");
            Ok(())
        }
    }
}

fn require_id(args: &CommandArgs) -> Result<&str> {
    match args.arg(0) {
        Some(id) => Ok(id),
        None => bail!("Missing agent id. {AGENT_USAGE}"),
    }
}

fn spec_body(path: &Path) -> Result<Value> {
    let spec = load_spec_file(path)?;
    Ok(serde_json::to_value(spec)?)
}

async fn list(client: &GatewayClient) -> Result<()> {
    let reply = client.get("/api/agents").await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    let agents = reply.body["agents"].as_array().cloned().unwrap_or_default();
    if agents.is_empty() {
        print_info("No agents stored yet. Create one with 'runway agent create <file>'.");
        return Ok(());
    }
    let mut section = GuideSection::new("Agents");
    for agent in &agents {
        let triggers = agent["triggers"]
            .as_array()
            .map(|t| {
                t.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        section = section.command(
            agent["id"].as_str().unwrap_or("?"),
            &format!(
                "{} {} {} step(s) {}",
                agent["name"].as_str().unwrap_or(""),
                style(format!("v{}", agent["version"])).dim(),
                agent["steps"],
                style(format!("[{triggers}]")).dim()
            ),
        );
    }
    section.print();
    println!();
    Ok(())
}

async fn create(client: &GatewayClient, file: &Path) -> Result<()> {
    let body = spec_body(file)?;
    let reply = client.post("/api/agents", Some(&body)).await?;
    let id = reply.body["id"].as_str().unwrap_or_default().to_string();
    reply.report(&format!("Agent '{id}' created."));
    Ok(())
}

async fn update(client: &GatewayClient, id: &str, file: &Path) -> Result<()> {
    let body = spec_body(file)?;
    let reply = client.put(&format!("/api/agents/{id}"), &body).await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    let outcome = &reply.body["outcome"];
    match outcome["status"].as_str() {
        Some("unchanged") => print_info(&format!("Agent '{id}' is unchanged.")),
        _ => {
            reply.report(&format!(
                "Agent '{id}' updated to version {}.",
                outcome["version"]
            ));
        }
    }
    Ok(())
}

async fn show(client: &GatewayClient, id: &str) -> Result<()> {
    let reply = client.get(&format!("/api/agents/{id}")).await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    GuideSection::new(&format!("Agent {id}"))
        .status("Version", &reply.body["version"].to_string())
        .status("Content hash", reply.body["content_hash"].as_str().unwrap_or(""))
        .status("Updated", reply.body["updated_at"].as_str().unwrap_or(""))
        .print();
    println!();
    println!("{}", serde_yaml::to_string(&reply.body["agent"])?);
    Ok(())
}

async fn run(client: &GatewayClient, id: &str, args: &CommandArgs) -> Result<()> {
    let payload: Value = match args.flag("--payload") {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("--payload must be JSON: {e}"))?,
        None => Value::Null,
    };
    let mut body = json!({ "payload": payload });
    if let Some(secs) = args.parsed_flag::<u64>("--timeout")? {
        body["timeout_secs"] = json!(secs);
    }
    if let Some(origin) = args.flag("--origin") {
        body["origin"] = json!(origin);
    }
    let detach = args.switch(&["--detach", "-d"]);
    body["wait"] = json!(!detach);

    let reply = client
        .post(&format!("/api/agents/{id}/execute"), Some(&body))
        .await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    if detach {
        reply.report(&format!(
            "Queued request {} for '{id}'.",
            reply.body["request_id"].as_str().unwrap_or("?")
        ));
        return Ok(());
    }
    print_result(&reply.body["result"]);
    Ok(())
}

fn print_result(result: &Value) {
    let outcome = &result["outcome"];
    let mut section = GuideSection::new("Execution Result")
        .status("Request", result["request_id"].as_str().unwrap_or("?"))
        .status("Origin", result["origin"].as_str().unwrap_or("?"));
    section = match outcome["state"].as_str() {
        Some("succeeded") => section
            .status("Outcome", &style("SUCCEEDED").green().bold().to_string())
            .status("Adapter", outcome["adapter"].as_str().unwrap_or("?")),
        _ => section
            .status("Outcome", &style("FAILED").red().bold().to_string())
            .status("Cause", outcome["cause"].as_str().unwrap_or("?")),
    };
    for attempt in result["attempts"].as_array().into_iter().flatten() {
        section = section.text(&format!(
            "{} {} {}",
            style("attempt").dim(),
            attempt["adapter"].as_str().unwrap_or("?"),
            style(attempt["outcome"]["status"].as_str().unwrap_or("?")).dim()
        ));
    }
    section.print();
    if outcome["state"] == "succeeded" && !outcome["output"].is_null() {
        println!();
        println!("{:#}", outcome["output"]);
    }
    println!();
}

async fn status(client: &GatewayClient, id: &str) -> Result<()> {
    let reply = client.get(&format!("/api/agents/{id}/status")).await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    let status = &reply.body["status"];
    let success_rate = status["success_rate"]
        .as_f64()
        .map(|rate| format!("{:.0}%", rate * 100.0))
        .unwrap_or_else(|| "n/a".to_string());
    let mut section = GuideSection::new(&format!("Agent {id}"))
        .status("Version", &status["version"].to_string())
        .status(
            "Active",
            if status["active"].as_bool() == Some(true) {
                "yes"
            } else {
                "no"
            },
        )
        .status("Success rate", &success_rate)
        .status("In flight", &status["in_flight"].to_string());
    if let Some(health) = status["health"].as_object() {
        section = section.blank();
        for (adapter, state) in health {
            section = section.status(adapter, &health_label(state.as_str().unwrap_or("unknown")));
        }
    }
    section.print();
    println!();
    Ok(())
}

async fn versions(client: &GatewayClient, id: &str) -> Result<()> {
    let reply = client.get(&format!("/api/agents/{id}/versions")).await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    let mut section = GuideSection::new(&format!("Versions of {id}"));
    for version in reply.body["versions"].as_array().into_iter().flatten() {
        section = section.status(
            &format!("v{}", version["version"]),
            &format!(
                "{} {}",
                version["stored_at"].as_str().unwrap_or(""),
                style(version["content_hash"].as_str().unwrap_or("")).dim()
            ),
        );
    }
    section.print();
    println!();
    Ok(())
}

async fn results(client: &GatewayClient, id: &str, limit: usize) -> Result<()> {
    let reply = client
        .get(&format!("/api/agents/{id}/results?limit={limit}"))
        .await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    let results = reply.body["results"].as_array().cloned().unwrap_or_default();
    if results.is_empty() {
        print_info(&format!("No results recorded for '{id}' yet."));
        return Ok(());
    }
    let mut section = GuideSection::new(&format!("Recent results of {id}"));
    for result in &results {
        let outcome = &result["outcome"];
        let label = match outcome["state"].as_str() {
            Some("succeeded") => style("OK").green().bold().to_string(),
            _ => style("FAILED").red().bold().to_string(),
        };
        section = section.status(
            result["finished_at"].as_str().unwrap_or("?"),
            &format!(
                "{label} {} {}",
                result["origin"].as_str().unwrap_or("?"),
                style(outcome["adapter"].as_str().unwrap_or("")).dim()
            ),
        );
    }
    section.print();
    println!();
    Ok(())
}

pub async fn show_runtimes(client: &GatewayClient, probe: bool) -> Result<()> {
    if probe {
        let reply = client.post("/api/runtimes/probe", None).await?;
        if !reply.succeeded() {
            print_error(&format!("Error: {}", reply.error()));
            return Ok(());
        }
    }
    let reply = client.get("/api/runtimes").await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    let mut section = GuideSection::new("Runtimes");
    for runtime in reply.body["runtimes"].as_array().into_iter().flatten() {
        let health = health_label(runtime["health"].as_str().unwrap_or("unknown"));
        section = section.status(
            runtime["id"].as_str().unwrap_or("?"),
            &format!(
                "{health} {}/{} slots free {}",
                runtime["available"],
                runtime["capacity"],
                style(
                    runtime["last_probe"]
                        .as_str()
                        .map(|at| format!("probed {at}"))
                        .unwrap_or_else(|| "not probed yet".into())
                )
                .dim()
            ),
        );
    }
    section.print();
    println!();
    Ok(())
}

pub async fn show_external_triggers(client: &GatewayClient) -> Result<()> {
    let reply = client.get("/api/triggers/external").await?;
    if !reply.succeeded() {
        print_error(&format!("Error: {}", reply.error()));
        return Ok(());
    }
    let bindings = reply.body["bindings"].as_array().cloned().unwrap_or_default();
    if bindings.is_empty() {
        print_info("No file-watch or queue triggers are registered.");
        return Ok(());
    }
    let mut section = GuideSection::new("External Triggers")
        .text("Deliver these through POST /api/agents/<id>/execute with an origin.")
        .blank();
    for binding in &bindings {
        section = section.status(
            binding["spec_id"].as_str().unwrap_or("?"),
            &format!(
                "{} {}",
                style(binding["kind"].as_str().unwrap_or("?")).cyan(),
                binding["target"].as_str().unwrap_or("?")
            ),
        );
    }
    section.print();
    println!();
    Ok(())
}
