mod agent_cmd;
mod client;
mod daemon;
mod doctor;
mod spec_cmd;

use anyhow::Result;
use console::style;

use crate::config::RunwayConfig;
use crate::core::terminal::{GuideSection, print_banner, print_error};
use client::GatewayClient;

/// Flags that consume the following argument as their value.
const VALUE_FLAGS: &[&str] = &[
    "--api-url",
    "--payload",
    "--timeout",
    "--limit",
    "--count",
    "--tz",
    "--owner",
    "--feed",
    "--topic",
    "--cron",
    "--channel",
    "--format",
    "--origin",
];

/// Positional arguments and flags after the command words.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct CommandArgs {
    pub positional: Vec<String>,
    flags: Vec<(String, String)>,
    switches: Vec<String>,
}

impl CommandArgs {
    pub fn parse(args: &[String], start: usize) -> Self {
        let mut parsed = Self::default();
        let mut i = start;
        while i < args.len() {
            let arg = args[i].as_str();
            if VALUE_FLAGS.contains(&arg) {
                if i + 1 < args.len() {
                    parsed.flags.push((arg.to_string(), args[i + 1].clone()));
                    i += 2;
                } else {
                    i += 1;
                }
            } else if arg.starts_with("--") || (arg.starts_with('-') && arg.len() == 2) {
                parsed.switches.push(arg.to_string());
                i += 1;
            } else {
                parsed.positional.push(arg.to_string());
                i += 1;
            }
        }
        parsed
    }

    /// Last occurrence wins.
    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .rev()
            .find(|(flag, _)| flag == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn switch(&self, names: &[&str]) -> bool {
        self.switches.iter().any(|s| names.contains(&s.as_str()))
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.positional.get(index).map(String::as_str)
    }

    pub fn parsed_flag<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.flag(name) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| anyhow::anyhow!("Invalid value for {name}: '{raw}'")),
            None => Ok(None),
        }
    }
}

fn print_help() {
    print_banner();
    GuideSection::new("Gateway")
        .command("runway gateway start", "Start the gateway in the background")
        .command("runway gateway stop", "Stop the background gateway")
        .command("runway gateway restart", "Restart the background gateway")
        .command("runway gateway status", "Show whether the gateway is running")
        .command("runway gateway run", "Run the gateway in the foreground")
        .command("runway logs", "Follow the gateway log")
        .print();
    println!();
    GuideSection::new("Agents")
        .command("runway agent list", "List stored specifications")
        .command("runway agent create <file>", "Store a new specification (.json/.yaml)")
        .command("runway agent update <id> <file>", "Replace a specification")
        .command("runway agent show <id>", "Print the current specification")
        .command("runway agent delete <id>", "Remove a specification")
        .command("runway agent run <id>", "Execute now (--payload, --timeout, --detach)")
        .command("runway agent status <id>", "Health, success rate and in-flight runs")
        .command("runway agent versions <id>", "List stored versions")
        .command("runway agent results <id>", "Recent execution results (--limit)")
        .print();
    println!();
    GuideSection::new("Runtimes & Triggers")
        .command("runway runtimes", "Show adapters, health and capacity (--probe)")
        .command("runway triggers", "List bindings served by external collaborators")
        .print();
    println!();
    GuideSection::new("Offline Tools")
        .command("runway validate <file>", "Check a specification without a gateway")
        .command("runway schedule <cron>", "Preview fire times (--tz, --count)")
        .command("runway template feed-digest <id>", "Scaffold a feed digest agent")
        .command("runway template content <id>", "Scaffold a content generator agent")
        .command("runway doctor", "Check container CLIs and the workflow API")
        .blank()
        .text(&format!(
            "Gateway commands accept {} to target another instance.",
            style("--api-url <url>").cyan()
        ))
        .print();
    println!();
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = RunwayConfig::load()?;
    let command = args.get(1).map(String::as_str).unwrap_or("");

    match command {
        "gateway" => {
            let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
            match sub_cmd {
                "start" => daemon::gateway_start(&config).await,
                "stop" => daemon::gateway_stop().await,
                "restart" => daemon::gateway_restart(&config).await,
                "status" => daemon::gateway_status(&config).await,
                "run" => daemon::gateway_run(config).await,
                _ => {
                    print_error(
                        "Unknown or missing gateway command. Expected: start, stop, restart, status, run",
                    );
                    Ok(())
                }
            }
        }
        "logs" => daemon::follow_logs().await,
        "agent" | "agents" => {
            let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
            let rest = CommandArgs::parse(&args, 3);
            agent_cmd::run_agent_command(sub_cmd, &rest, &client_for(&config, &rest)).await
        }
        "runtimes" => {
            let rest = CommandArgs::parse(&args, 2);
            agent_cmd::show_runtimes(&client_for(&config, &rest), rest.switch(&["--probe"])).await
        }
        "triggers" => {
            let rest = CommandArgs::parse(&args, 2);
            agent_cmd::show_external_triggers(&client_for(&config, &rest)).await
        }
        "validate" => spec_cmd::validate_file(&CommandArgs::parse(&args, 2)),
        "schedule" => spec_cmd::preview_schedule(&CommandArgs::parse(&args, 2)),
        "template" => spec_cmd::scaffold(&CommandArgs::parse(&args, 2)),
        "doctor" => doctor::run_doctor(&config).await,
        "--version" | "-V" | "version" => {
            println!("runway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "" | "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{other}'."));
            print_help();
            Ok(())
        }
    }
}

fn client_for(config: &RunwayConfig, args: &CommandArgs) -> GatewayClient {
    let base_url = args
        .flag("--api-url")
        .map(str::to_string)
        .unwrap_or_else(|| config.gateway.base_url());
    GatewayClient::new(base_url, config.gateway.api_token.clone())
}
