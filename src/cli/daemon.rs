use anyhow::{Context, Result};
use console::style;
use runway_storage::SpecStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::RunwayConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::runtime::RuntimeHost;
use crate::core::terminal::{GuideSection, print_error, print_goodbye, print_info, print_warn};
use crate::interfaces::web::ApiServer;
use crate::logging;
use crate::platform::{self, NativePlatform, Platform};

const STOP_WAIT: Duration = Duration::from_secs(10);

/// Pid recorded in `pid_file`, if that process is still alive.
fn running_pid(pid_file: &Path) -> Option<String> {
    let pid = read_pid(pid_file)?;
    NativePlatform::process_alive(&pid).then_some(pid)
}

fn read_pid(pid_file: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(pid_file).ok()?;
    let pid = raw.trim();
    (!pid.is_empty() && pid.chars().all(|c| c.is_ascii_digit())).then(|| pid.to_string())
}

pub async fn gateway_start(config: &RunwayConfig) -> Result<()> {
    let run_dir = platform::run_dir();
    let pid_file = platform::pid_file();
    std::fs::create_dir_all(&run_dir)?;
    NativePlatform::restrict_dir_permissions(&run_dir);

    if let Some(pid) = running_pid(&pid_file) {
        print_warn(&format!(
            "Gateway is already running (PID {pid}). Use 'runway gateway stop' first."
        ));
        return Ok(());
    }
    // Left behind by a gateway that did not exit cleanly.
    std::fs::remove_file(&pid_file).ok();

    let log_path = platform::log_file();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;
    NativePlatform::restrict_file_permissions(&log_path);

    let exe = std::env::current_exe()?;
    let child = std::process::Command::new(exe)
        .arg("gateway")
        .arg("run")
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()
        .context("Failed to spawn the gateway process")?;

    std::fs::write(&pid_file, child.id().to_string())?;
    NativePlatform::restrict_file_permissions(&pid_file);

    GuideSection::new("Gateway Started")
        .status(
            "Status",
            &format!(
                "{} (PID {})",
                style("RUNNING").green().bold(),
                style(child.id()).dim()
            ),
        )
        .status("API Endpoint", &config.gateway.base_url())
        .status("Database", &config.database_path().display().to_string())
        .blank()
        .info(&format!(
            "Run {} to follow the log.",
            style("runway logs").cyan().bold()
        ))
        .print();
    println!();

    Ok(())
}

pub async fn gateway_stop() -> Result<()> {
    let pid_file = platform::pid_file();
    match running_pid(&pid_file) {
        Some(pid) => {
            NativePlatform::kill_process(&pid)?;
            let deadline = tokio::time::Instant::now() + STOP_WAIT;
            while NativePlatform::process_alive(&pid) && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if NativePlatform::process_alive(&pid) {
                print_warn(&format!(
                    "Gateway (PID {pid}) is still draining after {}s.",
                    STOP_WAIT.as_secs()
                ));
            }
            GuideSection::new("Gateway Stopped")
                .status(
                    "Status",
                    &format!(
                        "{} (was PID {})",
                        style("STOPPED").red().bold(),
                        style(&pid).dim()
                    ),
                )
                .print();
            println!();
        }
        None => print_info("Gateway is not currently running."),
    }
    std::fs::remove_file(&pid_file).ok();
    Ok(())
}

pub async fn gateway_restart(config: &RunwayConfig) -> Result<()> {
    gateway_stop().await?;
    gateway_start(config).await
}

pub async fn gateway_status(config: &RunwayConfig) -> Result<()> {
    let pid_file = platform::pid_file();
    match running_pid(&pid_file) {
        Some(pid) => {
            GuideSection::new("Gateway Status")
                .status(
                    "Gateway",
                    &format!(
                        "{} (PID {})",
                        style("RUNNING").green().bold(),
                        style(pid).dim()
                    ),
                )
                .status("API Endpoint", &config.gateway.base_url())
                .print();
        }
        None => {
            GuideSection::new("Gateway Status")
                .status("Gateway", &style("STOPPED").red().bold().to_string())
                .blank()
                .info(&format!(
                    "Run {} to start the daemon.",
                    style("runway gateway start").cyan().bold()
                ))
                .print();
        }
    }
    println!();
    Ok(())
}

pub async fn follow_logs() -> Result<()> {
    let log_path = platform::log_file();
    if !log_path.exists() {
        print_error(&format!(
            "Log file not found at {}",
            style(log_path.display()).dim()
        ));
        return Ok(());
    }
    if running_pid(&platform::pid_file()).is_none() {
        print_warn("Gateway is not running; showing the last log lines.");
    }
    GuideSection::new("Live Logs")
        .text(&format!(
            "Following {} - press {} to stop.",
            style("runway.log").cyan(),
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    println!();
    let mut child = NativePlatform::tail_file(&log_path)?;
    child.wait()?;
    Ok(())
}

/// Runs the runtime and the API server in this process until interrupted.
pub async fn gateway_run(config: RunwayConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;
    NativePlatform::restrict_dir_permissions(&config.data_dir);

    let log_tx = logging::init(logging::parse_level(&config.log_level), false);
    info!("Starting runway {}", env!("CARGO_PKG_VERSION"));

    let db_path = config.database_path();
    let store = SpecStore::open(&db_path)
        .await
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    NativePlatform::restrict_file_permissions(&db_path);

    let runtime = RuntimeHost::build(&config, store).await?;
    let api = ApiServer::new(runtime.manager(), log_tx, &config.gateway);

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(runtime)));
    lifecycle.attach(Arc::new(Mutex::new(api)));

    if let Err(e) = lifecycle.start().await {
        lifecycle.shutdown().await.ok();
        return Err(e);
    }

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received");
    lifecycle.shutdown().await?;

    let pid_file = platform::pid_file();
    if read_pid(&pid_file).as_deref() == Some(std::process::id().to_string().as_str()) {
        std::fs::remove_file(&pid_file).ok();
    }
    print_goodbye();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
