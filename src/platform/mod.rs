use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Send a termination signal to the process identified by `pid`.
    fn kill_process(pid: &str) -> std::io::Result<std::process::Output>;

    /// Whether a process with `pid` is still alive.
    fn process_alive(pid: &str) -> bool;

    /// Spawn a child that tails / follows a log file.
    fn tail_file(path: &Path) -> std::io::Result<std::process::Child>;

    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Root data directory for runway.
    /// Unix: `~/.runway`, Windows: `%APPDATA%\runway`. `RUNWAY_DATA_DIR` wins on both.
    fn data_dir() -> PathBuf;
}

pub const DATA_DIR_ENV: &str = "RUNWAY_DATA_DIR";

fn resolve_data_dir(default: PathBuf) -> PathBuf {
    data_dir_from(std::env::var(DATA_DIR_ENV).ok(), default)
}

fn data_dir_from(overridden: Option<String>, default: PathBuf) -> PathBuf {
    match overridden {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
        _ => default,
    }
}

/// Directory holding the pid and log files of the background gateway.
pub fn run_dir() -> PathBuf {
    NativePlatform::data_dir().join("run")
}

pub fn pid_file() -> PathBuf {
    run_dir().join("runway.pid")
}

pub fn log_file() -> PathBuf {
    run_dir().join("runway.log")
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
