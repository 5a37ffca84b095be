mod cli;
mod config;
mod core;
mod interfaces;
mod logging;
mod platform;

use crate::core::terminal;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_main().await {
        terminal::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
