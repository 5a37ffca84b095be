//! Commands that work on specification files without a running gateway.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use console::style;
use runway_core::schedule::ScheduleZone;
use runway_core::{CronSchedule, templates, validate_all};
use runway_types::AgentSpecification;

use super::CommandArgs;
use crate::core::terminal::{GuideSection, print_error, print_success};

const DEFAULT_PREVIEW_COUNT: usize = 5;
const MAX_PREVIEW_COUNT: usize = 100;

/// Reads a specification, choosing the format by extension and sniffing otherwise.
pub fn load_spec_file(path: &Path) -> Result<AgentSpecification> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_spec_document(&raw, path.extension().and_then(|e| e.to_str()))
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_spec_document(raw: &str, extension: Option<&str>) -> Result<AgentSpecification> {
    match extension.map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("json") => Ok(AgentSpecification::from_json(raw)?),
        Some("yaml") | Some("yml") => Ok(AgentSpecification::from_yaml(raw)?),
        _ if raw.trim_start().starts_with('{') => Ok(AgentSpecification::from_json(raw)?),
        _ => Ok(AgentSpecification::from_yaml(raw)?),
    }
}

pub fn validate_file(args: &CommandArgs) -> Result<()> {
    let Some(file) = args.arg(0) else {
        bail!("Usage: runway validate <file>");
    };
    let spec = load_spec_file(Path::new(file))?;
    let errors = validate_all(&spec);
    if errors.is_empty() {
        print_success(&format!(
            "'{}' is valid ({} step(s), {} trigger(s)).",
            spec.id,
            spec.steps.len(),
            spec.triggers.len()
        ));
        return Ok(());
    }
    let mut section = GuideSection::new(&format!("{} problem(s) in {file}", errors.len()));
    for error in &errors {
        section = section.status(&error.field, &error.reason);
    }
    section.print();
    println!();
    bail!("Specification '{}' is invalid", spec.id)
}

pub fn preview_schedule(args: &CommandArgs) -> Result<()> {
    // Unquoted expressions arrive as several positionals.
    let expression = args.positional.join(" ");
    if expression.is_empty() {
        bail!("Usage: runway schedule \"<cron expression>\" [--tz <zone>] [--count <n>]");
    }
    let expression = expression.as_str();
    let count = args
        .parsed_flag::<usize>("--count")?
        .unwrap_or(DEFAULT_PREVIEW_COUNT)
        .clamp(1, MAX_PREVIEW_COUNT);
    let schedule = match CronSchedule::parse(expression, args.flag("--tz")) {
        Ok(schedule) => schedule,
        Err(e) => {
            print_error(&e.to_string());
            return Ok(());
        }
    };
    let fire_times = schedule.upcoming(Utc::now(), count);
    if fire_times.is_empty() {
        print_error(&format!("'{expression}' never fires again."));
        return Ok(());
    }
    let mut section = GuideSection::new(&format!("Next {} fire time(s)", fire_times.len()))
        .status("Expression", schedule.expression())
        .blank();
    for at in &fire_times {
        section = section.text(&format!(
            "{}  {}",
            in_zone(*at, schedule.zone()),
            style(at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
        ));
    }
    section.print();
    println!();
    Ok(())
}

fn in_zone(at: DateTime<Utc>, zone: ScheduleZone) -> String {
    match zone {
        ScheduleZone::Local => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        ScheduleZone::Named(tz) => at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
    }
}

/// Prints a ready-to-edit specification for one of the stock agent shapes.
pub fn scaffold(args: &CommandArgs) -> Result<()> {
    let (Some(kind), Some(id)) = (args.arg(0), args.arg(1)) else {
        bail!("Usage: runway template <feed-digest|content> <id> [options]");
    };
    let owner = args.flag("--owner").unwrap_or("ops");
    let channel = args.flag("--channel").unwrap_or("#general");
    let spec = match kind {
        "feed-digest" | "feed" => {
            let Some(feed) = args.flag("--feed") else {
                bail!("--feed <url> is required for feed-digest");
            };
            templates::feed_digest(id, owner, feed, channel)
        }
        "content" | "content-generator" => {
            let Some(topic) = args.flag("--topic") else {
                bail!("--topic <text> is required for content");
            };
            let cron = args.flag("--cron").unwrap_or("0 9 * * 1");
            templates::content_generator(id, owner, topic, cron, channel)
        }
        other => bail!("Unknown template '{other}'. Expected: feed-digest, content"),
    };
    let document = match args.flag("--format").unwrap_or("yaml") {
        "json" => spec.to_json()?,
        "yaml" | "yml" => spec.to_yaml()?,
        other => bail!("Unknown format '{other}'. Expected: yaml, json"),
    };
    println!("{document}");
    Ok(())
}
