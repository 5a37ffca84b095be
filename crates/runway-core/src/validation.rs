use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use runway_types::spec::parse_input_ref;
use runway_types::{AgentSpecification, StepAction, TriggerKind, ValidationError};

use crate::predicate::Predicate;
use crate::schedule::CronSchedule;

const MAX_ID_LEN: usize = 64;

/// Validates `spec`, returning the first problem found.
///
/// Checks run in a fixed order so the same document always yields the same error.
pub fn validate(spec: &AgentSpecification) -> Result<(), ValidationError> {
    validate_at(spec, Utc::now())
}

pub fn validate_at(spec: &AgentSpecification, now: DateTime<Utc>) -> Result<(), ValidationError> {
    match validate_all_at(spec, now).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Every problem with `spec`, in check order.
pub fn validate_all(spec: &AgentSpecification) -> Vec<ValidationError> {
    validate_all_at(spec, Utc::now())
}

pub fn validate_all_at(spec: &AgentSpecification, now: DateTime<Utc>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    check_identity(spec, &mut errors);
    check_steps(spec, &mut errors);
    check_triggers(spec, now, &mut errors);
    check_inputs(spec, &mut errors);
    check_branches(spec, &mut errors);
    check_sla(spec, &mut errors);
    errors
}

pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn check_identity(spec: &AgentSpecification, errors: &mut Vec<ValidationError>) {
    if !is_valid_id(&spec.id) {
        errors.push(ValidationError::new(
            "id",
            "must be 1-64 characters of letters, digits, '-' or '_'",
        ));
    }
    if spec.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "must not be empty"));
    }
    if spec.owner.trim().is_empty() {
        errors.push(ValidationError::new("owner", "must not be empty"));
    }
}

fn check_steps(spec: &AgentSpecification, errors: &mut Vec<ValidationError>) {
    if spec.steps.is_empty() {
        errors.push(ValidationError::new("steps", "at least one step is required"));
        return;
    }
    let mut seen = HashSet::new();
    for (i, step) in spec.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("steps[{i}].id"),
                "must not be empty",
            ));
        } else if !seen.insert(step.id.as_str()) {
            errors.push(ValidationError::new(
                format!("steps[{i}].id"),
                format!("duplicate step id '{}'", step.id),
            ));
        }
        if let Some(condition) = &step.condition
            && let Err(e) = Predicate::parse(condition)
        {
            errors.push(ValidationError::new(
                format!("steps[{i}].condition"),
                e.to_string(),
            ));
        }
        if step.retry.max_attempts == 0 {
            errors.push(ValidationError::new(
                format!("steps[{i}].retry.max_attempts"),
                "must be at least 1",
            ));
        }
    }
}

fn check_triggers(
    spec: &AgentSpecification,
    now: DateTime<Utc>,
    errors: &mut Vec<ValidationError>,
) {
    let mut webhook_paths = HashSet::new();
    for (i, trigger) in spec.triggers.iter().enumerate() {
        match &*trigger.kind {
            TriggerKind::Schedule {
                cron_expression,
                timezone,
            } => {
                let checked = CronSchedule::parse(cron_expression, timezone.as_deref())
                    .and_then(|s| s.ensure_fires_after(now));
                if let Err(e) = checked {
                    errors.push(ValidationError::new(
                        format!("triggers[{i}].cron_expression"),
                        e.to_string(),
                    ));
                }
            }
            TriggerKind::Webhook { path, .. } => {
                let trimmed = path.trim_matches('/');
                let url_safe = trimmed
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
                if trimmed.is_empty() || !url_safe {
                    errors.push(ValidationError::new(
                        format!("triggers[{i}].path"),
                        "must be a non-empty URL path",
                    ));
                } else if !webhook_paths.insert(trimmed) {
                    errors.push(ValidationError::new(
                        format!("triggers[{i}].path"),
                        format!("webhook path '{trimmed}' declared twice"),
                    ));
                }
            }
            TriggerKind::FeedPoll {
                source_url,
                poll_interval_secs,
            } => {
                let scheme_ok = url::Url::parse(source_url)
                    .map(|u| matches!(u.scheme(), "http" | "https"))
                    .unwrap_or(false);
                if !scheme_ok {
                    errors.push(ValidationError::new(
                        format!("triggers[{i}].source_url"),
                        "must be an http(s) URL",
                    ));
                }
                if *poll_interval_secs == 0 {
                    errors.push(ValidationError::new(
                        format!("triggers[{i}].poll_interval_secs"),
                        "must be greater than zero",
                    ));
                }
            }
            TriggerKind::FileWatch { path } if path.trim().is_empty() => {
                errors.push(ValidationError::new(
                    format!("triggers[{i}].path"),
                    "must not be empty",
                ));
            }
            TriggerKind::QueueMessage { queue_name } if queue_name.trim().is_empty() => {
                errors.push(ValidationError::new(
                    format!("triggers[{i}].queue_name"),
                    "must not be empty",
                ));
            }
            _ => {}
        }
    }
}

fn check_inputs(spec: &AgentSpecification, errors: &mut Vec<ValidationError>) {
    let position: HashMap<&str, usize> = spec
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    for (i, step) in spec.steps.iter().enumerate() {
        for (j, reference) in step.inputs.iter().enumerate() {
            let field = format!("steps[{i}].inputs[{j}]");
            match parse_input_ref(reference) {
                None => errors.push(ValidationError::new(
                    field,
                    format!("'{reference}' is not of the form step:<id>:<key>"),
                )),
                Some((target, _)) => match position.get(target) {
                    Some(p) if *p < i => {}
                    Some(_) => errors.push(ValidationError::new(
                        field,
                        format!("step '{target}' does not run before '{}'", step.id),
                    )),
                    None => errors.push(ValidationError::new(
                        field,
                        format!("unknown step '{target}'"),
                    )),
                },
            }
        }
    }
}

fn check_branches(spec: &AgentSpecification, errors: &mut Vec<ValidationError>) {
    let known: HashSet<&str> = spec.steps.iter().map(|s| s.id.as_str()).collect();
    let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (i, step) in spec.steps.iter().enumerate() {
        let (field, expression) = match &*step.action {
            StepAction::Conditional { predicate, .. } => ("predicate", predicate),
            StepAction::Loop { condition, .. } => ("condition", condition),
            _ => continue,
        };
        if let Err(e) = Predicate::parse(expression) {
            errors.push(ValidationError::new(
                format!("steps[{i}].{field}"),
                e.to_string(),
            ));
        }
        for target in step.action.branch_targets() {
            if target == step.id {
                errors.push(ValidationError::new(
                    format!("steps[{i}]"),
                    format!("step '{}' branches to itself", step.id),
                ));
            } else if !known.contains(target) {
                errors.push(ValidationError::new(
                    format!("steps[{i}]"),
                    format!("branch target '{target}' is not a step of this specification"),
                ));
            } else if matches!(*step.action, StepAction::Conditional { .. }) {
                edges.entry(step.id.as_str()).or_default().push(target);
            }
        }
    }

    if let Some(cycle_at) = find_cycle(&edges) {
        errors.push(ValidationError::new(
            "steps",
            format!("conditional branches form a cycle through '{cycle_at}'"),
        ));
    }
}

/// Depth-first search over conditional edges. Returns a node on a cycle.
fn find_cycle<'a>(edges: &BTreeMap<&'a str, Vec<&'a str>>) -> Option<&'a str> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &BTreeMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Option<&'a str> {
        match marks.get(node) {
            Some(Mark::Visiting) => return Some(node),
            Some(Mark::Done) => return None,
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        for next in edges.get(node).into_iter().flatten() {
            if let Some(hit) = visit(*next, edges, marks) {
                return Some(hit);
            }
        }
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    edges.keys().find_map(|start| visit(*start, edges, &mut marks))
}

fn check_sla(spec: &AgentSpecification, errors: &mut Vec<ValidationError>) {
    let sla = &spec.sla;
    if !(1..=86_400).contains(&sla.max_execution_time) {
        errors.push(ValidationError::new(
            "sla.max_execution_time",
            "must be between 1 and 86400 seconds",
        ));
    }
    if !(64..=65_536).contains(&sla.max_memory_mb) {
        errors.push(ValidationError::new(
            "sla.max_memory_mb",
            "must be between 64 and 65536",
        ));
    }
    if !(1..=100).contains(&sla.max_cpu_percent) {
        errors.push(ValidationError::new(
            "sla.max_cpu_percent",
            "must be between 1 and 100",
        ));
    }
}
