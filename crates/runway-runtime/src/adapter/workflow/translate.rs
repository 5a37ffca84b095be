//! Specification to workflow-document translation.

use runway_types::{AgentSpecification, Step, StepAction, TriggerKind};
use serde_json::{Map, Value, json};

const ORIGIN_X: i64 = 250;
const ROW_Y: i64 = 300;
const COLUMN_WIDTH: i64 = 200;
const TRIGGER_ROW_HEIGHT: i64 = 150;

fn node(name: &str, kind: &str, position: [i64; 2], parameters: Value) -> Value {
    json!({
        "name": name,
        "type": kind,
        "typeVersion": 1,
        "position": position,
        "parameters": parameters,
    })
}

fn trigger_node(index: usize, kind: &TriggerKind) -> Value {
    let name = format!("trigger_{}", index + 1);
    let position = [ORIGIN_X, ROW_Y + index as i64 * TRIGGER_ROW_HEIGHT];
    let (node_type, parameters) = match kind {
        TriggerKind::Schedule {
            cron_expression,
            timezone,
        } => (
            "n8n-nodes-base.scheduleTrigger",
            json!({
                "rule": {"interval": [{"field": "cronExpression", "expression": cron_expression}]},
                "timezone": timezone,
            }),
        ),
        TriggerKind::Webhook { path, .. } => (
            "n8n-nodes-base.webhook",
            json!({"path": path.trim_matches('/'), "httpMethod": "POST"}),
        ),
        TriggerKind::FeedPoll {
            source_url,
            poll_interval_secs,
        } => (
            "n8n-nodes-base.rssFeedReadTrigger",
            json!({
                "feedUrl": source_url,
                "pollTimes": {"item": [{"mode": "everyX", "value": poll_interval_secs / 60, "unit": "minutes"}]},
            }),
        ),
        TriggerKind::FileWatch { path } => (
            "n8n-nodes-base.localFileTrigger",
            json!({"path": path, "events": ["add", "change"]}),
        ),
        TriggerKind::QueueMessage { queue_name } => (
            "n8n-nodes-base.amqpTrigger",
            json!({"sink": queue_name}),
        ),
        TriggerKind::Manual => ("n8n-nodes-base.manualTrigger", json!({})),
    };
    node(&name, node_type, position, parameters)
}

fn step_node(index: usize, step: &Step) -> Value {
    let position = [ORIGIN_X + (index as i64 + 1) * COLUMN_WIDTH, ROW_Y];
    let config = Value::Object(step.config.clone());
    let (node_type, parameters) = match &*step.action {
        StepAction::HttpRequest => ("n8n-nodes-base.httpRequest", config),
        StepAction::ParseFeed => (
            "n8n-nodes-base.rssFeedRead",
            json!({"url": step.config.get("url").cloned().unwrap_or(Value::Null)}),
        ),
        StepAction::SendMessage => ("n8n-nodes-base.slack", config),
        StepAction::TransformData => ("n8n-nodes-base.set", config),
        StepAction::FilterData => ("n8n-nodes-base.filter", config),
        StepAction::Conditional { predicate, .. } => (
            "n8n-nodes-base.if",
            json!({"conditions": {"expression": predicate}}),
        ),
        StepAction::Delay { duration_secs } => (
            "n8n-nodes-base.wait",
            json!({"amount": duration_secs, "unit": "seconds"}),
        ),
        StepAction::CustomCode { reference } => (
            "n8n-nodes-base.code",
            json!({"reference": reference}),
        ),
        // Not in this backend's capability set; kept so the document stays complete.
        StepAction::GenerateContent | StepAction::Loop { .. } => ("n8n-nodes-base.noOp", config),
    };
    node(&step.id, node_type, position, parameters)
}

fn link(connections: &mut Map<String, Value>, from: &str, outputs: Vec<Option<&str>>) {
    let main: Vec<Value> = outputs
        .into_iter()
        .map(|target| match target {
            Some(to) => json!([{"node": to, "type": "main", "index": 0}]),
            None => json!([]),
        })
        .collect();
    connections.insert(from.to_string(), json!({ "main": main }));
}

/// Builds the workflow document for `spec`.
///
/// Triggers stack in the first column, steps follow left to right in declaration
/// order. A spec without triggers gets a manual trigger so it can be executed on demand.
pub fn to_workflow(spec: &AgentSpecification) -> Value {
    let mut nodes = Vec::new();
    let mut trigger_names = Vec::new();
    let enabled: Vec<&TriggerKind> = spec
        .triggers
        .iter()
        .filter(|t| t.enabled)
        .map(|t| &*t.kind)
        .collect();
    if enabled.is_empty() {
        nodes.push(trigger_node(0, &TriggerKind::Manual));
        trigger_names.push("trigger_1".to_string());
    } else {
        for (i, kind) in enabled.into_iter().enumerate() {
            nodes.push(trigger_node(i, kind));
            trigger_names.push(format!("trigger_{}", i + 1));
        }
    }
    for (i, step) in spec.steps.iter().enumerate() {
        nodes.push(step_node(i, step));
    }

    let owned: Vec<&str> = spec
        .steps
        .iter()
        .flat_map(|s| s.action.branch_targets())
        .collect();
    let top_level: Vec<&Step> = spec
        .steps
        .iter()
        .filter(|s| !owned.contains(&s.id.as_str()))
        .collect();

    let mut connections = Map::new();
    if let Some(first) = top_level.first() {
        for trigger in &trigger_names {
            link(&mut connections, trigger, vec![Some(first.id.as_str())]);
        }
    }
    for pair in top_level.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        match &*from.action {
            StepAction::Conditional {
                then_branch,
                else_branch,
                ..
            } => link(
                &mut connections,
                &from.id,
                vec![
                    Some(then_branch.first().map(String::as_str).unwrap_or(to.id.as_str())),
                    Some(else_branch.first().map(String::as_str).unwrap_or(to.id.as_str())),
                ],
            ),
            _ => link(&mut connections, &from.id, vec![Some(to.id.as_str())]),
        }
    }
    for step in &spec.steps {
        if let StepAction::Conditional {
            then_branch,
            else_branch,
            ..
        } = &*step.action
        {
            for branch in [then_branch, else_branch] {
                for pair in branch.windows(2) {
                    link(&mut connections, &pair[0], vec![Some(pair[1].as_str())]);
                }
            }
        }
    }

    json!({
        "name": format!("runway:{}", spec.id),
        "nodes": nodes,
        "connections": connections,
        "settings": {
            "executionTimeout": spec.sla.max_execution_time,
            "saveManualExecutions": true,
        },
        "staticData": null,
        "meta": {
            "runway_spec": spec.id,
            "content_hash": spec.content_hash(),
        },
    })
}
