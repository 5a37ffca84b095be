//! Ready-made specifications for common agent shapes.

use chrono::Utc;
use runway_types::{AgentSpecification, BackendId, Step, StepAction, Trigger, TriggerKind};
use serde_json::json;

/// Three-times-daily feed digest: fetch a feed, summarise it, post the summary.
pub fn feed_digest(
    id: &str,
    owner: &str,
    feed_url: &str,
    channel: &str,
) -> AgentSpecification {
    let mut spec = AgentSpecification::new(id, format!("{id} feed digest"), owner);
    spec.metadata.created_at = Some(Utc::now());
    spec.metadata.created_by = Some(owner.to_string());
    spec.metadata.description = Some(format!("Digest of {feed_url}"));
    spec.metadata.tags = vec!["feed".into(), "digest".into()];
    spec.triggers = vec![
        Trigger::schedule("0 9,15,20 * * *"),
        Trigger::new(TriggerKind::Manual),
    ];
    spec.steps = vec![
        Step::new("fetch_feed", StepAction::ParseFeed)
            .with_config("url", feed_url)
            .with_config("max_items", 10),
        Step::new("summarize", StepAction::GenerateContent)
            .with_config("prompt", "Summarize these items in a short digest.")
            .with_config("max_tokens", 500)
            .with_input("step:fetch_feed:items"),
        Step::new("publish", StepAction::SendMessage)
            .with_config("channel", channel)
            .with_input("step:summarize:content"),
    ];
    spec.runtime_preferences = vec![
        BackendId::local(),
        BackendId::new(BackendId::WORKFLOW),
        BackendId::new(BackendId::DOCKER),
    ];
    spec
}

/// Scheduled content generation delivered to a channel.
pub fn content_generator(
    id: &str,
    owner: &str,
    topic: &str,
    cron_expression: &str,
    channel: &str,
) -> AgentSpecification {
    let mut spec = AgentSpecification::new(id, format!("{id} content generator"), owner);
    spec.metadata.created_at = Some(Utc::now());
    spec.metadata.created_by = Some(owner.to_string());
    spec.metadata.tags = vec!["content".into()];
    spec.triggers = vec![Trigger::schedule(cron_expression)];
    let mut generate = Step::new("generate", StepAction::GenerateContent)
        .with_config("prompt", format!("Write a short post about {topic}."));
    generate
        .config
        .insert("style".into(), json!({"tone": "informative", "length": "short"}));
    spec.steps = vec![
        generate,
        Step::new("publish", StepAction::SendMessage)
            .with_config("channel", channel)
            .with_input("step:generate:content"),
    ];
    spec.runtime_preferences = vec![BackendId::local(), BackendId::new(BackendId::WORKFLOW)];
    spec
}
