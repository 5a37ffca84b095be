//! Step executors linked into the local adapter.

mod data;
mod feed;
mod http;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use runway_types::{StepExecutor, StepKind};
use tracing::warn;

pub use data::{FilterDataStep, TransformDataStep};
pub use feed::{Feed, FeedItem, ParseFeedStep, parse_feed};
pub use http::HttpRequestStep;

/// Executors by step kind. Control kinds are interpreted by the engine and never registered.
#[derive(Clone, Default)]
pub struct StepRegistry {
    executors: HashMap<StepKind, Arc<dyn StepExecutor>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// http_request, parse_feed, transform_data and filter_data.
    pub fn with_builtins(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpRequestStep::new(client.clone())));
        registry.register(Arc::new(ParseFeedStep::new(client)));
        registry.register(Arc::new(TransformDataStep));
        registry.register(Arc::new(FilterDataStep));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        let kind = executor.kind();
        if kind.is_control() {
            warn!("Ignoring executor for control step kind {}", kind);
            return;
        }
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Registered kinds plus the control kinds the engine runs itself.
    pub fn capabilities(&self) -> BTreeSet<StepKind> {
        StepKind::ALL
            .into_iter()
            .filter(|k| k.is_control() || self.executors.contains_key(k))
            .collect()
    }
}
