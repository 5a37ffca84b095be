use std::sync::Arc;
use std::time::Duration;

use runway_types::{BackendId, ExecutionAdapter};
use tracing::warn;

use crate::pool::AdapterSlot;
use crate::settings::OrchestratorSettings;

/// Adapters known to the runtime, in registration order.
///
/// Built once at startup and never mutated, so readers need no lock.
pub struct AdapterRegistry {
    slots: Vec<Arc<AdapterSlot>>,
}

impl AdapterRegistry {
    pub fn builder(settings: &OrchestratorSettings) -> AdapterRegistryBuilder {
        AdapterRegistryBuilder {
            slots: Vec::new(),
            permits: settings.pool_permits,
            call_timeout: settings.call_timeout(),
        }
    }

    pub fn slots(&self) -> &[Arc<AdapterSlot>] {
        &self.slots
    }

    pub fn get(&self, id: &BackendId) -> Option<&Arc<AdapterSlot>> {
        self.slots.iter().find(|s| s.id() == id)
    }

    pub fn ids(&self) -> Vec<BackendId> {
        self.slots.iter().map(|s| s.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct AdapterRegistryBuilder {
    slots: Vec<Arc<AdapterSlot>>,
    permits: usize,
    call_timeout: Duration,
}

impl AdapterRegistryBuilder {
    pub fn register(self, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        let permits = self.permits;
        self.register_with_permits(adapter, permits)
    }

    pub fn register_with_permits(mut self, adapter: Arc<dyn ExecutionAdapter>, permits: usize) -> Self {
        if self.slots.iter().any(|s| s.id() == adapter.id()) {
            warn!("Adapter '{}' registered twice; keeping the first", adapter.id());
            return self;
        }
        let registration = self.slots.len();
        self.slots.push(Arc::new(AdapterSlot::new(
            adapter,
            permits,
            self.call_timeout,
            registration,
        )));
        self
    }

    pub fn build(self) -> Arc<AdapterRegistry> {
        Arc::new(AdapterRegistry { slots: self.slots })
    }
}
