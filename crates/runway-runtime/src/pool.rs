use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use runway_types::{
    AgentSpecification, BackendId, ExecutionAdapter, ExecutionContext, ExecutionHandle, RunStatus,
    SubmitError,
};
use tokio::sync::Semaphore;

/// One registered adapter plus the worker pool its calls run on.
///
/// Every call takes a permit and runs on its own task under the call timeout, so a
/// backend that hangs can only exhaust its own permits.
pub struct AdapterSlot {
    adapter: Arc<dyn ExecutionAdapter>,
    permits: Arc<Semaphore>,
    capacity: usize,
    call_timeout: Duration,
    registration: usize,
}

impl AdapterSlot {
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        permits: usize,
        call_timeout: Duration,
        registration: usize,
    ) -> Self {
        let capacity = permits.max(1);
        Self {
            adapter,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            call_timeout,
            registration,
        }
    }

    pub fn id(&self) -> &BackendId {
        self.adapter.id()
    }

    pub fn adapter(&self) -> &Arc<dyn ExecutionAdapter> {
        &self.adapter
    }

    pub fn registration(&self) -> usize {
        self.registration
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn submit(
        &self,
        spec: Arc<AgentSpecification>,
        ctx: ExecutionContext,
    ) -> Result<ExecutionHandle, SubmitError> {
        self.call(move |adapter| async move { adapter.submit(spec, ctx).await })
            .await
    }

    pub async fn poll(&self, handle: ExecutionHandle) -> Result<RunStatus, SubmitError> {
        self.call(move |adapter| async move { adapter.poll(&handle).await })
            .await
    }

    pub async fn cancel(&self, handle: ExecutionHandle) -> Result<(), SubmitError> {
        self.call(move |adapter| async move { adapter.cancel(&handle).await })
            .await
    }

    async fn call<T, F, Fut>(&self, f: F) -> Result<T, SubmitError>
    where
        F: FnOnce(Arc<dyn ExecutionAdapter>) -> Fut,
        Fut: Future<Output = Result<T, SubmitError>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let fut = f(self.adapter.clone());
        let guarded = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| SubmitError::Unavailable("worker pool closed".into()))?;
            let task = tokio::spawn(async move {
                let _permit = permit;
                fut.await
            });
            task.await
                .map_err(|e| SubmitError::Transient(format!("adapter call aborted: {e}")))?
        };
        match tokio::time::timeout(self.call_timeout, guarded).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Transient(format!(
                "{} did not answer within {:?}",
                self.id(),
                self.call_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runway_test_utils::{Behavior, ScriptedAdapter, simple_spec};
    use runway_types::TriggerOrigin;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            execution_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            ordinal: 1,
            origin: TriggerOrigin::Manual,
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn calls_pass_through_to_the_adapter() {
        let adapter = ScriptedAdapter::new("local")
            .always(Behavior::succeed())
            .into_arc();
        let slot = AdapterSlot::new(adapter.clone(), 2, Duration::from_secs(5), 0);

        let handle = slot
            .submit(Arc::new(simple_spec("a")), ctx())
            .await
            .unwrap();
        assert!(matches!(
            slot.poll(handle.clone()).await.unwrap(),
            RunStatus::Succeeded { .. }
        ));
        slot.cancel(handle).await.unwrap();

        assert_eq!(adapter.submit_count(), 1);
        assert_eq!(adapter.cancel_count(), 1);
        assert_eq!(slot.available_permits(), 2);
    }

    #[tokio::test]
    async fn refusals_are_returned_as_values() {
        let adapter = ScriptedAdapter::new("n8n")
            .always(Behavior::unavailable())
            .into_arc();
        let slot = AdapterSlot::new(adapter, 1, Duration::from_secs(5), 1);
        let err = slot
            .submit(Arc::new(simple_spec("a")), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Unavailable(_)));
        assert_eq!(slot.registration(), 1);
    }
}
