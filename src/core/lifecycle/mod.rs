use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Start,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    fn name(&self) -> &'static str;

    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type SharedComponent = Arc<Mutex<dyn LifecycleComponent + Send + Sync>>;

/// Drives attached components through init, start and shutdown, in attach order.
/// Shutdown runs in reverse so later components stop before what they depend on.
pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<SharedComponent>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Init,
            components: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn attach(&mut self, component: SharedComponent) {
        self.components.push(component);
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.lock().await.on_init().await?;
        }

        info!("Lifecycle Phase: Start");
        self.state = LifecycleState::Start;
        for comp in &self.components {
            let mut comp = comp.lock().await;
            comp.on_start().await?;
            info!("Started {}", comp.name());
        }

        info!("Lifecycle Phase: Ready");
        self.state = LifecycleState::Ready;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        for comp in self.components.iter().rev() {
            let mut comp = comp.lock().await;
            if let Err(e) = comp.on_shutdown().await {
                warn!("Component {} shutdown error: {}", comp.name(), e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<StdMutex<Vec<String>>>,
        fail_start: bool,
    }

    #[async_trait::async_trait]
    impl LifecycleComponent for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn on_init(&mut self) -> Result<()> {
            self.log.lock().unwrap().push(format!("init {}", self.name));
            Ok(())
        }

        async fn on_start(&mut self) -> Result<()> {
            if self.fail_start {
                anyhow::bail!("{} refused to start", self.name);
            }
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn on_shutdown(&mut self) -> Result<()> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<StdMutex<Vec<String>>>, fail_start: bool) -> SharedComponent {
        Arc::new(Mutex::new(Recorder {
            name,
            log: log.clone(),
            fail_start,
        }))
    }

    #[tokio::test]
    async fn phases_run_in_order_and_shutdown_reverses() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut manager = LifecycleManager::new();
        manager.attach(recorder("runtime", &log, false));
        manager.attach(recorder("api", &log, false));

        manager.start().await.unwrap();
        assert_eq!(manager.state(), LifecycleState::Ready);
        manager.shutdown().await.unwrap();
        assert_eq!(manager.state(), LifecycleState::Shutdown);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "init runtime",
                "init api",
                "start runtime",
                "start api",
                "stop api",
                "stop runtime"
            ]
        );
    }

    #[tokio::test]
    async fn a_failed_start_stops_the_sequence() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut manager = LifecycleManager::new();
        manager.attach(recorder("runtime", &log, true));
        manager.attach(recorder("api", &log, false));

        assert!(manager.start().await.is_err());
        assert_eq!(manager.state(), LifecycleState::Start);
        assert!(!log.lock().unwrap().contains(&"start api".to_string()));
    }
}
