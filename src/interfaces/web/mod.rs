pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use runway_runtime::AgentManager;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::GatewaySettings;
use crate::core::lifecycle::LifecycleComponent;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) manager: Arc<AgentManager>,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_token: Option<String>,
}

impl AppState {
    pub(crate) fn new(
        manager: Arc<AgentManager>,
        log_tx: broadcast::Sender<String>,
        gateway: &GatewaySettings,
    ) -> Self {
        Self {
            manager,
            log_tx,
            api_host: gateway.host.clone(),
            api_token: gateway.api_token.clone().filter(|t| !t.is_empty()),
        }
    }
}

/// The HTTP gateway: management API, webhook ingress and the log stream.
pub struct ApiServer {
    state: AppState,
    addr: String,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(
        manager: Arc<AgentManager>,
        log_tx: broadcast::Sender<String>,
        gateway: &GatewaySettings,
    ) -> Self {
        Self {
            state: AppState::new(manager, log_tx, gateway),
            addr: format!("{}:{}", gateway.host, gateway.port),
            shutdown: CancellationToken::new(),
            task: None,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// --- Lifecycle Implementations ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    fn name(&self) -> &'static str {
        "api server"
    }

    async fn on_init(&mut self) -> Result<()> {
        if self.state.api_token.is_none() && !auth::is_loopback(&self.state.api_host) {
            anyhow::bail!(
                "Refusing to listen on {} without [gateway] api_token set",
                self.state.api_host
            );
        }
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        let app = router::build_api_router(self.state.clone());
        let shutdown = self.shutdown.clone();
        let addr = self.addr.clone();

        info!("API Server running at http://{addr}");
        self.task = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        self.shutdown.cancel();
        if let Some(task) = self.task.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err()
        {
            warn!("API Server did not drain within {:?}", SHUTDOWN_GRACE);
        }
        Ok(())
    }
}
