//! Turns declared triggers into execution requests.
//!
//! Schedules run on a cron job scheduler, feed polls on interval tasks, and webhook
//! paths are kept in a route table the HTTP surface resolves against. File-watch and
//! queue triggers are recorded as external bindings; their collaborators submit
//! requests through the execute endpoint.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use runway_core::CronSchedule;
use runway_core::schedule::{ScheduleError, ScheduleZone};
use runway_types::{AgentSpecification, ExecutionRequest, TriggerKind, TriggerOrigin};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("job scheduler error: {0}")]
    Scheduler(String),
    #[error("webhook path '/{path}' is already bound to '{spec_id}'")]
    WebhookConflict { path: String, spec_id: String },
}

impl From<JobSchedulerError> for TriggerError {
    fn from(e: JobSchedulerError) -> Self {
        TriggerError::Scheduler(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRoute {
    pub spec_id: String,
    pub secret: Option<String>,
}

/// A trigger served by something outside this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalBinding {
    pub spec_id: String,
    pub kind: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingSummary {
    pub schedules: usize,
    pub webhooks: Vec<String>,
    pub feeds: usize,
    pub external: usize,
}

#[derive(Default)]
struct SpecBindings {
    jobs: Vec<Uuid>,
    pollers: Vec<CancellationToken>,
    webhooks: Vec<String>,
    external: Vec<ExternalBinding>,
}

pub fn normalize_hook_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

pub struct TriggerScheduler {
    scheduler: Mutex<JobScheduler>,
    tx: mpsc::Sender<ExecutionRequest>,
    bindings: Mutex<HashMap<String, SpecBindings>>,
    webhooks: RwLock<HashMap<String, WebhookRoute>>,
    shutdown: CancellationToken,
}

impl TriggerScheduler {
    pub async fn new(tx: mpsc::Sender<ExecutionRequest>) -> Result<Self, TriggerError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            tx,
            bindings: Mutex::new(HashMap::new()),
            webhooks: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn start(&self) -> Result<(), TriggerError> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    /// Replaces every binding of `spec` with its currently enabled triggers.
    ///
    /// Nothing stays bound when one of the triggers cannot be registered.
    pub async fn bind(&self, spec: &AgentSpecification) -> Result<BindingSummary, TriggerError> {
        self.unbind(&spec.id).await;
        let mut bound = SpecBindings::default();
        for trigger in spec.triggers.iter().filter(|t| t.enabled) {
            if let Err(e) = self.bind_one(&spec.id, &trigger.kind, &mut bound).await {
                self.release(&spec.id, bound).await;
                return Err(e);
            }
        }
        let summary = BindingSummary {
            schedules: bound.jobs.len(),
            webhooks: bound.webhooks.iter().map(|p| format!("/{p}")).collect(),
            feeds: bound.pollers.len(),
            external: bound.external.len(),
        };
        info!(
            "Bound triggers for '{}': {} schedule(s), {} webhook(s), {} feed(s), {} external",
            spec.id,
            summary.schedules,
            summary.webhooks.len(),
            summary.feeds,
            summary.external
        );
        self.bindings.lock().await.insert(spec.id.clone(), bound);
        Ok(summary)
    }

    async fn bind_one(
        &self,
        spec_id: &str,
        kind: &TriggerKind,
        bound: &mut SpecBindings,
    ) -> Result<(), TriggerError> {
        match kind {
            TriggerKind::Schedule {
                cron_expression,
                timezone,
            } => {
                let schedule = CronSchedule::parse(cron_expression, timezone.as_deref())?;
                let job = self.schedule_job(spec_id, &schedule)?;
                let id = self.scheduler.lock().await.add(job).await?;
                debug!("Scheduled '{}' at '{}' ({})", spec_id, schedule.expression(), id);
                bound.jobs.push(id);
            }
            TriggerKind::Webhook { path, secret } => {
                let path = normalize_hook_path(path);
                let mut routes = self.webhooks.write().unwrap_or_else(PoisonError::into_inner);
                if let Some(existing) = routes.get(&path)
                    && existing.spec_id != spec_id
                {
                    return Err(TriggerError::WebhookConflict {
                        path,
                        spec_id: existing.spec_id.clone(),
                    });
                }
                routes.insert(
                    path.clone(),
                    WebhookRoute {
                        spec_id: spec_id.to_string(),
                        secret: secret.clone(),
                    },
                );
                bound.webhooks.push(path);
            }
            TriggerKind::FeedPoll {
                source_url,
                poll_interval_secs,
            } => {
                let token = self.shutdown.child_token();
                self.spawn_poller(
                    spec_id.to_string(),
                    source_url.clone(),
                    Duration::from_secs((*poll_interval_secs).max(1)),
                    token.clone(),
                );
                bound.pollers.push(token);
            }
            TriggerKind::FileWatch { path } => bound.external.push(ExternalBinding {
                spec_id: spec_id.to_string(),
                kind: kind.as_str().to_string(),
                target: path.clone(),
            }),
            TriggerKind::QueueMessage { queue_name } => bound.external.push(ExternalBinding {
                spec_id: spec_id.to_string(),
                kind: kind.as_str().to_string(),
                target: queue_name.clone(),
            }),
            TriggerKind::Manual => {}
        }
        Ok(())
    }

    fn schedule_job(&self, spec_id: &str, schedule: &CronSchedule) -> Result<Job, TriggerError> {
        let tx = self.tx.clone();
        let spec_id = spec_id.to_string();
        let expression = schedule.expression().to_string();
        let fire = move |_uuid: Uuid, _l: JobScheduler| {
            let tx = tx.clone();
            let spec_id = spec_id.clone();
            let expression = expression.clone();
            Box::pin(async move {
                let payload = json!({
                    "cron": expression,
                    "fired_at": Utc::now().to_rfc3339(),
                });
                emit(
                    &tx,
                    ExecutionRequest::new(spec_id, TriggerOrigin::Schedule, payload),
                )
                .await;
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };
        let job = match schedule.zone() {
            ScheduleZone::Local => Job::new_async_tz(schedule.expression(), chrono::Local, fire)?,
            ScheduleZone::Named(tz) => Job::new_async_tz(schedule.expression(), tz, fire)?,
        };
        Ok(job)
    }

    fn spawn_poller(
        &self,
        spec_id: String,
        source_url: String,
        period: Duration,
        token: CancellationToken,
    ) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let payload = json!({
                            "source_url": source_url,
                            "polled_at": Utc::now().to_rfc3339(),
                        });
                        emit(&tx, ExecutionRequest::new(spec_id.clone(), TriggerOrigin::FeedPoll, payload)).await;
                    }
                }
            }
            debug!("Feed poller for '{}' stopped", spec_id);
        });
    }

    /// Removes every binding of `spec_id`. Unknown ids are a no-op.
    pub async fn unbind(&self, spec_id: &str) {
        let removed = self.bindings.lock().await.remove(spec_id);
        if let Some(bound) = removed {
            self.release(spec_id, bound).await;
        }
    }

    async fn release(&self, spec_id: &str, bound: SpecBindings) {
        for token in bound.pollers {
            token.cancel();
        }
        {
            let mut routes = self.webhooks.write().unwrap_or_else(PoisonError::into_inner);
            for path in &bound.webhooks {
                if routes.get(path).is_some_and(|r| r.spec_id == spec_id) {
                    routes.remove(path);
                }
            }
        }
        let scheduler = self.scheduler.lock().await;
        for job in bound.jobs {
            if let Err(e) = scheduler.remove(&job).await {
                warn!("Failed to remove schedule {} of '{}': {}", job, spec_id, e);
            }
        }
    }

    pub fn webhook_route(&self, path: &str) -> Option<WebhookRoute> {
        self.webhooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_hook_path(path))
            .cloned()
    }

    pub async fn external_bindings(&self) -> Vec<ExternalBinding> {
        let bindings = self.bindings.lock().await;
        let mut out: Vec<ExternalBinding> = bindings
            .values()
            .flat_map(|b| b.external.iter().cloned())
            .collect();
        out.sort_by(|a, b| a.spec_id.cmp(&b.spec_id).then(a.target.cmp(&b.target)));
        out
    }

    pub async fn is_bound(&self, spec_id: &str) -> bool {
        self.bindings.lock().await.contains_key(spec_id)
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Err(e) = self.scheduler.lock().await.shutdown().await {
            warn!("Job scheduler did not shut down cleanly: {}", e);
        }
    }
}

async fn emit(tx: &mpsc::Sender<ExecutionRequest>, request: ExecutionRequest) {
    let spec_id = request.spec_id.clone();
    if tx.send(request).await.is_err() {
        warn!("Dropping trigger for '{}': dispatcher is gone", spec_id);
    }
}
