//! Periodic and on-demand health probing, published through watch channels.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use futures_util::future::join_all;
use runway_core::HealthTracker;
use runway_types::{BackendId, HealthSnapshot, HealthState};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pool::AdapterSlot;
use crate::registry::AdapterRegistry;
use crate::settings::HealthSettings;

/// Read side of the monitor. Cloning is cheap and reads never block on a probe.
#[derive(Clone)]
pub struct HealthBoard {
    channels: Arc<HashMap<BackendId, watch::Receiver<HealthSnapshot>>>,
}

impl HealthBoard {
    /// Last published state; `Unknown` for adapters that were never registered.
    pub fn current(&self, id: &BackendId) -> HealthState {
        self.channels
            .get(id)
            .map(|rx| rx.borrow().state)
            .unwrap_or_default()
    }

    pub fn snapshot(&self, id: &BackendId) -> Option<HealthSnapshot> {
        self.channels.get(id).map(|rx| rx.borrow().clone())
    }

    pub fn subscribe(&self, id: &BackendId) -> Option<watch::Receiver<HealthSnapshot>> {
        self.channels.get(id).cloned()
    }
}

/// Non-blocking handle used to ask for an out-of-band probe.
#[derive(Clone)]
pub struct ProbeRequester {
    tx: mpsc::UnboundedSender<BackendId>,
}

impl ProbeRequester {
    pub fn request(&self, id: &BackendId) {
        if self.tx.send(id.clone()).is_err() {
            debug!("Health monitor stopped; dropping probe request for {}", id);
        }
    }
}

struct ProbeState {
    tracker: HealthTracker,
    publisher: watch::Sender<HealthSnapshot>,
}

struct Probed {
    slot: Arc<AdapterSlot>,
    state: Mutex<ProbeState>,
}

pub struct HealthMonitor {
    entries: Vec<Probed>,
    board: HealthBoard,
    requests_tx: mpsc::UnboundedSender<BackendId>,
    requests_rx: StdMutex<Option<mpsc::UnboundedReceiver<BackendId>>>,
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(registry: &AdapterRegistry, settings: HealthSettings) -> Arc<Self> {
        let mut entries = Vec::with_capacity(registry.len());
        let mut channels = HashMap::new();
        for slot in registry.slots() {
            let (publisher, rx) = watch::channel(HealthSnapshot::default());
            channels.insert(slot.id().clone(), rx);
            entries.push(Probed {
                slot: slot.clone(),
                state: Mutex::new(ProbeState {
                    tracker: HealthTracker::new(),
                    publisher,
                }),
            });
        }
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            entries,
            board: HealthBoard {
                channels: Arc::new(channels),
            },
            requests_tx,
            requests_rx: StdMutex::new(Some(requests_rx)),
            settings,
        })
    }

    pub fn board(&self) -> HealthBoard {
        self.board.clone()
    }

    pub fn requester(&self) -> ProbeRequester {
        ProbeRequester {
            tx: self.requests_tx.clone(),
        }
    }

    /// Probes one adapter and returns its state after hysteresis.
    pub async fn probe(&self, id: &BackendId) -> Option<HealthState> {
        let entry = self.entries.iter().find(|e| e.slot.id() == id)?;
        Some(self.probe_entry(entry).await)
    }

    /// One probe round over every adapter, concurrently.
    pub async fn force_probe_all(&self) -> Vec<(BackendId, HealthState)> {
        join_all(self.entries.iter().map(|entry| async move {
            (entry.slot.id().clone(), self.probe_entry(entry).await)
        }))
        .await
    }

    async fn probe_entry(&self, entry: &Probed) -> HealthState {
        // Holding the lock across the probe keeps observations for one adapter in order.
        let mut state = entry.state.lock().await;
        let id = entry.slot.id();
        let observed = match tokio::time::timeout(
            self.settings.probe_timeout(),
            entry.slot.adapter().probe_health(),
        )
        .await
        {
            Ok(observed) => observed,
            Err(_) => {
                warn!(
                    "Health probe for {} timed out after {:?}",
                    id,
                    self.settings.probe_timeout()
                );
                HealthState::Unavailable
            }
        };

        if let Some(previous) = state.tracker.observe(observed, Utc::now()) {
            info!(
                "Adapter {} health {} -> {}",
                id,
                previous.as_str(),
                state.tracker.state().as_str()
            );
        } else if observed != state.tracker.state() {
            debug!(
                "Adapter {} observed {} while {}; waiting for confirmation",
                id,
                observed.as_str(),
                state.tracker.state().as_str()
            );
        }
        state.publisher.send_replace(state.tracker.snapshot().clone());
        state.tracker.state()
    }

    /// Runs the interval loop and serves on-demand requests until `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let receiver = match self.requests_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let monitor = self.clone();
        tokio::spawn(async move {
            let Some(mut requests) = receiver else {
                warn!("Health monitor loop is already running");
                return;
            };
            let mut ticker = tokio::time::interval(monitor.settings.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Health monitor started for {} adapter(s), interval {:?}",
                monitor.entries.len(),
                monitor.settings.interval()
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.force_probe_all().await;
                    }
                    Some(first) = requests.recv() => {
                        let mut wanted = HashSet::from([first]);
                        while let Ok(next) = requests.try_recv() {
                            wanted.insert(next);
                        }
                        for id in wanted {
                            monitor.probe(&id).await;
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        })
    }
}
