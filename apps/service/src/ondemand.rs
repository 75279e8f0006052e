//! On-demand runs.
//!
//! A caller hands over a monitor definition and waits for its result. The
//! run is dispatched like a scheduled check with status `ondemand`, and the
//! worker routes the result back through an [`OndemandSink`] instead of
//! storage.
//!
//! Each run is an entry in the [`RunRegistry`] that moves from pending to
//! either resolved or timed out. Whichever side removes the entry first wins;
//! the loser sees [`Delivery::Ignored`] or [`Expiry::AlreadyResolved`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use probe::{Monitor, MonitorResult, MonitorStatus};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::messages::{DispatchMessage, OndemandResponse};
use crate::bus::{BusError, MessageBus, Topics, publish_json, spawn_handler};

#[derive(Debug, Error)]
pub enum OndemandError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("failed to dispatch run: {0}")]
    Dispatch(#[from] BusError),
    #[error("run {0} was dropped before completing")]
    Dropped(String),
}

/// Result of handing a response to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Resolved,
    /// Unknown run: already timed out, or owned by another process
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    TimedOut,
    AlreadyResolved,
}

/// Pending on-demand runs keyed by run id
#[derive(Default)]
pub struct RunRegistry {
    pending: DashMap<String, oneshot::Sender<MonitorResult>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run_id: &str) -> oneshot::Receiver<MonitorResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(run_id.to_string(), tx);
        rx
    }

    pub fn resolve(&self, run_id: &str, result: MonitorResult) -> Delivery {
        match self.pending.remove(run_id) {
            Some((_, tx)) => {
                // the waiter may have gone away between removal and send
                if tx.send(result).is_err() {
                    debug!(run_id, "On-demand waiter dropped before delivery");
                }
                Delivery::Resolved
            }
            None => Delivery::Ignored,
        }
    }

    pub fn expire(&self, run_id: &str) -> Expiry {
        match self.pending.remove(run_id) {
            Some(_) => Expiry::TimedOut,
            None => Expiry::AlreadyResolved,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Resolve runs from responses published on `topic`.
    pub fn listen(self: Arc<Self>, bus: &dyn MessageBus, topic: &str) -> JoinHandle<()> {
        let subscription = bus.subscribe(topic);
        spawn_handler(subscription, move |response: OndemandResponse| {
            let registry = self.clone();
            async move {
                if registry.resolve(&response.run_id, response.result) == Delivery::Ignored {
                    debug!(run_id = %response.run_id, "Ignoring response for a run this process does not own");
                }
            }
        })
    }
}

/// Where a worker sends on-demand results
#[async_trait]
pub trait OndemandSink: Send + Sync {
    async fn deliver(&self, response: OndemandResponse);
}

#[async_trait]
impl OndemandSink for RunRegistry {
    async fn deliver(&self, response: OndemandResponse) {
        if self.resolve(&response.run_id, response.result) == Delivery::Ignored {
            warn!(run_id = %response.run_id, "On-demand result arrived after its run ended");
        }
    }
}

/// Publishes on-demand results for a coordinator in another process
pub struct BusSink {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

impl BusSink {
    pub fn new(bus: Arc<dyn MessageBus>, topics: &Topics) -> Self {
        Self { bus, topic: topics.ondemand_response() }
    }
}

#[async_trait]
impl OndemandSink for BusSink {
    async fn deliver(&self, response: OndemandResponse) {
        if let Err(e) = publish_json(self.bus.as_ref(), &self.topic, &response).await {
            warn!(run_id = %response.run_id, error = %e, "Failed to publish on-demand result");
        }
    }
}

/// Removes a run from the registry when its waiter goes away, including
/// when the caller's future is dropped mid-wait.
struct PendingRun {
    registry: Arc<RunRegistry>,
    run_id: String,
}

impl Drop for PendingRun {
    fn drop(&mut self) {
        if self.registry.expire(&self.run_id) == Expiry::TimedOut {
            debug!(run_id = %self.run_id, "On-demand waiter went away, run abandoned");
        }
    }
}

pub struct OndemandCoordinator {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    registry: Arc<RunRegistry>,
    timeout: Duration,
    default_region: String,
}

impl OndemandCoordinator {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        topics: Topics,
        registry: Arc<RunRegistry>,
        timeout: Duration,
        default_region: impl Into<String>,
    ) -> Self {
        Self { bus, topics, registry, timeout, default_region: default_region.into() }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Dispatch `monitor` once for `account_id` and wait for its result.
    pub async fn run(&self, account_id: &str, monitor: Monitor) -> Result<MonitorResult, OndemandError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let location = monitor.locations.first().cloned().unwrap_or_else(|| self.default_region.clone());

        let mut monitor = monitor;
        monitor.id = format!("ondemand-{run_id}");
        monitor.account_id = account_id.to_string();
        monitor.status = MonitorStatus::Ondemand;
        monitor.locations = vec![location.clone()];

        let mut rx = self.registry.register(&run_id);
        let _pending = PendingRun { registry: self.registry.clone(), run_id: run_id.clone() };
        let message = DispatchMessage { run_id: Some(run_id.clone()), location: location.clone(), monitor };

        publish_json(self.bus.as_ref(), &self.topics.dispatch(&location), &message).await?;
        info!(run_id, location, "On-demand run dispatched");

        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(OndemandError::Dropped(run_id)),
            Err(_) => match self.registry.expire(&run_id) {
                Expiry::TimedOut => {
                    warn!(run_id, timeout = ?self.timeout, "On-demand run timed out");
                    Err(OndemandError::TimedOut(self.timeout))
                }
                // resolved between the deadline and the expiry, the sender
                // is about to send or drop
                Expiry::AlreadyResolved => rx.await.map_err(|_| OndemandError::Dropped(run_id)),
            },
        }
    }
}
