use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use futures::future::join_all;
use probe::{Monitor, MonitorStatus};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::bus::messages::DispatchMessage;
use crate::bus::{MessageBus, Topics, publish_json};
use crate::storage::Storage;

/// Seconds since the top of the hour, rounded down to the tick.
pub fn seconds_of_hour(now: DateTime<Utc>, tick_seconds: u32) -> u32 {
    let seconds = now.minute() * 60 + now.second();
    let tick = tick_seconds.max(1);
    seconds - seconds % tick
}

/// Whether `monitor` runs on the tick at `seconds`.
pub fn is_due(monitor: &Monitor, seconds: u32) -> bool {
    monitor.status == MonitorStatus::Active && monitor.frequency > 0 && seconds % monitor.frequency == 0
}

/// Counts for one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub due: usize,
    pub published: usize,
    pub failed: usize,
}

/// Monitoring scheduler - selects due monitors and publishes them per region
pub struct Scheduler {
    storage: Arc<dyn Storage>,
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    tick_seconds: u32,
    default_region: Option<String>,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        bus: Arc<dyn MessageBus>,
        topics: Topics,
        tick_seconds: u32,
        default_region: Option<String>,
    ) -> Self {
        Self { storage, bus, topics, tick_seconds: tick_seconds.max(1), default_region }
    }

    /// Dispatch every monitor due at `now`.
    ///
    /// A failed publish is logged and counted; the rest of the tick proceeds.
    pub async fn dispatch_tick(&self, now: DateTime<Utc>) -> DispatchReport {
        let seconds = seconds_of_hour(now, self.tick_seconds);

        let monitors = match self.storage.monitors_with_status(MonitorStatus::Active).await {
            Ok(monitors) => monitors,
            Err(e) => {
                error!(error = %e, "Failed to load active monitors");
                return DispatchReport::default();
            }
        };

        let due: Vec<Monitor> = monitors.into_iter().filter(|m| is_due(m, seconds)).collect();
        let mut report = DispatchReport { due: due.len(), ..Default::default() };

        let publishes = due.iter().flat_map(|monitor| {
            self.regions(monitor).into_iter().map(move |region| self.publish(monitor, region))
        });

        for ok in join_all(publishes).await {
            if ok {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }

        debug!(seconds, due = report.due, published = report.published, failed = report.failed, "Tick dispatched");
        report
    }

    fn regions(&self, monitor: &Monitor) -> Vec<String> {
        if !monitor.locations.is_empty() {
            return monitor.locations.clone();
        }
        match &self.default_region {
            Some(region) => vec![region.clone()],
            None => {
                warn!(monitor_id = %monitor.id, "Monitor has no execution regions");
                Vec::new()
            }
        }
    }

    async fn publish(&self, monitor: &Monitor, region: String) -> bool {
        let message = DispatchMessage { run_id: None, location: region.clone(), monitor: monitor.clone() };
        match publish_json(self.bus.as_ref(), &self.topics.dispatch(&region), &message).await {
            Ok(_) => true,
            Err(e) => {
                error!(monitor_id = %monitor.id, region, error = %e, "Failed to dispatch monitor");
                false
            }
        }
    }

    /// Run ticks forever, aligned to multiples of the tick length.
    pub async fn run(self: Arc<Self>) {
        let tick = Duration::from_secs(u64::from(self.tick_seconds));
        info!(tick_seconds = self.tick_seconds, "Scheduler started");

        loop {
            let now = Utc::now();
            let into_tick = now.timestamp_millis().rem_euclid(tick.as_millis() as i64) as u64;
            let wait = tick - Duration::from_millis(into_tick);
            // evaluate against the boundary itself, not the wake-up time
            let boundary = now + chrono::Duration::milliseconds(wait.as_millis() as i64);
            sleep_until(Instant::now() + wait).await;

            // publishes run detached so a slow bus never delays the next tick
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.dispatch_tick(boundary).await;
            });
        }
    }
}
