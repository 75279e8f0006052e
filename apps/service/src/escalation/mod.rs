//! Notification escalation
//!
//! Turns the post-request event stream into MONITOR_DOWN and
//! MONITOR_RECOVERED transitions. A monitor is alerted when its newest
//! activity entry is MONITOR_DOWN; the read of that entry and the append of
//! the next one run under a per-monitor lock so concurrent events for one
//! monitor cannot both alert.


use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use probe::{Monitor, MonitorResult, NotificationPolicy, Thresholds};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::messages::PostRequestEvent;
use crate::bus::{MessageBus, Topics, spawn_handler};
use crate::notify::{self, ChannelSender, NotificationChannel, NotificationKind};
use crate::storage::{ActivityEntry, ActivityKind, Storage};

/// What handling one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// Both thresholds are zero
    Disabled,
    NoChange,
    Alerted { notified: usize, failed: usize },
    Recovered { notified: usize, failed: usize },
    MonitorMissing,
}

pub struct EscalationEngine {
    storage: Arc<dyn Storage>,
    sender: Arc<dyn ChannelSender>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EscalationEngine {
    pub fn new(storage: Arc<dyn Storage>, sender: Arc<dyn ChannelSender>) -> Self {
        Self { storage, sender, locks: DashMap::new() }
    }

    /// Handle every event published on the post-request topic.
    pub fn spawn(self: Arc<Self>, bus: &dyn MessageBus, topics: &Topics) -> JoinHandle<()> {
        let subscription = bus.subscribe(&topics.post_request());
        info!(topic = %subscription.topic(), "Escalation engine listening");

        spawn_handler(subscription, move |event: PostRequestEvent| {
            let engine = self.clone();
            async move { engine.handle(event).await }
        })
    }

    /// Handle one event, logging instead of failing.
    pub async fn handle(&self, event: PostRequestEvent) {
        match self.handle_at(&event, Utc::now()).await {
            Ok(outcome) => debug!(monitor_id = %event.monitor_id, ?outcome, "Escalation evaluated"),
            Err(e) => error!(monitor_id = %event.monitor_id, error = %e, "Escalation failed"),
        }
    }

    pub async fn handle_at(&self, event: &PostRequestEvent, now: DateTime<Utc>) -> Result<EscalationOutcome> {
        let Some(monitor) = self.storage.get_monitor(&event.monitor_id).await? else {
            warn!(monitor_id = %event.monitor_id, "Post-request event for unknown monitor");
            return Ok(EscalationOutcome::MonitorMissing);
        };

        let thresholds = self.thresholds(&monitor).await?;
        if thresholds.is_disabled() {
            return Ok(EscalationOutcome::Disabled);
        }

        let lock = self.lock_for(&monitor.id);
        let guard = lock.lock().await;

        let alerted = matches!(
            self.storage.latest_activity(&monitor.id).await?,
            Some(ActivityEntry { kind: ActivityKind::MonitorDown, .. })
        );
        let succeeded = event.err.is_empty();

        let kind = match (succeeded, alerted) {
            (true, true) => NotificationKind::Recover,
            (false, false) => {
                if !self.eligible(&monitor, &thresholds, now).await? {
                    return Ok(EscalationOutcome::NoChange);
                }
                NotificationKind::Alert
            }
            _ => return Ok(EscalationOutcome::NoChange),
        };

        let result = self.load_result(&monitor, event).await;
        let activity = match kind {
            NotificationKind::Alert => ActivityKind::MonitorDown,
            NotificationKind::Recover => ActivityKind::MonitorRecovered,
        };
        let entry = ActivityEntry::new(activity, &monitor, Some(&event.result_id), notify::subject(kind, &monitor));
        self.storage.append_activity(entry).await?;
        drop(guard);

        info!(monitor_id = %monitor.id, result_id = %event.result_id, ?activity, "Escalation state changed");

        let channels = self.channels(&monitor, &thresholds).await?;
        let (notified, failed) = self.fan_out(&channels, kind, &monitor, &result).await;

        Ok(match kind {
            NotificationKind::Alert => EscalationOutcome::Alerted { notified, failed },
            NotificationKind::Recover => EscalationOutcome::Recovered { notified, failed },
        })
    }

    fn lock_for(&self, monitor_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(monitor_id.to_string()).or_default().clone()
    }

    async fn thresholds(&self, monitor: &Monitor) -> Result<Thresholds> {
        match monitor.notifications.clone().unwrap_or(NotificationPolicy::UseGlobal) {
            NotificationPolicy::Custom(thresholds) => Ok(thresholds),
            NotificationPolicy::UseGlobal => {
                let settings = self.storage.account_settings(&monitor.account_id).await?;
                Ok(settings.thresholds(Vec::new()))
            }
        }
    }

    /// Channels to notify: the listed ids for a custom policy, the
    /// account's default-enabled channels otherwise.
    async fn channels(&self, monitor: &Monitor, thresholds: &Thresholds) -> Result<Vec<NotificationChannel>> {
        let all = self.storage.notification_channels(&monitor.account_id).await?;
        let uses_global = matches!(monitor.notifications, None | Some(NotificationPolicy::UseGlobal));

        Ok(all
            .into_iter()
            .filter(|c| if uses_global { c.default_enabled } else { thresholds.channels.contains(&c.id) })
            .collect())
    }

    async fn eligible(&self, monitor: &Monitor, thresholds: &Thresholds, now: DateTime<Utc>) -> Result<bool> {
        if thresholds.fail_count > 0 {
            let limit = thresholds.fail_count as usize;
            let recent = self.storage.list_recent_results(&monitor.id, limit).await?;
            if recent.len() == limit && recent.iter().all(|r| !r.is_ok()) {
                debug!(monitor_id = %monitor.id, fail_count = limit, "Eligible by failure count");
                return Ok(true);
            }
        }

        if thresholds.fail_time_minutes > 0 {
            let cutoff = now - Duration::minutes(i64::from(thresholds.fail_time_minutes));
            let anchor = self.storage.latest_result_before(&monitor.id, cutoff).await?;
            if anchor.is_some_and(|r| !r.is_ok()) {
                let since = self.storage.results_since(&monitor.id, cutoff).await?;
                if since.iter().all(|r| !r.is_ok()) {
                    debug!(monitor_id = %monitor.id, minutes = thresholds.fail_time_minutes, "Eligible by failure duration");
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    async fn load_result(&self, monitor: &Monitor, event: &PostRequestEvent) -> MonitorResult {
        match self.storage.get_result(&event.result_id).await {
            Ok(Some(result)) => result,
            other => {
                if let Err(e) = other {
                    warn!(result_id = %event.result_id, error = %e, "Failed to load result for notification");
                }
                let mut result = MonitorResult::shell(monitor, "");
                result.id = event.result_id.clone();
                result.err = event.err.clone();
                result
            }
        }
    }

    async fn fan_out(
        &self,
        channels: &[NotificationChannel],
        kind: NotificationKind,
        monitor: &Monitor,
        result: &MonitorResult,
    ) -> (usize, usize) {
        let sends = channels.iter().map(|channel| async move {
            let outcome = self.sender.send(&channel.config, kind, monitor, result).await;
            (channel, outcome)
        });

        let mut failed = 0;
        for (channel, outcome) in join_all(sends).await {
            if let Err(e) = outcome {
                failed += 1;
                error!(monitor_id = %monitor.id, channel_id = %channel.id, %kind, error = %e, "Notification failed");
            }
        }
        (channels.len() - failed, failed)
    }
}
