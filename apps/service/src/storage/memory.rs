use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use probe::{Monitor, MonitorResult, MonitorStatus, Tuples};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{AccountSettings, ActivityEntry, RetentionPolicy, Storage};
use crate::notify::NotificationChannel;

#[derive(Debug, Default)]
struct State {
    monitors: HashMap<String, Monitor>,
    /// Per-monitor history ordered by `created_at`, oldest first
    results: HashMap<String, VecDeque<MonitorResult>>,
    /// Result id to owning monitor id
    result_index: HashMap<String, String>,
    activity: HashMap<String, VecDeque<ActivityEntry>>,
    settings: HashMap<String, AccountSettings>,
    channels: Vec<NotificationChannel>,
    environments: HashMap<(String, String), Tuples>,
    globals: HashMap<String, Tuples>,
}

impl State {
    fn history(&self, monitor_id: &str) -> impl DoubleEndedIterator<Item = &MonitorResult> {
        self.results.get(monitor_id).into_iter().flatten()
    }

    /// Drop results created before `cutoff`, returning how many went
    fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut pruned = 0;
        let index = &mut self.result_index;
        self.results.retain(|_, history| {
            let expired = history.partition_point(|r| r.created_at < cutoff);
            for result in history.drain(..expired) {
                index.remove(&result.id);
            }
            pruned += expired;
            !history.is_empty()
        });
        pruned
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Seed {
    #[serde(default)]
    monitors: Vec<Monitor>,
    #[serde(default)]
    settings: Vec<AccountSettings>,
    #[serde(default)]
    channels: Vec<NotificationChannel>,
    #[serde(default)]
    environments: Vec<SeedEnvironment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedEnvironment {
    account_id: String,
    /// Absent for the account's global environment
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    variables: Tuples,
}

/// Process-local storage with bounded result and activity history
#[derive(Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
    policy: RetentionPolicy,
    fail_writes: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load monitors, settings, channels and environments from a JSON file
    pub async fn from_seed_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading seed file {}", path.display()))?;
        let seed: Seed = serde_json::from_str(&raw).context("parsing seed file")?;

        let storage = Self::new();
        {
            let mut state = storage.state.write().await;
            for monitor in seed.monitors {
                state.monitors.insert(monitor.id.clone(), monitor);
            }
            for settings in seed.settings {
                state.settings.insert(settings.account_id.clone(), settings);
            }
            state.channels = seed.channels;
            for env in seed.environments {
                match env.id {
                    Some(id) => {
                        state.environments.insert((env.account_id, id), env.variables);
                    }
                    None => {
                        state.globals.insert(env.account_id, env.variables);
                    }
                }
            }
            info!(monitors = state.monitors.len(), channels = state.channels.len(), "Loaded storage seed");
        }
        Ok(storage)
    }

    pub async fn upsert_monitor(&self, monitor: Monitor) {
        self.state.write().await.monitors.insert(monitor.id.clone(), monitor);
    }

    pub async fn set_account_settings(&self, settings: AccountSettings) {
        self.state.write().await.settings.insert(settings.account_id.clone(), settings);
    }

    pub async fn add_channel(&self, channel: NotificationChannel) {
        self.state.write().await.channels.push(channel);
    }

    pub async fn set_environment(&self, account_id: &str, env_id: &str, variables: Tuples) {
        self.state
            .write()
            .await
            .environments
            .insert((account_id.to_string(), env_id.to_string()), variables);
    }

    pub async fn set_global_environment(&self, account_id: &str, variables: Tuples) {
        self.state.write().await.globals.insert(account_id.to_string(), variables);
    }

    /// Retained escalation entries of a monitor, oldest first
    pub async fn activity_for(&self, monitor_id: &str) -> Vec<ActivityEntry> {
        let state = self.state.read().await;
        state.activity.get(monitor_id).map(|a| a.iter().cloned().collect()).unwrap_or_default()
    }

    pub async fn result_count(&self) -> usize {
        self.state.read().await.result_index.len()
    }

    /// Drop every result created before `cutoff`
    pub async fn prune_results_before(&self, cutoff: DateTime<Utc>) -> usize {
        self.state.write().await.prune_before(cutoff)
    }

    /// Sweep results older than the policy's `max_age` every `every`
    pub fn start_periodic_cleanup(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let cutoff = Utc::now() - self.policy.max_age;
                match self.prune_results_before(cutoff).await {
                    0 => debug!("Retention sweep found nothing to drop"),
                    pruned => info!(pruned, %cutoff, "Retention sweep dropped expired results"),
                }
            }
        })
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("storage is read-only");
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn monitors_with_status(&self, status: MonitorStatus) -> Result<Vec<Monitor>> {
        let state = self.state.read().await;
        let mut monitors: Vec<Monitor> =
            state.monitors.values().filter(|m| m.status == status).cloned().collect();
        monitors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(monitors)
    }

    async fn get_monitor(&self, monitor_id: &str) -> Result<Option<Monitor>> {
        Ok(self.state.read().await.monitors.get(monitor_id).cloned())
    }

    async fn insert_result(&self, result: &MonitorResult) -> Result<MonitorResult> {
        self.check_writable()?;
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.result_index.contains_key(&result.id) {
            bail!("result {} already stored", result.id);
        }

        let history = state.results.entry(result.monitor_id.clone()).or_default();
        let at = history.partition_point(|r| r.created_at <= result.created_at);
        history.insert(at, result.clone());
        state.result_index.insert(result.id.clone(), result.monitor_id.clone());

        while history.len() > self.policy.max_results_per_monitor {
            if let Some(evicted) = history.pop_front() {
                state.result_index.remove(&evicted.id);
            }
        }
        Ok(result.clone())
    }

    async fn get_result(&self, result_id: &str) -> Result<Option<MonitorResult>> {
        let state = self.state.read().await;
        let Some(monitor_id) = state.result_index.get(result_id) else {
            return Ok(None);
        };
        Ok(state.history(monitor_id).rev().find(|r| r.id == result_id).cloned())
    }

    async fn list_recent_results(&self, monitor_id: &str, limit: usize) -> Result<Vec<MonitorResult>> {
        let state = self.state.read().await;
        Ok(state.history(monitor_id).rev().take(limit).cloned().collect())
    }

    async fn latest_result_before(
        &self,
        monitor_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<MonitorResult>> {
        let state = self.state.read().await;
        Ok(state.history(monitor_id).rev().find(|r| r.created_at <= before).cloned())
    }

    async fn results_since(&self, monitor_id: &str, since: DateTime<Utc>) -> Result<Vec<MonitorResult>> {
        let state = self.state.read().await;
        Ok(state.history(monitor_id).rev().take_while(|r| r.created_at > since).cloned().collect())
    }

    async fn append_activity(&self, entry: ActivityEntry) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let log = state.activity.entry(entry.monitor_id.clone()).or_default();
        log.push_back(entry);
        while log.len() > self.policy.max_activity_per_monitor {
            log.pop_front();
        }
        Ok(())
    }

    async fn latest_activity(&self, monitor_id: &str) -> Result<Option<ActivityEntry>> {
        let state = self.state.read().await;
        // entries are appended in order, the back is the newest
        Ok(state.activity.get(monitor_id).and_then(|a| a.back()).cloned())
    }

    async fn account_settings(&self, account_id: &str) -> Result<AccountSettings> {
        let state = self.state.read().await;
        Ok(state
            .settings
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| AccountSettings { account_id: account_id.to_string(), ..Default::default() }))
    }

    async fn notification_channels(&self, account_id: &str) -> Result<Vec<NotificationChannel>> {
        let state = self.state.read().await;
        Ok(state.channels.iter().filter(|c| c.account_id == account_id).cloned().collect())
    }

    async fn environment(&self, account_id: &str, env_id: &str) -> Result<Option<Tuples>> {
        let state = self.state.read().await;
        Ok(state.environments.get(&(account_id.to_string(), env_id.to_string())).cloned())
    }

    async fn global_environment(&self, account_id: &str) -> Result<Tuples> {
        Ok(self.state.read().await.globals.get(account_id).cloned().unwrap_or_default())
    }
}
