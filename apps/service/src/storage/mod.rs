//! Storage collaborator
//!
//! The pipeline reads monitors, settings and result history through the
//! [`Storage`] trait and writes results and escalation log entries. The
//! relational backend lives outside this service; [`memory::InMemoryStorage`]
//! backs single-process deployments and tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use probe::{Monitor, MonitorResult, MonitorStatus, Thresholds, Tuples};
use serde::{Deserialize, Serialize};
use tracing::error;

pub use memory::InMemoryStorage;

use crate::notify::NotificationChannel;

/// Escalation log entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    MonitorDown,
    MonitorRecovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub account_id: String,
    pub monitor_id: String,
    pub kind: ActivityKind,
    #[serde(default)]
    pub result_id: Option<String>,
    #[serde(default)]
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(kind: ActivityKind, monitor: &Monitor, result_id: Option<&str>, message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: monitor.account_id.clone(),
            monitor_id: monitor.id.clone(),
            kind,
            result_id: result_id.map(str::to_string),
            message,
            created_at: Utc::now(),
        }
    }
}

/// Account-wide escalation defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    pub account_id: String,
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub fail_time_minutes: u32,
}

impl AccountSettings {
    pub fn thresholds(&self, channels: Vec<String>) -> Thresholds {
        Thresholds { fail_count: self.fail_count, fail_time_minutes: self.fail_time_minutes, channels }
    }
}

/// Bounds on how much history the in-memory store keeps
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Newest results kept per monitor
    pub max_results_per_monitor: usize,
    /// Newest escalation log entries kept per monitor
    pub max_activity_per_monitor: usize,
    /// Results older than this are dropped by the periodic sweep
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_results_per_monitor: 1000, max_activity_per_monitor: 100, max_age: Duration::hours(24) }
    }
}

/// Storage trait for abstracting persistence of monitors, results and logs
#[async_trait]
pub trait Storage: Send + Sync {
    async fn monitors_with_status(&self, status: MonitorStatus) -> Result<Vec<Monitor>>;

    async fn get_monitor(&self, monitor_id: &str) -> Result<Option<Monitor>>;

    /// Persist a result and return the stored record
    async fn insert_result(&self, result: &MonitorResult) -> Result<MonitorResult>;

    /// Persist a result, logging instead of failing
    async fn save_result(&self, result: &MonitorResult) -> Option<MonitorResult> {
        match self.insert_result(result).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                error!(monitor_id = %result.monitor_id, result_id = %result.id, error = %e, "Failed to save result");
                None
            }
        }
    }

    async fn get_result(&self, result_id: &str) -> Result<Option<MonitorResult>>;

    /// Most recent results of a monitor, newest first
    async fn list_recent_results(&self, monitor_id: &str, limit: usize) -> Result<Vec<MonitorResult>>;

    /// Newest result created at or before `before`
    async fn latest_result_before(
        &self,
        monitor_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<MonitorResult>>;

    /// Results created strictly after `since`, newest first
    async fn results_since(&self, monitor_id: &str, since: DateTime<Utc>) -> Result<Vec<MonitorResult>>;

    async fn append_activity(&self, entry: ActivityEntry) -> Result<()>;

    /// Newest escalation log entry of a monitor
    async fn latest_activity(&self, monitor_id: &str) -> Result<Option<ActivityEntry>>;

    async fn account_settings(&self, account_id: &str) -> Result<AccountSettings>;

    async fn notification_channels(&self, account_id: &str) -> Result<Vec<NotificationChannel>>;

    /// Variables of a named environment
    async fn environment(&self, account_id: &str, env_id: &str) -> Result<Option<Tuples>>;

    async fn global_environment(&self, account_id: &str) -> Result<Tuples>;
}
