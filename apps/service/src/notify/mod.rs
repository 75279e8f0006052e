//! Notification channels.
//!
//! A channel is stored per account with a [`ChannelConfig`] naming its type.
//! [`Notifier`] routes each send to the sender for that type.

pub mod email;
pub mod webhook;

use std::fmt;

use async_trait::async_trait;
use probe::{Monitor, MonitorResult, assertions::format_failures};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use email::EmailSender;
pub use webhook::WebhookSender;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Channel type not configured: {0}")]
    NotConfigured(&'static str),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChannelConfig {
    Slack { webhook_url: String },
    MsTeams { webhook_url: String },
    Email { email: String },
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Slack { .. } => "slack",
            ChannelConfig::MsTeams { .. } => "msTeams",
            ChannelConfig::Email { .. } => "email",
        }
    }
}

/// A configured destination owned by an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub name: String,
    /// Used by monitors that follow the account defaults
    #[serde(default)]
    pub default_enabled: bool,
    pub config: ChannelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Alert,
    Recover,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Alert => f.write_str("Alert"),
            NotificationKind::Recover => f.write_str("Recover"),
        }
    }
}

/// Subject line for a notification
pub fn subject(kind: NotificationKind, monitor: &Monitor) -> String {
    match kind {
        NotificationKind::Alert => format!("Monitor {} is down", monitor.name),
        NotificationKind::Recover => format!("Monitor {} recovered", monitor.name),
    }
}

/// Plain-text message body shared by every channel type
pub fn message(kind: NotificationKind, monitor: &Monitor, result: &MonitorResult) -> String {
    let mut lines = match kind {
        NotificationKind::Alert => vec![format!("Monitor *{}* failed", monitor.name)],
        NotificationKind::Recover => vec![format!("Monitor *{}* recovered and is up now", monitor.name)],
    };
    lines.push(format!("Url: {}", monitor.url));
    lines.push(format!("Location: {}", result.location));

    if kind == NotificationKind::Alert {
        lines.push(format!("Error: {}", result.err));
        let failures = format_failures(result);
        if !failures.is_empty() {
            lines.push(failures);
        }
    }
    lines.push(format!("Result: {}", result.id));
    lines.join("\n")
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(
        &self,
        channel: &ChannelConfig,
        kind: NotificationKind,
        monitor: &Monitor,
        result: &MonitorResult,
    ) -> Result<(), NotifyError>;
}

/// Routes each channel type to its sender
pub struct Notifier {
    webhook: WebhookSender,
    email: Option<EmailSender>,
}

impl Notifier {
    pub fn new(webhook: WebhookSender, email: Option<EmailSender>) -> Self {
        Self { webhook, email }
    }
}

#[async_trait]
impl ChannelSender for Notifier {
    async fn send(
        &self,
        channel: &ChannelConfig,
        kind: NotificationKind,
        monitor: &Monitor,
        result: &MonitorResult,
    ) -> Result<(), NotifyError> {
        match channel {
            ChannelConfig::Slack { .. } | ChannelConfig::MsTeams { .. } => {
                self.webhook.send(channel, kind, monitor, result).await
            }
            ChannelConfig::Email { .. } => match &self.email {
                Some(sender) => sender.send(channel, kind, monitor, result).await,
                None => Err(NotifyError::NotConfigured("email")),
            },
        }
    }
}
