use std::time::Duration;

use async_trait::async_trait;
use probe::{Monitor, MonitorResult};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::info;

use super::{ChannelConfig, ChannelSender, NotificationKind, NotifyError, message};

/// Sender for chat webhooks (Slack and Microsoft Teams)
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

fn slack_payload(text: String) -> Value {
    json!({ "text": text })
}

fn teams_payload(text: String) -> Value {
    json!({
        "type": "message",
        "attachments": [{
            "contentType": "application/vnd.microsoft.card.adaptive",
            "contentUrl": null,
            "content": {
                "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                "type": "AdaptiveCard",
                "version": "1.2",
                "body": [{ "type": "TextBlock", "text": text, "wrap": true }]
            }
        }]
    })
}

#[async_trait]
impl ChannelSender for WebhookSender {
    async fn send(
        &self,
        channel: &ChannelConfig,
        kind: NotificationKind,
        monitor: &Monitor,
        result: &MonitorResult,
    ) -> Result<(), NotifyError> {
        let text = message(kind, monitor, result);
        let (url, payload) = match channel {
            ChannelConfig::Slack { webhook_url } => (webhook_url, slack_payload(text)),
            ChannelConfig::MsTeams { webhook_url } => (webhook_url, teams_payload(text)),
            ChannelConfig::Email { .. } => {
                return Err(NotifyError::SendFailed("email channel given to webhook sender".into()));
            }
        };

        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::SendFailed(format!(
                "{} webhook returned {}",
                channel.kind(),
                response.status()
            )));
        }

        info!(monitor_id = %monitor.id, channel = channel.kind(), %kind, "Webhook notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teams_card_carries_text() {
        let payload = teams_payload("hello".into());
        assert_eq!(payload["attachments"][0]["content"]["body"][0]["text"], "hello");
        assert_eq!(slack_payload("hi".into()), json!({"text": "hi"}));
    }
}
