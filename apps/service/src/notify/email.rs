use std::time::Duration;

use async_trait::async_trait;
use probe::{Monitor, MonitorResult};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{error, info};

use super::{ChannelConfig, ChannelSender, NotificationKind, NotifyError, message, subject};

pub const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Email delivery through the SendGrid v3 mail API
#[derive(Clone)]
pub struct EmailSender {
    api_key: String,
    from_email: String,
    url: String,
    client: Client,
}

impl EmailSender {
    pub fn new(api_key: String, from_email: String, url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { api_key, from_email, url: url.unwrap_or_else(|| SENDGRID_URL.to_string()), client }
    }

    fn payload(&self, to_email: &str, subject: &str, body: &str) -> Value {
        json!({
            "personalizations": [{
                "to": [{ "email": to_email }]
            }],
            "from": { "email": self.from_email },
            "subject": subject,
            "content": [{
                "type": "text/plain",
                "value": body
            }]
        })
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(
        &self,
        channel: &ChannelConfig,
        kind: NotificationKind,
        monitor: &Monitor,
        result: &MonitorResult,
    ) -> Result<(), NotifyError> {
        let ChannelConfig::Email { email } = channel else {
            return Err(NotifyError::SendFailed("non-email channel given to email sender".into()));
        };

        let payload = self.payload(email, &subject(kind, monitor), &message(kind, monitor, result));
        let response = self.client.post(&self.url).bearer_auth(&self.api_key).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "No response body".to_string());
            error!("SendGrid API error: {} - {}", status, text);
            return Err(NotifyError::SendFailed(format!("SendGrid API error: {status} - {text}")));
        }

        info!(monitor_id = %monitor.id, %kind, "Alert email sent to {} with status {}", email, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let sender = EmailSender::new("key".into(), "alerts@apimon.test".into(), None);
        let payload = sender.payload("ops@shop.test", "Monitor x is down", "body");

        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "ops@shop.test");
        assert_eq!(payload["from"]["email"], "alerts@apimon.test");
        assert_eq!(payload["content"][0]["value"], "body");
        assert_eq!(sender.url, SENDGRID_URL);
    }
}
