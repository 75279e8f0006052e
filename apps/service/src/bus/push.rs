//! HTTP push transport.
//!
//! Outgoing messages are wrapped in a managed-bus style push envelope and
//! POSTed with a signed bearer token to every endpoint configured for the
//! topic. Incoming pushes are verified by [`PushReceiver`] and handed to
//! the local inbox the process subscribes to.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::auth::PushAuth;
use super::{BusError, Envelope, LocalBus, MessageBus, Subscription};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64 of the JSON payload
    pub data: String,
    pub message_id: String,
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub subscription: String,
    pub message: PushMessage,
}

impl PushEnvelope {
    pub fn wrap(envelope: &Envelope) -> Result<Self, BusError> {
        let raw = serde_json::to_vec(&envelope.payload)
            .map_err(|source| BusError::Encode { topic: envelope.topic.clone(), source })?;

        Ok(Self {
            subscription: envelope.topic.clone(),
            message: PushMessage {
                data: STANDARD.encode(raw),
                message_id: envelope.message_id.clone(),
                publish_time: envelope.published_at,
                attributes: BTreeMap::from([("topic".to_string(), envelope.topic.clone())]),
            },
        })
    }

    /// Unwrap into an [`Envelope`] for `fallback_topic` unless the message
    /// names its own topic.
    pub fn unwrap(self, fallback_topic: &str) -> Result<Envelope, String> {
        let raw = STANDARD.decode(self.message.data.as_bytes()).map_err(|e| format!("bad base64: {e}"))?;
        let payload = serde_json::from_slice(&raw).map_err(|e| format!("bad json payload: {e}"))?;
        let topic = self
            .message
            .attributes
            .get("topic")
            .cloned()
            .unwrap_or_else(|| fallback_topic.to_string());

        Ok(Envelope {
            topic,
            message_id: self.message.message_id,
            published_at: self.message.publish_time,
            payload,
        })
    }
}

/// Publisher half of the push transport
pub struct PushBus {
    client: reqwest::Client,
    auth: PushAuth,
    endpoints: BTreeMap<String, Vec<String>>,
    inbox: Arc<LocalBus>,
}

impl PushBus {
    pub fn new(
        auth: PushAuth,
        endpoints: BTreeMap<String, Vec<String>>,
        inbox: Arc<LocalBus>,
    ) -> Result<Self, BusError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BusError::Delivery { endpoint: "client".into(), reason: e.to_string() })?;

        Ok(Self { client, auth, endpoints, inbox })
    }

    async fn post(&self, endpoint: &str, body: &PushEnvelope, token: &str) -> Result<(), BusError> {
        let fail = |reason: String| BusError::Delivery { endpoint: endpoint.to_string(), reason };

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fail(format!("status {}", response.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for PushBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<String, BusError> {
        let envelope = Envelope::new(topic, payload);
        let message_id = envelope.message_id.clone();

        let Some(endpoints) = self.endpoints.get(topic).filter(|e| !e.is_empty()) else {
            debug!(%topic, "No push endpoints, delivering locally");
            self.inbox.deliver(envelope);
            return Ok(message_id);
        };

        let body = PushEnvelope::wrap(&envelope)?;
        let token = self.auth.sign()?;

        let outcomes = join_all(endpoints.iter().map(|endpoint| self.post(endpoint, &body, &token))).await;
        let mut delivered = 0;
        let mut last_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%topic, %message_id, error = %e, "Push delivery failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(message_id),
        }
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        self.inbox.subscribe(topic)
    }
}

/// What became of an inbound push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered { topic: String, receivers: usize },
    Rejected(String),
}

/// Verifies inbound pushes and feeds them to the local inbox.
///
/// The HTTP layer acknowledges every push regardless of the outcome, so
/// malformed or unauthenticated messages are dropped here, not retried.
pub struct PushReceiver {
    auth: PushAuth,
    inbox: Arc<LocalBus>,
}

impl PushReceiver {
    pub fn new(auth: PushAuth, inbox: Arc<LocalBus>) -> Self {
        Self { auth, inbox }
    }

    pub fn accept(&self, topic: &str, authorization: Option<&str>, body: &[u8]) -> PushOutcome {
        if let Err(e) = self.auth.verify_header(authorization) {
            warn!(%topic, error = %e, "Rejected push with bad token");
            return PushOutcome::Rejected(e.to_string());
        }

        let envelope = match serde_json::from_slice::<PushEnvelope>(body)
            .map_err(|e| format!("bad push envelope: {e}"))
            .and_then(|push| push.unwrap(topic))
        {
            Ok(envelope) => envelope,
            Err(reason) => {
                warn!(%topic, %reason, "Dropping malformed push");
                return PushOutcome::Rejected(reason);
            }
        };

        if envelope.topic != topic {
            warn!(route = %topic, claimed = %envelope.topic, "Push topic does not match route");
            return PushOutcome::Rejected(format!("topic mismatch: {}", envelope.topic));
        }

        let message_id = envelope.message_id.clone();
        let receivers = self.inbox.deliver(envelope);
        info!(%topic, %message_id, receivers, "Accepted push");
        PushOutcome::Delivered { topic: topic.to_string(), receivers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn auth() -> PushAuth {
        PushAuth::new("secret", "apimon", "apimon-push")
    }

    fn body(topic: &str, payload: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&PushEnvelope::wrap(&Envelope::new(topic, payload)).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_signed_push() {
        let inbox = Arc::new(LocalBus::new(8));
        let mut sub = inbox.subscribe("apimon-monitor-postrequest");
        let receiver = PushReceiver::new(auth(), inbox);

        let header = format!("Bearer {}", auth().sign().unwrap());
        let outcome = receiver.accept(
            "apimon-monitor-postrequest",
            Some(&header),
            &body("apimon-monitor-postrequest", json!({"monitorId": "m1"})),
        );

        assert_eq!(
            outcome,
            PushOutcome::Delivered { topic: "apimon-monitor-postrequest".into(), receivers: 1 }
        );
        assert_eq!(sub.next().await.unwrap().payload, json!({"monitorId": "m1"}));
    }

    #[tokio::test]
    async fn test_rejects_without_delivering() {
        let inbox = Arc::new(LocalBus::new(8));
        let receiver = PushReceiver::new(auth(), inbox.clone());
        let header = format!("Bearer {}", auth().sign().unwrap());

        assert!(matches!(receiver.accept("t", None, &body("t", json!(1))), PushOutcome::Rejected(_)));
        assert!(matches!(receiver.accept("t", Some(&header), b"{not json"), PushOutcome::Rejected(_)));
        assert!(matches!(
            receiver.accept("t", Some(&header), &body("other", json!(1))),
            PushOutcome::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_topic_without_endpoints_stays_local() {
        let inbox = Arc::new(LocalBus::new(8));
        let mut sub = inbox.subscribe("t");
        let bus = PushBus::new(auth(), BTreeMap::new(), inbox).unwrap();

        let id = bus.publish("t", json!({"a": 1})).await.unwrap();
        assert_eq!(sub.next().await.unwrap().message_id, id);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_publish() {
        let endpoints = BTreeMap::from([("t".to_string(), vec!["http://127.0.0.1:9/push".to_string()])]);
        let bus = PushBus::new(auth(), endpoints, Arc::new(LocalBus::new(8))).unwrap();

        assert!(matches!(bus.publish("t", json!(1)).await, Err(BusError::Delivery { .. })));
    }
}
