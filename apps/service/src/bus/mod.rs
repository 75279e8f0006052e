//! Message bus gateway.
//!
//! Every component talks to a [`MessageBus`] handed to it at construction.
//! [`local::LocalBus`] delivers within one process; [`push::PushBus`] sends
//! signed HTTP pushes to other processes and receives theirs through a
//! [`push::PushReceiver`].

pub mod auth;
pub mod local;
pub mod messages;
pub mod push;
pub mod topics;

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use local::LocalBus;
pub use topics::Topics;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to encode payload for {topic}: {source}")]
    Encode { topic: String, source: serde_json::Error },
    #[error("failed to decode payload from {topic}: {source}")]
    Decode { topic: String, source: serde_json::Error },
    #[error("push token error: {0}")]
    Auth(#[from] auth::PushAuthError),
    #[error("delivery to {endpoint} failed: {reason}")]
    Delivery { endpoint: String, reason: String },
}

/// A message as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub topic: String,
    pub message_id: String,
    pub published_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(topic: &str, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            published_at: Utc::now(),
            payload,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|source| BusError::Decode { topic: self.topic.clone(), source })
    }
}

/// Receiving end of a topic
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub(crate) fn new(topic: &str, rx: broadcast::Receiver<Envelope>) -> Self {
        Self { topic: topic.to_string(), rx }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once the topic is gone. Messages dropped
    /// because this subscriber fell behind are logged and skipped.
    pub async fn next(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic` and return the message id.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<String, BusError>;

    /// Subscribe to `topic`. Only messages published afterwards are seen.
    fn subscribe(&self, topic: &str) -> Subscription;
}

/// Serialize `message` and publish it.
pub async fn publish_json<T: Serialize + Sync>(
    bus: &dyn MessageBus,
    topic: &str,
    message: &T,
) -> Result<String, BusError> {
    let payload = serde_json::to_value(message)
        .map_err(|source| BusError::Encode { topic: topic.to_string(), source })?;
    bus.publish(topic, payload).await
}

/// Run `handler` for every message decoded from `subscription`.
///
/// Each message is handled on its own task so a slow handler never holds
/// up the topic. Undecodable messages are logged and dropped.
pub fn spawn_handler<T, F, Fut>(mut subscription: Subscription, handler: F) -> JoinHandle<()>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(envelope) = subscription.next().await {
            match envelope.decode::<T>() {
                Ok(message) => {
                    tokio::spawn(handler(message));
                }
                Err(e) => warn!(message_id = %envelope.message_id, error = %e, "Dropping malformed message"),
            }
        }
        debug!(topic = %subscription.topic(), "Subscription closed");
    })
}
