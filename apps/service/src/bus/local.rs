use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use super::{BusError, Envelope, MessageBus, Subscription};

/// In-process bus built from one broadcast channel per topic
pub struct LocalBus {
    capacity: usize,
    topics: DashMap<String, broadcast::Sender<Envelope>>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), topics: DashMap::new() }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Envelope> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Deliver an envelope as received, keeping its id and timestamp.
    pub fn deliver(&self, envelope: Envelope) -> usize {
        let topic = envelope.topic.clone();
        let message_id = envelope.message_id.clone();
        match self.sender(&topic).send(envelope) {
            Ok(receivers) => receivers,
            Err(_) => {
                // no subscribers
                debug!(%topic, %message_id, "Message published with no subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<String, BusError> {
        let envelope = Envelope::new(topic, payload);
        let message_id = envelope.message_id.clone();
        self.deliver(envelope);
        Ok(message_id)
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        Subscription::new(topic, self.sender(topic).subscribe())
    }
}
