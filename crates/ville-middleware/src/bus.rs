//! In-process loopback bus.
//!
//! Uses a single [`tokio::sync::broadcast`] channel so that every connected
//! client sees every publication, the way clients of a real broker do, and
//! filters by subscribed topic on the receiving side.  Nothing is persisted:
//! a publication with no listening clients is simply dropped.
//!
//! The bus is what the integration tests and the mock fleet run against
//! when no broker process is available.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;
use ville_types::VilleError;

use crate::transport::{Delivery, DeliverySource, Transport};

/// Default channel capacity (number of buffered deliveries before old ones
/// are dropped for slow clients).
const DEFAULT_CAPACITY: usize = 256;

/// Shared loopback bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct LoopbackBus {
    sender: broadcast::Sender<Delivery>,
}

impl LoopbackBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `payload` on `topic`.
    ///
    /// Returns the number of connected clients that were handed the message.
    /// `0` is a normal condition, not an error.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> usize {
        self.sender
            .send(Delivery::new(topic, payload))
            .unwrap_or(0)
    }

    /// Listen to exactly one topic without going through a [`Transport`].
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> TopicSubscriber {
        TopicSubscriber {
            topic: topic.into(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Open a client connection: an outbound [`LoopbackTransport`] and the
    /// matching inbound [`LoopbackDeliveries`].
    ///
    /// The deliveries half only yields messages published after this call,
    /// on topics subscribed through the transport half.
    pub fn connect(&self) -> (LoopbackTransport, LoopbackDeliveries) {
        let subscriptions = Arc::new(Mutex::new(HashSet::new()));
        let transport = LoopbackTransport {
            bus: self.clone(),
            subscriptions: Arc::clone(&subscriptions),
        };
        let deliveries = LoopbackDeliveries {
            receiver: self.sender.subscribe(),
            subscriptions,
        };
        (transport, deliveries)
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

type Subscriptions = Arc<Mutex<HashSet<String>>>;

// ---------------------------------------------------------------------------
// Client halves
// ---------------------------------------------------------------------------

/// Outbound half of a loopback client.
pub struct LoopbackTransport {
    bus: LoopbackBus,
    subscriptions: Subscriptions,
}

impl LoopbackTransport {
    fn with_subscriptions<T>(&self, f: impl FnOnce(&mut HashSet<String>) -> T) -> Result<T, VilleError> {
        self.subscriptions
            .lock()
            .map(|mut set| f(&mut set))
            .map_err(|_| VilleError::Transport("loopback subscription table poisoned".to_string()))
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), VilleError> {
        self.with_subscriptions(|set| {
            set.insert(topic.to_string());
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), VilleError> {
        self.with_subscriptions(|set| {
            set.remove(topic);
        })
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), VilleError> {
        self.bus.publish(topic, payload);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VilleError> {
        self.with_subscriptions(|set| set.clear())
    }
}

/// Inbound half of a loopback client.
pub struct LoopbackDeliveries {
    receiver: broadcast::Receiver<Delivery>,
    subscriptions: Subscriptions,
}

impl LoopbackDeliveries {
    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .lock()
            .map(|set| set.contains(topic))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DeliverySource for LoopbackDeliveries {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            match self.receiver.recv().await {
                Ok(delivery) if self.is_subscribed(&delivery.topic) => return Some(delivery),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "loopback client lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Single-topic subscriber
// ---------------------------------------------------------------------------

/// A listener that only yields deliveries on one exact topic.
pub struct TopicSubscriber {
    topic: String,
    receiver: broadcast::Receiver<Delivery>,
}

impl TopicSubscriber {
    /// Wait for the next delivery on this subscriber's topic.
    ///
    /// Returns `None` when the bus is closed and nothing more will arrive.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.receiver.recv().await {
                Ok(delivery) if delivery.topic == self.topic => return Some(delivery),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_reaches_topic_subscriber() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LoopbackBus::default();
        let mut sub = bus.subscribe_topic("gateway/movement");

        bus.publish("backend/movement", b"ignored".to_vec());
        bus.publish("gateway/movement", b"{}".to_vec());

        let received = sub.recv().await.ok_or("no delivery")?;
        assert_eq!(received.topic, "gateway/movement");
        assert_eq!(received.payload, b"{}");
        Ok(())
    }

    #[test]
    fn publish_without_clients_is_not_an_error() {
        let bus = LoopbackBus::default();
        assert_eq!(bus.publish("nobody/listens", Vec::new()), 0);
    }

    #[tokio::test]
    async fn client_only_receives_subscribed_topics() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LoopbackBus::default();
        let (transport, mut deliveries) = bus.connect();
        transport.subscribe("robots/environment").await?;

        bus.publish("gateway/environment", b"1".to_vec());
        bus.publish("robots/environment", b"2".to_vec());

        let received = deliveries.next_delivery().await.ok_or("no delivery")?;
        assert_eq!(received.payload, b"2");
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LoopbackBus::default();
        let (transport, mut deliveries) = bus.connect();
        transport.subscribe("backend/movement").await?;
        transport.unsubscribe("backend/movement").await?;

        bus.publish("backend/movement", b"late".to_vec());

        let result = tokio::time::timeout(Duration::from_millis(50), deliveries.next_delivery()).await;
        assert!(result.is_err(), "unsubscribed topic must not be delivered");
        Ok(())
    }

    #[tokio::test]
    async fn transport_publish_is_seen_by_other_clients() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LoopbackBus::default();
        let (sender, _) = bus.connect();
        let (receiver, mut inbox) = bus.connect();
        receiver.subscribe("gateway/movement").await?;

        sender.publish("gateway/movement", b"cmd".to_vec())?;

        let received = inbox.next_delivery().await.ok_or("no delivery")?;
        assert_eq!(received.payload, b"cmd");
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_skips_lagged_messages() {
        let bus = LoopbackBus::new(4);
        let mut slow = bus.subscribe_topic("flood");

        for i in 0..100u8 {
            bus.publish("flood", vec![i]);
        }

        // The oldest messages were overwritten; the subscriber resumes at
        // the oldest retained one instead of failing.
        let first = slow.recv().await.expect("delivery after lag");
        assert_eq!(first.payload, vec![96]);
    }
}
