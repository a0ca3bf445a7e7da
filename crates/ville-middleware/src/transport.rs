//! The transport seam.
//!
//! The gateway never speaks to a broker directly.  It publishes through a
//! [`Transport`] and pulls inbound traffic from a [`DeliverySource`].  Two
//! implementations exist:
//!
//! - [`MqttTransport`][crate::mqtt::MqttTransport] – a real MQTT broker
//!   connection.
//! - [`LoopbackTransport`][crate::bus::LoopbackTransport] – an in-process
//!   broadcast bus for tests and local simulation.
//!
//! Transports are split in two halves so that exactly one task owns the
//! inbound side: the delivery worker holds the [`DeliverySource`] and the
//! handlers it drives only need `&dyn Transport` to publish.

use async_trait::async_trait;
use ville_types::VilleError;

/// Maximum number of payload bytes echoed into log lines.
pub const LOG_PAYLOAD_LIMIT: usize = 256;

/// One inbound message as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Lossy, length-capped rendering of the payload for log lines.
    pub fn truncated_payload(&self) -> String {
        truncate_payload(&self.payload, LOG_PAYLOAD_LIMIT)
    }
}

/// Render at most `limit` bytes of `payload`, marking the cut with `…`.
pub fn truncate_payload(payload: &[u8], limit: usize) -> String {
    if payload.len() <= limit {
        return String::from_utf8_lossy(payload).into_owned();
    }
    let mut text = String::from_utf8_lossy(&payload[..limit]).into_owned();
    text.push('…');
    text
}

/// Outbound half of a publish/subscribe connection.
///
/// # Contract
///
/// * `publish` queues the payload and returns immediately.  No delivery
///   acknowledgement is awaited, so handlers never block on the network.
/// * `subscribe` records the topic so that it is re-subscribed after every
///   reconnect.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), VilleError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), VilleError>;

    /// Queue `payload` for publication on `topic`.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), VilleError>;

    async fn disconnect(&self) -> Result<(), VilleError>;
}

/// Inbound half of a publish/subscribe connection.
#[async_trait]
pub trait DeliverySource: Send {
    /// Wait for the next message on any subscribed topic.
    ///
    /// Returns `None` once the connection is closed for good.
    async fn next_delivery(&mut self) -> Option<Delivery>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payload_is_kept_verbatim() {
        assert_eq!(truncate_payload(b"{\"step\":1}", 64), "{\"step\":1}");
    }

    #[test]
    fn long_payload_is_cut_and_marked() {
        let payload = vec![b'a'; 300];
        let text = truncate_payload(&payload, 10);
        assert_eq!(text, "aaaaaaaaaa…");
    }

    #[test]
    fn delivery_truncates_with_default_limit() {
        let d = Delivery::new("backend/movement", vec![b'x'; LOG_PAYLOAD_LIMIT + 5]);
        assert_eq!(d.truncated_payload().chars().count(), LOG_PAYLOAD_LIMIT + 1);
    }
}
