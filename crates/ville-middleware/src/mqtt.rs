//! MQTT transport backed by `rumqttc`.
//!
//! [`connect`] opens the connection and waits for the broker's `CONNACK`
//! before returning, so a broker that is down or refusing the client fails
//! gateway startup instead of surfacing later.
//!
//! The returned [`MqttDeliveries`] owns the `rumqttc` event loop.  Polling
//! it drives all network I/O – including queued publishes – and yields
//! inbound `PUBLISH` packets as [`Delivery`] values.  After every successful
//! reconnect all recorded subscriptions are sent again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tracing::{debug, info, warn};
use ville_types::VilleError;

use crate::transport::{Delivery, DeliverySource, Transport};

/// Fire-and-forget, matching what the backend and field clients use.
const QOS: QoS = QoS::AtMostOnce;

/// Connection parameters for an MQTT broker.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub client_id: String,
    /// Capacity of the client's outgoing request queue.
    pub request_capacity: usize,
    /// Upper bound on waiting for the initial `CONNACK`.
    pub connect_timeout: Duration,
    /// Pause between reconnect attempts after a connection error.
    pub reconnect_delay: Duration,
    /// Largest packet accepted from or sent to the broker, in bytes.
    pub max_packet_size: usize,
}

/// Backend movement batches for a full town with chat exceed `rumqttc`'s
/// 10 KiB default.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keepalive: Duration::from_secs(60),
            client_id: "ville-gateway".to_string(),
            request_capacity: 64,
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Connect to the broker described by `settings`.
///
/// # Errors
///
/// Returns [`VilleError::Transport`] when the broker cannot be reached,
/// rejects the connection, or does not answer within `connect_timeout`.
pub async fn connect(settings: &MqttSettings) -> Result<(MqttTransport, MqttDeliveries), VilleError> {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keepalive);
    options.set_max_packet_size(settings.max_packet_size, settings.max_packet_size);

    let (client, mut eventloop) = AsyncClient::new(options, settings.request_capacity);

    let handshake = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(VilleError::Transport(format!("broker refused connection: {:?}", ack.code)))
                    };
                }
                Ok(_) => continue,
                Err(e) => {
                    return Err(VilleError::Transport(format!(
                        "connect to {}:{} failed: {e}",
                        settings.host, settings.port
                    )));
                }
            }
        }
    };

    tokio::time::timeout(settings.connect_timeout, handshake)
        .await
        .map_err(|_| {
            VilleError::Transport(format!(
                "no CONNACK from {}:{} within {:?}",
                settings.host, settings.port, settings.connect_timeout
            ))
        })??;

    info!(host = %settings.host, port = settings.port, "connected to MQTT broker");

    let subscriptions = Arc::new(Mutex::new(Vec::new()));
    let closing = Arc::new(AtomicBool::new(false));

    let transport = MqttTransport {
        client: client.clone(),
        subscriptions: Arc::clone(&subscriptions),
        closing: Arc::clone(&closing),
    };
    let deliveries = MqttDeliveries {
        eventloop,
        client,
        subscriptions,
        closing,
        reconnect_delay: settings.reconnect_delay,
    };
    Ok((transport, deliveries))
}

type Subscriptions = Arc<Mutex<Vec<String>>>;

fn client_error(action: &str, topic: &str, e: rumqttc::ClientError) -> VilleError {
    VilleError::Transport(format!("{action} `{topic}`: {e}"))
}

// ---------------------------------------------------------------------------
// Outbound half
// ---------------------------------------------------------------------------

/// Outbound half of an MQTT connection.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    subscriptions: Subscriptions,
    closing: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), VilleError> {
        self.client
            .subscribe(topic, QOS)
            .await
            .map_err(|e| client_error("subscribe", topic, e))?;
        if let Ok(mut subs) = self.subscriptions.lock()
            && !subs.iter().any(|t| t == topic)
        {
            subs.push(topic.to_string());
        }
        info!(topic, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), VilleError> {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.retain(|t| t != topic);
        }
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| client_error("unsubscribe", topic, e))
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), VilleError> {
        self.client
            .try_publish(topic, QOS, false, payload)
            .map_err(|e| client_error("publish", topic, e))
    }

    async fn disconnect(&self) -> Result<(), VilleError> {
        self.closing.store(true, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| VilleError::Transport(format!("disconnect: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Inbound half
// ---------------------------------------------------------------------------

/// Inbound half of an MQTT connection; owns the network event loop.
pub struct MqttDeliveries {
    eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Subscriptions,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

impl MqttDeliveries {
    fn resubscribe(&self) {
        let topics = match self.subscriptions.lock() {
            Ok(subs) => subs.clone(),
            Err(_) => return,
        };
        for topic in topics {
            match self.client.try_subscribe(topic.as_str(), QOS) {
                Ok(()) => info!(topic = %topic, "re-subscribed after reconnect"),
                Err(e) => warn!(topic = %topic, error = %e, "re-subscribe failed"),
            }
        }
    }
}

#[async_trait]
impl DeliverySource for MqttDeliveries {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(Delivery::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("reconnected to MQTT broker");
                        self.resubscribe();
                    } else {
                        warn!(code = ?ack.code, "broker refused reconnect");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("broker sent DISCONNECT");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("disconnect sent; closing delivery stream");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        return None;
                    }
                    warn!(error = %e, "MQTT connection error; reconnecting");
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_local_broker() {
        let s = MqttSettings::default();
        assert_eq!(s.host, "localhost");
        assert_eq!(s.port, 1883);
        assert_eq!(s.keepalive, Duration::from_secs(60));
    }

    /// Append an MQTT variable-length "remaining length" field.
    fn push_remaining_length(buf: &mut Vec<u8>, mut len: usize) {
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            buf.push(byte);
            if len == 0 {
                break;
            }
        }
    }

    /// A QoS 0 `PUBLISH` packet.
    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x30];
        push_remaining_length(&mut packet, 2 + topic.len() + payload.len());
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    /// Accept one client, acknowledge its `CONNECT`, then push `packet`.
    /// The socket stays open until the returned task is dropped.
    async fn single_publish_broker(packet: Vec<u8>) -> (u16, tokio::task::JoinHandle<()>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut connect = [0u8; 256];
            let _ = socket.read(&mut connect).await.unwrap();
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            socket.write_all(&packet).await.unwrap();
            let mut rest = [0u8; 256];
            while let Ok(n) = socket.read(&mut rest).await {
                if n == 0 {
                    break;
                }
            }
        });
        (port, task)
    }

    #[test]
    fn default_packet_limit_is_well_above_ten_kib() {
        assert!(MqttSettings::default().max_packet_size >= 1024 * 1024);
    }

    #[tokio::test]
    async fn payload_over_ten_kib_is_delivered() {
        let payload = vec![b'x'; 48 * 1024];
        let (port, broker) =
            single_publish_broker(publish_packet("backend/movement", &payload)).await;

        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            ..MqttSettings::default()
        };
        let (_transport, mut deliveries) = connect(&settings).await.unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.next_delivery())
            .await
            .expect("delivery within timeout")
            .expect("delivery stream open");

        assert_eq!(delivery.topic, "backend/movement");
        assert_eq!(delivery.payload.len(), payload.len());
        broker.abort();
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails_fast() {
        // Bind then drop a listener to find a port nobody is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_secs(2),
            ..MqttSettings::default()
        };
        let result = connect(&settings).await;
        assert!(matches!(result, Err(VilleError::Transport(_))));
    }
}
