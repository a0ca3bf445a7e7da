//! `ville-middleware` – moves messages between the simulation backend and
//! the field.
//!
//! # Modules
//!
//! - [`transport`] – the publish/subscribe seam ([`Transport`],
//!   [`DeliverySource`]).
//! - [`mqtt`] – MQTT implementation of the seam.
//! - [`bus`] – in-process loopback implementation for tests and local runs.
//! - [`topics`] – inbound/outbound topic routing.
//! - [`directory`] – backend name ↔ field id mapping.
//! - [`gateway`] – [`GatewayCore`] and the delivery worker.
//! - [`mock_fleet`] – simulated field agents.

pub mod bus;
pub mod directory;
pub mod gateway;
pub mod mock_fleet;
pub mod mqtt;
pub mod topics;
pub mod transport;

pub use bus::{LoopbackBus, LoopbackDeliveries, LoopbackTransport, TopicSubscriber};
pub use directory::AgentDirectory;
pub use gateway::{DispatchReport, GatewayCore, GatewayState, WorkerStats, run_delivery_worker};
pub use mock_fleet::MockFleet;
pub use mqtt::{MqttDeliveries, MqttSettings, MqttTransport};
pub use topics::{InboundTopic, OutboundTopic, TopicMap};
pub use transport::{Delivery, DeliverySource, Transport};
