//! `ville-supervisor` – owns the lifecycle of the local MQTT broker process.
//!
//! # Modules
//!
//! - [`broker`] – [`BrokerSupervisor`]: probe, launch, readiness check and
//!   graceful-then-forceful stop of the broker executable.
//! - [`signal`] – process-group signalling.

pub mod broker;
pub mod signal;

pub use broker::{BrokerSettings, BrokerSupervisor};
