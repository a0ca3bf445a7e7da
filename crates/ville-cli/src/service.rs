//! The [`Gateway`] service object – one instance per process, owned by
//! `main`.
//!
//! Lifecycle: validate config → start broker → connect → subscribe → run the
//! delivery worker until shutdown → unsubscribe → disconnect → stop broker.
//! A failure in any startup step tears down whatever was already started.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use ville_middleware::mqtt::{self, MqttDeliveries, MqttTransport};
use ville_middleware::{
    DeliverySource, GatewayCore, GatewayState, InboundTopic, Transport, WorkerStats,
    run_delivery_worker,
};
use ville_supervisor::BrokerSupervisor;

use crate::config::Config;

/// How long to keep the event loop running after `DISCONNECT` is queued.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Gateway {
    config: Config,
    broker: Option<BrokerSupervisor>,
}

impl Gateway {
    /// `manage_broker` overrides `broker.manage` from the config.
    pub fn new(config: Config, manage_broker: bool) -> Self {
        let broker = manage_broker.then(|| BrokerSupervisor::new(config.broker_settings()));
        Self { config, broker }
    }

    pub fn manages_broker(&self) -> bool {
        self.broker.is_some()
    }

    /// Run until `shutdown` turns `true` or the connection closes.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<WorkerStats> {
        self.config.validate().context("invalid configuration")?;
        let mut core = GatewayCore::new(
            GatewayState::new(&self.config.gateway.maze, self.config.build_directory()?),
            self.config.build_transform()?,
            self.config.topics.clone(),
        );

        if let Some(broker) = self.broker.as_mut() {
            broker.start().await.context("starting MQTT broker")?;
        }

        let (transport, mut deliveries) = match self.connect_and_subscribe().await {
            Ok(pair) => pair,
            Err(e) => {
                self.stop_broker().await;
                return Err(e);
            }
        };

        info!(
            maze = %self.config.gateway.maze,
            agents = core.state().directory().len(),
            "gateway running"
        );
        let stats = run_delivery_worker(&mut core, &mut deliveries, &transport, shutdown).await;

        self.disconnect(&transport, &mut deliveries).await;
        self.stop_broker().await;
        info!(last_step = core.state().current_step(), "gateway stopped");
        Ok(stats)
    }

    async fn connect_and_subscribe(&self) -> Result<(MqttTransport, MqttDeliveries)> {
        let settings = self.config.mqtt_settings();
        let (transport, mut deliveries) = mqtt::connect(&settings)
            .await
            .with_context(|| format!("connecting to {}:{}", settings.host, settings.port))?;

        for route in InboundTopic::ALL {
            let topic = self.config.topics.inbound(route);
            if let Err(e) = transport.subscribe(topic).await {
                self.disconnect(&transport, &mut deliveries).await;
                return Err(e).with_context(|| format!("subscribing to `{topic}`"));
            }
        }
        Ok((transport, deliveries))
    }

    async fn disconnect(&self, transport: &MqttTransport, deliveries: &mut MqttDeliveries) {
        for route in InboundTopic::ALL {
            let topic = self.config.topics.inbound(route);
            if let Err(e) = transport.unsubscribe(topic).await {
                warn!(topic, error = %e, "unsubscribe failed");
            }
        }
        if let Err(e) = transport.disconnect().await {
            warn!(error = %e, "disconnect failed");
            return;
        }
        // Queued requests only reach the broker while the event loop is polled.
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while deliveries.next_delivery().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("MQTT connection did not close within {DRAIN_TIMEOUT:?}");
        }
    }

    async fn stop_broker(&mut self) {
        if let Some(broker) = self.broker.as_mut()
            && let Err(e) = broker.stop().await
        {
            warn!(error = %e, "stopping MQTT broker");
        }
    }
}
