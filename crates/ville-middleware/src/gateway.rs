//! [`GatewayCore`] – the conversion logic between the simulation backend and
//! the field.
//!
//! Each inbound delivery is resolved to an [`InboundTopic`], decoded through
//! the schema registry, converted agent by agent, re-encoded and published on
//! the paired outbound topic.  One bad agent never drops a batch: it is
//! logged and skipped.
//!
//! Handlers take `&mut self`.  The only caller in production is
//! [`run_delivery_worker`], which owns the core for the lifetime of the
//! connection, so handlers are serialized without locks.

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use ville_geometry::CoordinateTransform;
use ville_types::schema::{self, WireMessage};
use ville_types::{
    AgentCommand, BackendEnvironmentMessage, BackendMovementMessage, FieldCommandMessage,
    FieldEnvironmentMessage, PersonaEnvironment, Point2D, VilleError, is_well_formed,
};

use crate::directory::AgentDirectory;
use crate::topics::{InboundTopic, OutboundTopic, TopicMap};
use crate::transport::{Delivery, DeliverySource, Transport};

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

/// Mutable gateway state.  Only the two handlers change it.
#[derive(Debug, Clone)]
pub struct GatewayState {
    current_step: u64,
    current_maze: String,
    directory: AgentDirectory,
}

impl GatewayState {
    pub fn new(maze: impl Into<String>, directory: AgentDirectory) -> Self {
        Self {
            current_step: 0,
            current_maze: maze.into(),
            directory,
        }
    }

    /// The step of the most recent backend movement message.
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn current_maze(&self) -> &str {
        &self.current_maze
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }
}

/// Outcome of one handled delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub route: InboundTopic,
    /// The topic the converted message went to.
    pub outbound_topic: String,
    /// Step carried by the outbound message.
    pub step: u64,
    /// Agents converted, keyed on the outbound side.
    pub converted: Vec<String>,
    /// Agents skipped, keyed on the inbound side.
    pub skipped: Vec<String>,
    pub published: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// GatewayCore
// ────────────────────────────────────────────────────────────────────────────

pub struct GatewayCore {
    state: GatewayState,
    transform: CoordinateTransform,
    topics: TopicMap,
}

impl GatewayCore {
    /// `transform` maps the simulation frame into the field frame.
    pub fn new(state: GatewayState, transform: CoordinateTransform, topics: TopicMap) -> Self {
        Self {
            state,
            transform,
            topics,
        }
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Route one delivery to its handler.
    ///
    /// # Errors
    ///
    /// * [`VilleError::UnknownTopic`] – the topic is not an inbound route.
    /// * [`VilleError::MalformedPayload`] – the payload is not JSON.
    /// * [`VilleError::Schema`] – the payload does not match the route's
    ///   schema.
    ///
    /// Nothing is published and the state is untouched in all three cases.
    pub fn dispatch(
        &mut self,
        delivery: &Delivery,
        transport: &dyn Transport,
    ) -> Result<DispatchReport, VilleError> {
        let route = self
            .topics
            .resolve(&delivery.topic)
            .ok_or_else(|| VilleError::UnknownTopic(delivery.topic.clone()))?;

        if !is_well_formed(&delivery.payload) {
            return Err(VilleError::MalformedPayload(format!(
                "payload on `{}` is not valid JSON",
                delivery.topic
            )));
        }

        match route {
            InboundTopic::BackendMovement => {
                let msg = schema::decode::<BackendMovementMessage>(&delivery.payload)?;
                Ok(self.backend_to_field(&msg, transport))
            }
            InboundTopic::FieldEnvironment => {
                let msg = schema::decode::<FieldEnvironmentMessage>(&delivery.payload)?;
                Ok(self.field_to_backend(&msg, transport))
            }
        }
    }

    /// Convert one step of persona movements into field commands.
    ///
    /// Records the message's step as the current step before anything else,
    /// so the next environment reply refers to it even if every persona is
    /// skipped.
    #[instrument(skip_all, fields(step = msg.step))]
    pub fn backend_to_field(
        &mut self,
        msg: &BackendMovementMessage,
        transport: &dyn Transport,
    ) -> DispatchReport {
        self.state.current_step = msg.step;

        let mut out = FieldCommandMessage::default();
        let mut skipped = Vec::new();

        for (name, movement) in &msg.movements.persona {
            let agent_id = match self.state.directory.field_id(name) {
                Ok(id) => id,
                Err(e) => {
                    warn!(agent = %name, error = %e, "skipping persona");
                    skipped.push(name.clone());
                    continue;
                }
            };
            let position = self.transform.convert(movement.position()).round_to_grid();
            info!(agent = %name, agent_id, %position, "movement converted");
            out.commands.push(AgentCommand {
                agent_id: agent_id.to_string(),
                position,
            });
        }

        let converted = out.commands.iter().map(|c| c.agent_id.clone()).collect();
        self.publish(InboundTopic::BackendMovement, msg.step, &out, converted, skipped, transport)
    }

    /// Convert a field environment report into a backend environment reply.
    ///
    /// The reply asks the backend for `current_step + 1`.
    #[instrument(skip_all, fields(step = self.state.current_step))]
    pub fn field_to_backend(
        &mut self,
        msg: &FieldEnvironmentMessage,
        transport: &dyn Transport,
    ) -> DispatchReport {
        let next_step = self.state.current_step.saturating_add(1);

        let mut out = BackendEnvironmentMessage {
            environment: Default::default(),
            step: next_step,
        };
        let mut skipped = Vec::new();

        for agent in &msg.agents {
            let name = match self.state.directory.backend_name(&agent.agent_id) {
                Ok(name) => name,
                Err(e) => {
                    warn!(agent_id = %agent.agent_id, error = %e, "skipping field agent");
                    skipped.push(agent.agent_id.clone());
                    continue;
                }
            };
            let tile = self.transform.invert(Point2D::from(agent.position)).round_to_grid();
            info!(agent = name, agent_id = %agent.agent_id, %tile, "environment converted");
            out.environment.insert(
                name.to_string(),
                PersonaEnvironment {
                    x: tile.x,
                    y: tile.y,
                    perceived: agent.perceived.clone(),
                    maze: self.state.current_maze.clone(),
                },
            );
        }

        let converted = out.environment.keys().cloned().collect();
        self.publish(InboundTopic::FieldEnvironment, next_step, &out, converted, skipped, transport)
    }

    fn publish<T: WireMessage>(
        &self,
        route: InboundTopic,
        step: u64,
        msg: &T,
        converted: Vec<String>,
        skipped: Vec<String>,
        transport: &dyn Transport,
    ) -> DispatchReport {
        let outbound: OutboundTopic = route.paired();
        let topic = self.topics.outbound(outbound).to_string();

        let published = match schema::encode(msg).and_then(|bytes| transport.publish(&topic, bytes)) {
            Ok(()) => {
                info!(
                    topic = %topic,
                    step,
                    converted = converted.len(),
                    skipped = skipped.len(),
                    "published {}",
                    outbound.schema()
                );
                true
            }
            Err(e) => {
                error!(topic = %topic, step, error = %e, "publish failed");
                false
            }
        };

        DispatchReport {
            route,
            outbound_topic: topic,
            step,
            converted,
            skipped,
            published,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Delivery worker
// ────────────────────────────────────────────────────────────────────────────

/// Counters returned when the delivery worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub handled: u64,
    pub rejected: u64,
}

/// Pull deliveries one at a time and hand them to `core` until the stream
/// ends or `shutdown` turns `true`.
///
/// Handler errors are logged and counted; they never stop the worker.
pub async fn run_delivery_worker<D>(
    core: &mut GatewayCore,
    deliveries: &mut D,
    transport: &dyn Transport,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerStats
where
    D: DeliverySource + ?Sized,
{
    let mut stats = WorkerStats::default();

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            next = deliveries.next_delivery() => {
                let Some(delivery) = next else {
                    info!("delivery stream closed");
                    break;
                };
                match core.dispatch(&delivery, transport) {
                    Ok(_) => stats.handled += 1,
                    Err(e) => {
                        stats.rejected += 1;
                        log_rejection(&delivery, &e);
                    }
                }
            }
        }
    }

    info!(handled = stats.handled, rejected = stats.rejected, "delivery worker stopped");
    stats
}

fn log_rejection(delivery: &Delivery, err: &VilleError) {
    match err {
        VilleError::UnknownTopic(_) => {
            warn!(topic = %delivery.topic, "ignoring message on unknown topic");
        }
        VilleError::MalformedPayload(_) | VilleError::Schema(_) => {
            warn!(
                topic = %delivery.topic,
                payload = %delivery.truncated_payload(),
                error = %err,
                "dropping invalid message"
            );
        }
        other => {
            error!(topic = %delivery.topic, error = %other, "handler failed");
        }
    }
}
