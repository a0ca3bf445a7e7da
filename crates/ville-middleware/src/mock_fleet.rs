//! Simulated field agents for running the gateway without robots.
//!
//! [`MockFleet`] consumes [`FieldCommandMessage`]s, teleports every known
//! agent to its commanded position and answers each batch with a single
//! [`FieldEnvironmentMessage`] describing the whole fleet.  Commands for
//! unknown ids are logged and ignored.

use std::collections::BTreeMap;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use ville_types::schema;
use ville_types::{AgentEnvironment, FieldCommandMessage, FieldEnvironmentMessage, GridPosition, VilleError};

use crate::transport::{DeliverySource, Transport};

/// One simulated field agent.  Movement is instantaneous, so an agent is
/// always idle when observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockAgent {
    pub id: String,
    pub position: GridPosition,
}

impl MockAgent {
    fn perceived(&self) -> String {
        format!(
            "Agent '{}' is at position {} (status: idle)",
            self.id, self.position
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockFleet {
    agents: BTreeMap<String, MockAgent>,
}

impl MockFleet {
    /// A fleet with every agent idle at the field origin.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agents = ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                let agent = MockAgent {
                    id: id.clone(),
                    position: GridPosition::default(),
                };
                (id, agent)
            })
            .collect();
        Self { agents }
    }

    pub fn agent(&self, id: &str) -> Option<&MockAgent> {
        self.agents.get(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Move known agents; return how many commands were applied.
    pub fn apply_commands(&mut self, msg: &FieldCommandMessage) -> usize {
        let mut applied = 0;
        for command in &msg.commands {
            let Some(agent) = self.agents.get_mut(&command.agent_id) else {
                warn!(agent_id = %command.agent_id, "command for unknown agent");
                continue;
            };
            agent.position = command.position;
            debug!(agent_id = %agent.id, position = %agent.position, "agent moved");
            applied += 1;
        }
        applied
    }

    /// Current state of every agent, in id order.
    pub fn environment(&self) -> FieldEnvironmentMessage {
        FieldEnvironmentMessage {
            agents: self
                .agents
                .values()
                .map(|agent| AgentEnvironment {
                    agent_id: agent.id.clone(),
                    position: agent.position,
                    perceived: agent.perceived(),
                })
                .collect(),
        }
    }

    /// Decode a raw command batch, apply it and build the reply.
    pub fn handle(&mut self, raw: &[u8]) -> Result<FieldEnvironmentMessage, VilleError> {
        let msg = schema::decode::<FieldCommandMessage>(raw)?;
        self.apply_commands(&msg);
        Ok(self.environment())
    }
}

/// Serve `fleet` on the given topics until the stream ends or `shutdown`
/// turns `true`.
///
/// Subscribes to `command_topic` itself; the caller owns the connection.
pub async fn run<D>(
    mut fleet: MockFleet,
    deliveries: &mut D,
    transport: &dyn Transport,
    command_topic: &str,
    environment_topic: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<MockFleet, VilleError>
where
    D: DeliverySource + ?Sized,
{
    transport.subscribe(command_topic).await?;
    info!(agents = fleet.len(), topic = command_topic, "mock fleet listening");

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
                let Some(delivery) = next else { break };
                if delivery.topic != command_topic {
                    continue;
                }
                match fleet.handle(&delivery.payload).and_then(|env| schema::encode(&env)) {
                    Ok(bytes) => match transport.publish(environment_topic, bytes) {
                        Ok(()) => info!(agents = fleet.len(), "published environment update"),
                        Err(e) => error!(topic = environment_topic, error = %e, "environment publish failed"),
                    },
                    Err(e) => {
                        warn!(payload = %delivery.truncated_payload(), error = %e, "bad command batch");
                    }
                }
            }
        }
    }

    transport.unsubscribe(command_topic).await?;
    Ok(fleet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ville_types::AgentCommand;

    use crate::transport::Delivery;

    /// Replays a fixed list of deliveries, then ends the stream.
    struct Replay(VecDeque<Delivery>);

    #[async_trait]
    impl DeliverySource for Replay {
        async fn next_delivery(&mut self) -> Option<Delivery> {
            self.0.pop_front()
        }
    }

    /// Accepts subscriptions but refuses every publish.
    #[derive(Default)]
    struct RefusingTransport {
        attempts: Mutex<usize>,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn subscribe(&self, _topic: &str) -> Result<(), VilleError> {
            Ok(())
        }

        async fn unsubscribe(&self, _topic: &str) -> Result<(), VilleError> {
            Ok(())
        }

        fn publish(&self, topic: &str, _payload: Vec<u8>) -> Result<(), VilleError> {
            *self.attempts.lock().unwrap() += 1;
            Err(VilleError::Transport(format!("publish `{topic}`: request queue full")))
        }

        async fn disconnect(&self) -> Result<(), VilleError> {
            Ok(())
        }
    }

    fn command(id: &str, x: i64, y: i64) -> AgentCommand {
        AgentCommand {
            agent_id: id.to_string(),
            position: GridPosition::new(x, y),
        }
    }

    #[test]
    fn new_fleet_is_idle_at_origin() {
        let fleet = MockFleet::new(["Robot 1", "Robot 2"]);
        let env = fleet.environment();
        assert_eq!(env.agents.len(), 2);
        assert!(env.agents.iter().all(|a| a.position == GridPosition::new(0, 0)));
    }

    #[test]
    fn commands_move_known_agents_only() {
        let mut fleet = MockFleet::new(["Robot 1"]);
        let applied = fleet.apply_commands(&FieldCommandMessage {
            commands: vec![command("Robot 1", 78, 27), command("Robot 9", 1, 1)],
        });
        assert_eq!(applied, 1);
        assert_eq!(fleet.agent("Robot 1").unwrap().position, GridPosition::new(78, 27));
        assert!(fleet.agent("Robot 9").is_none());
    }

    #[test]
    fn perceived_text_describes_position_and_status() {
        let mut fleet = MockFleet::new(["Robot 1"]);
        let env = fleet
            .handle(br#"{"commands": [{"agent_id": "Robot 1", "position": {"x": 3, "y": -2}}]}"#)
            .unwrap();
        assert_eq!(
            env.agents[0].perceived,
            "Agent 'Robot 1' is at position (3, -2) (status: idle)"
        );
    }

    #[test]
    fn invalid_batch_is_an_error() {
        let mut fleet = MockFleet::new(["Robot 1"]);
        assert!(matches!(
            fleet.handle(br#"{"commands": "nope"}"#),
            Err(VilleError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn failed_publish_does_not_stop_the_fleet() {
        let batch = |x: i64| {
            Delivery::new(
                "gateway/movement",
                format!(r#"{{"commands": [{{"agent_id": "Robot 1", "position": {{"x": {x}, "y": 4}}}}]}}"#)
                    .into_bytes(),
            )
        };
        let mut deliveries = Replay(VecDeque::from([batch(1), batch(2)]));
        let transport = RefusingTransport::default();
        let (_tx, rx) = watch::channel(false);

        let fleet = run(
            MockFleet::new(["Robot 1"]),
            &mut deliveries,
            &transport,
            "gateway/movement",
            "robots/environment",
            rx,
        )
        .await
        .expect("fleet keeps running");

        assert_eq!(*transport.attempts.lock().unwrap(), 2);
        assert_eq!(fleet.agent("Robot 1").unwrap().position, GridPosition::new(2, 4));
    }
}
