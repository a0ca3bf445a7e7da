//! Topic routing table.
//!
//! The exact topic strings are deployment configuration, but the pairing of
//! inbound and outbound topics is fixed by [`InboundTopic`]:
//!
//! | Inbound | Outbound |
//! |---|---|
//! | [`InboundTopic::BackendMovement`] | [`OutboundTopic::FieldCommand`] |
//! | [`InboundTopic::FieldEnvironment`] | [`OutboundTopic::BackendEnvironment`] |

use serde::{Deserialize, Serialize};
use ville_types::{SchemaKind, VilleError};

/// Topics the gateway subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundTopic {
    /// Persona movements computed by the simulation backend.
    BackendMovement,
    /// Sensed agent state reported by the field.
    FieldEnvironment,
}

/// Topics the gateway publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundTopic {
    /// Movement commands for robots / the frontend.
    FieldCommand,
    /// Environment replies for the simulation backend.
    BackendEnvironment,
}

impl InboundTopic {
    pub const ALL: [InboundTopic; 2] = [InboundTopic::BackendMovement, InboundTopic::FieldEnvironment];

    /// The outbound topic a converted message is published to.
    pub fn paired(self) -> OutboundTopic {
        match self {
            InboundTopic::BackendMovement => OutboundTopic::FieldCommand,
            InboundTopic::FieldEnvironment => OutboundTopic::BackendEnvironment,
        }
    }

    pub fn schema(self) -> SchemaKind {
        match self {
            InboundTopic::BackendMovement => SchemaKind::BackendMovement,
            InboundTopic::FieldEnvironment => SchemaKind::FieldEnvironment,
        }
    }
}

impl OutboundTopic {
    pub fn schema(self) -> SchemaKind {
        match self {
            OutboundTopic::FieldCommand => SchemaKind::FieldCommand,
            OutboundTopic::BackendEnvironment => SchemaKind::BackendEnvironment,
        }
    }
}

/// Concrete topic strings for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicMap {
    pub backend_movement: String,
    pub field_command: String,
    pub field_environment: String,
    pub backend_environment: String,
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            backend_movement: "backend/movement".to_string(),
            field_command: "gateway/movement".to_string(),
            field_environment: "robots/environment".to_string(),
            backend_environment: "gateway/environment".to_string(),
        }
    }
}

impl TopicMap {
    pub fn inbound(&self, topic: InboundTopic) -> &str {
        match topic {
            InboundTopic::BackendMovement => &self.backend_movement,
            InboundTopic::FieldEnvironment => &self.field_environment,
        }
    }

    pub fn outbound(&self, topic: OutboundTopic) -> &str {
        match topic {
            OutboundTopic::FieldCommand => &self.field_command,
            OutboundTopic::BackendEnvironment => &self.backend_environment,
        }
    }

    /// Map a delivered topic string back to its route.
    pub fn resolve(&self, topic: &str) -> Option<InboundTopic> {
        InboundTopic::ALL
            .into_iter()
            .find(|&route| self.inbound(route) == topic)
    }

    /// Reject empty, wildcard or duplicated topic names.
    ///
    /// An outbound topic equal to an inbound one would feed the gateway its
    /// own output.
    pub fn validate(&self) -> Result<(), VilleError> {
        let all = [
            &self.backend_movement,
            &self.field_command,
            &self.field_environment,
            &self.backend_environment,
        ];
        for (i, topic) in all.iter().enumerate() {
            if topic.is_empty() {
                return Err(VilleError::Config("topic names must not be empty".to_string()));
            }
            if topic.contains(['+', '#']) {
                return Err(VilleError::Config(format!(
                    "topic `{topic}` contains an MQTT wildcard"
                )));
            }
            if all[..i].contains(topic) {
                return Err(VilleError::Config(format!("topic `{topic}` is used twice")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_is_fixed() {
        assert_eq!(InboundTopic::BackendMovement.paired(), OutboundTopic::FieldCommand);
        assert_eq!(InboundTopic::FieldEnvironment.paired(), OutboundTopic::BackendEnvironment);
        assert_eq!(InboundTopic::BackendMovement.paired().schema(), SchemaKind::FieldCommand);
    }

    #[test]
    fn resolve_known_and_unknown_topics() {
        let map = TopicMap::default();
        assert_eq!(map.resolve("backend/movement"), Some(InboundTopic::BackendMovement));
        assert_eq!(map.resolve("robots/environment"), Some(InboundTopic::FieldEnvironment));
        // Outbound topics are never routed back in.
        assert_eq!(map.resolve("gateway/movement"), None);
        assert_eq!(map.resolve("something/else"), None);
    }

    #[test]
    fn default_map_is_valid() {
        assert!(TopicMap::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_loops_and_wildcards() {
        let looped = TopicMap {
            field_command: "backend/movement".to_string(),
            ..TopicMap::default()
        };
        assert!(looped.validate().is_err());

        let wildcard = TopicMap {
            field_environment: "robots/+".to_string(),
            ..TopicMap::default()
        };
        assert!(wildcard.validate().is_err());

        let empty = TopicMap {
            backend_environment: String::new(),
            ..TopicMap::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let map: TopicMap = toml::from_str(r#"field_environment = "frontend/environment""#).unwrap();
        assert_eq!(map.field_environment, "frontend/environment");
        assert_eq!(map.backend_movement, "backend/movement");
    }
}
