//! Message schema registry.
//!
//! Decoding is two-staged: [`is_well_formed`] is a cheap syntactic filter
//! (is this JSON at all?), and [`decode`] validates a payload against one
//! concrete schema, reporting the dotted path of the first offending field.

use std::str::FromStr;

use schemars::schema::RootSchema;
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::messages::{
    BackendEnvironmentMessage, BackendMovementMessage, FieldCommandMessage,
    FieldEnvironmentMessage,
};
use crate::{SchemaValidationError, VilleError};

/// The closed set of payload schemas carried by the gateway topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    BackendMovement,
    FieldCommand,
    FieldEnvironment,
    BackendEnvironment,
}

impl SchemaKind {
    pub const ALL: [SchemaKind; 4] = [
        SchemaKind::BackendMovement,
        SchemaKind::FieldCommand,
        SchemaKind::FieldEnvironment,
        SchemaKind::BackendEnvironment,
    ];

    /// Kebab-case name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            SchemaKind::BackendMovement => "backend-movement",
            SchemaKind::FieldCommand => "field-command",
            SchemaKind::FieldEnvironment => "field-environment",
            SchemaKind::BackendEnvironment => "backend-environment",
        }
    }

    /// JSON Schema document describing this payload.
    pub fn json_schema(self) -> RootSchema {
        match self {
            SchemaKind::BackendMovement => schemars::schema_for!(BackendMovementMessage),
            SchemaKind::FieldCommand => schemars::schema_for!(FieldCommandMessage),
            SchemaKind::FieldEnvironment => schemars::schema_for!(FieldEnvironmentMessage),
            SchemaKind::BackendEnvironment => schemars::schema_for!(BackendEnvironmentMessage),
        }
    }
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchemaKind {
    type Err = VilleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SchemaKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| VilleError::Config(format!("unknown schema `{s}`")))
    }
}

/// A payload type registered with the schema registry.
pub trait WireMessage: Serialize + DeserializeOwned {
    const KIND: SchemaKind;
}

impl WireMessage for BackendMovementMessage {
    const KIND: SchemaKind = SchemaKind::BackendMovement;
}

impl WireMessage for FieldCommandMessage {
    const KIND: SchemaKind = SchemaKind::FieldCommand;
}

impl WireMessage for FieldEnvironmentMessage {
    const KIND: SchemaKind = SchemaKind::FieldEnvironment;
}

impl WireMessage for BackendEnvironmentMessage {
    const KIND: SchemaKind = SchemaKind::BackendEnvironment;
}

/// Return `true` when `raw` is syntactically valid JSON.
///
/// No schema is checked; this only filters out garbage before [`decode`].
pub fn is_well_formed(raw: impl AsRef<[u8]>) -> bool {
    serde_json::from_slice::<IgnoredAny>(raw.as_ref()).is_ok()
}

/// Decode `raw` as `T`, reporting the path of the first invalid field.
pub fn decode<T: WireMessage>(raw: &[u8]) -> Result<T, SchemaValidationError> {
    let mut de = serde_json::Deserializer::from_slice(raw);
    let value: T = serde_path_to_error::deserialize(&mut de).map_err(|e| SchemaValidationError {
        schema: T::KIND,
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })?;
    de.end().map_err(|e| SchemaValidationError {
        schema: T::KIND,
        path: ".".to_string(),
        message: e.to_string(),
    })?;
    Ok(value)
}

/// Encode `msg` as compact JSON.
pub fn encode<T: WireMessage>(msg: &T) -> Result<Vec<u8>, VilleError> {
    serde_json::to_vec(msg).map_err(|e| VilleError::Serialization(format!("{}: {e}", T::KIND)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AgentCommand, GridPosition};

    #[test]
    fn well_formed_accepts_any_json() {
        assert!(is_well_formed(r#"{"anything": [1, 2, 3]}"#));
        assert!(is_well_formed("42"));
        assert!(is_well_formed(b"[]"));
    }

    #[test]
    fn well_formed_rejects_garbage() {
        assert!(!is_well_formed("not json at all"));
        assert!(!is_well_formed(r#"{"step": 1"#));
        assert!(!is_well_formed(""));
    }

    #[test]
    fn decode_reports_nested_path_on_wrong_type() {
        let raw = br#"{"agents":[{"agent_id":"Robot 1","position":{"x":"ten","y":4},"perceived":""}]}"#;
        let err = decode::<FieldEnvironmentMessage>(raw).unwrap_err();
        assert_eq!(err.schema, SchemaKind::FieldEnvironment);
        assert_eq!(err.path, "agents[0].position.x");
    }

    #[test]
    fn decode_reports_missing_field() {
        let raw = br#"{"agents":[{"agent_id":"Robot 1","perceived":"idle"}]}"#;
        let err = decode::<FieldEnvironmentMessage>(raw).unwrap_err();
        assert_eq!(err.path, "agents[0]");
        assert!(err.message.contains("position"), "message: {}", err.message);
    }

    #[test]
    fn decode_rejects_missing_step() {
        let raw = br#"{"movements":{"persona":{},"meta":{"curr_time":"t"}}}"#;
        let err = decode::<BackendMovementMessage>(raw).unwrap_err();
        assert_eq!(err.schema, SchemaKind::BackendMovement);
        assert!(err.message.contains("step"));
    }

    #[test]
    fn decode_rejects_trailing_data() {
        let raw = br#"{"commands":[]} {"commands":[]}"#;
        assert!(decode::<FieldCommandMessage>(raw).is_err());
    }

    #[test]
    fn encode_then_decode_field_command() {
        let msg = FieldCommandMessage {
            commands: vec![AgentCommand {
                agent_id: "Robot 2".to_string(),
                position: GridPosition::new(-3, 9),
            }],
        };
        let bytes = encode(&msg).unwrap();
        let back: FieldCommandMessage = decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn schema_kind_parses_its_own_name() {
        for kind in SchemaKind::ALL {
            assert_eq!(kind.name().parse::<SchemaKind>().unwrap(), kind);
        }
        assert!("robots".parse::<SchemaKind>().is_err());
    }

    #[test]
    fn json_schema_lists_required_fields() {
        let schema = serde_json::to_value(SchemaKind::BackendEnvironment.json_schema()).unwrap();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "environment"));
        assert!(required.iter().any(|v| v == "step"));
    }
}
