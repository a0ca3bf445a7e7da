//! `ville-types` – shared vocabulary of the Ville gateway.
//!
//! # Modules
//!
//! - [`messages`] – wire representations of every payload exchanged on the
//!   four gateway topics.
//! - [`schema`] – the message schema registry: structural pre-checks,
//!   path-aware decoding and JSON Schema export.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod messages;
pub mod schema;

pub use messages::{
    AgentCommand, AgentEnvironment, BackendEnvironmentMessage, BackendMovementMessage,
    FieldCommandMessage, FieldEnvironmentMessage, GridPosition, Movements, PersonaEnvironment,
    PersonaMovement, StepMeta,
};
pub use schema::{SchemaKind, is_well_formed};

/// A point in either the simulation frame or the field frame.
///
/// The frame is implied by where the point is used; it is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Round both coordinates to the nearest integer (halves away from zero).
    pub fn round_to_grid(self) -> GridPosition {
        GridPosition {
            x: self.x.round() as i64,
            y: self.y.round() as i64,
        }
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl From<GridPosition> for Point2D {
    fn from(p: GridPosition) -> Self {
        Self {
            x: p.x as f64,
            y: p.y as f64,
        }
    }
}

/// Which side of the gateway an agent key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentSide {
    /// A persona name used by the simulation backend.
    Backend,
    /// An agent id used by the field (robots / frontend).
    Field,
}

impl std::fmt::Display for AgentSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentSide::Backend => write!(f, "backend"),
            AgentSide::Field => write!(f, "field"),
        }
    }
}

/// A payload that failed to decode against a specific schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{schema} invalid at `{path}`: {message}")]
pub struct SchemaValidationError {
    /// Schema the payload was decoded against.
    pub schema: SchemaKind,
    /// Dotted path to the offending field (`.` for the document root).
    pub path: String,
    pub message: String,
}

/// Error type spanning payload validation, agent mapping, transport,
/// transform configuration and broker supervision.
#[derive(Error, Debug)]
pub enum VilleError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Unknown {side} agent: {key}")]
    UnknownAgent { side: AgentSide, key: String },

    #[error("Message on unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    #[error("Need at least two point pairs, got {found}")]
    InsufficientPoints { found: usize },

    #[error("Point count mismatch: {source_count} source vs {target_count} target")]
    PointCountMismatch {
        source_count: usize,
        target_count: usize,
    },

    #[error("Degenerate point pairs: {0}")]
    DegeneratePoints(String),

    #[error("Broker executable `{executable}` unavailable: {details}")]
    BrokerMissing { executable: String, details: String },

    #[error("Broker failed to start: {0}")]
    BrokerStartFailed(String),

    #[error("Broker stop error: {0}")]
    BrokerStop(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_grid_rounds_to_nearest() {
        let p = Point2D::new(77.5, -14.5).round_to_grid();
        assert_eq!(p, GridPosition { x: 78, y: -15 });

        let q = Point2D::new(10.49, 3.51).round_to_grid();
        assert_eq!(q, GridPosition { x: 10, y: 4 });
    }

    #[test]
    fn point_deserializes_from_object() {
        let p: Point2D = serde_json::from_str(r#"{"x": 1.5, "y": -2}"#).unwrap();
        assert_eq!(p, Point2D::new(1.5, -2.0));
    }

    #[test]
    fn ville_error_display() {
        let err = VilleError::UnknownAgent {
            side: AgentSide::Field,
            key: "Robot 9".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown field agent: Robot 9");

        let err2 = VilleError::PointCountMismatch {
            source_count: 3,
            target_count: 2,
        };
        assert!(err2.to_string().contains("3 source vs 2 target"));
    }

    #[test]
    fn schema_error_converts_into_ville_error() {
        let schema_err = SchemaValidationError {
            schema: SchemaKind::BackendMovement,
            path: "step".to_string(),
            message: "invalid type".to_string(),
        };
        let err: VilleError = schema_err.into();
        assert!(matches!(err, VilleError::Schema(_)));
        assert!(err.to_string().contains("`step`"));
    }
}
