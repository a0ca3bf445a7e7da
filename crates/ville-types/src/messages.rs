//! Wire representations of the four gateway payloads.
//!
//! | Topic side | Type | Frame |
//! |---|---|---|
//! | backend → gateway | [`BackendMovementMessage`] | simulation |
//! | gateway → field | [`FieldCommandMessage`] | field |
//! | field → gateway | [`FieldEnvironmentMessage`] | field |
//! | gateway → backend | [`BackendEnvironmentMessage`] | simulation |
//!
//! Persona maps are [`BTreeMap`]s so that conversions iterate agents in a
//! stable order.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Point2D;

// ────────────────────────────────────────────────────────────────────────────
// Backend → gateway
// ────────────────────────────────────────────────────────────────────────────

/// One simulation step of persona movements published by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BackendMovementMessage {
    pub step: u64,
    pub movements: Movements,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Movements {
    /// Persona name → movement for this step.
    pub persona: BTreeMap<String, PersonaMovement>,
    pub meta: StepMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersonaMovement {
    /// Target tile as an `[x, y]` pair in the simulation frame.
    pub movement: (f64, f64),
    pub pronunciatio: String,
    pub description: String,
    /// Ordered `(speaker, utterance)` pairs when the persona is chatting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Vec<(String, String)>>,
}

impl PersonaMovement {
    pub fn position(&self) -> Point2D {
        Point2D::from(self.movement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StepMeta {
    pub curr_time: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Shared
// ────────────────────────────────────────────────────────────────────────────

/// Integer pixel / grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub struct GridPosition {
    pub x: i64,
    pub y: i64,
}

impl GridPosition {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for GridPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway → field
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FieldCommandMessage {
    pub commands: Vec<AgentCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AgentCommand {
    pub agent_id: String,
    pub position: GridPosition,
}

// ────────────────────────────────────────────────────────────────────────────
// Field → gateway
// ────────────────────────────────────────────────────────────────────────────

/// Sensed state of every field agent, reported after a command batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FieldEnvironmentMessage {
    pub agents: Vec<AgentEnvironment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AgentEnvironment {
    pub agent_id: String,
    pub position: GridPosition,
    pub perceived: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway → backend
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct BackendEnvironmentMessage {
    /// Persona name → environment in the simulation frame.
    pub environment: BTreeMap<String, PersonaEnvironment>,
    /// The step the backend should compute next.
    pub step: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PersonaEnvironment {
    pub x: i64,
    pub y: i64,
    pub perceived: String,
    pub maze: String,
}
