//! [`AgentDirectory`] – bijective mapping between backend persona names and
//! field agent ids.
//!
//! The table is deployment configuration: it is loaded once at startup and
//! never learned or changed at runtime.

use std::collections::HashMap;

use ville_types::{AgentSide, VilleError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentDirectory {
    backend_to_field: HashMap<String, String>,
    field_to_backend: HashMap<String, String>,
}

impl AgentDirectory {
    /// Build the directory from `(persona name, field id)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`VilleError::Config`] when a name or id is empty or appears
    /// twice; either would break the inverse lookup.
    pub fn new<I, N, F>(pairs: I) -> Result<Self, VilleError>
    where
        I: IntoIterator<Item = (N, F)>,
        N: Into<String>,
        F: Into<String>,
    {
        let mut directory = Self::default();
        for (name, id) in pairs {
            let (name, id) = (name.into(), id.into());
            if name.is_empty() || id.is_empty() {
                return Err(VilleError::Config(
                    "agent names and ids must not be empty".to_string(),
                ));
            }
            if directory.backend_to_field.contains_key(&name) {
                return Err(VilleError::Config(format!("agent `{name}` is mapped twice")));
            }
            if let Some(other) = directory.field_to_backend.get(&id) {
                return Err(VilleError::Config(format!(
                    "field id `{id}` is assigned to both `{other}` and `{name}`"
                )));
            }
            directory.backend_to_field.insert(name.clone(), id.clone());
            directory.field_to_backend.insert(id, name);
        }
        Ok(directory)
    }

    /// Field id for a backend persona name.
    pub fn field_id(&self, backend_name: &str) -> Result<&str, VilleError> {
        self.backend_to_field
            .get(backend_name)
            .map(String::as_str)
            .ok_or_else(|| VilleError::UnknownAgent {
                side: AgentSide::Backend,
                key: backend_name.to_string(),
            })
    }

    /// Backend persona name for a field agent id.
    pub fn backend_name(&self, field_id: &str) -> Result<&str, VilleError> {
        self.field_to_backend
            .get(field_id)
            .map(String::as_str)
            .ok_or_else(|| VilleError::UnknownAgent {
                side: AgentSide::Field,
                key: field_id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.backend_to_field.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend_to_field.is_empty()
    }

    /// Field ids in sorted order.
    pub fn field_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.field_to_backend.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
