use std::collections::BTreeSet;

use serde_json::Value;

use super::{Change, ChangeType};
use crate::error::{CollabError, Result};

/// Set of change types a process accepts from the wire.
///
/// Built once at startup and passed to whoever decodes payloads.
#[derive(Debug, Clone)]
pub struct ChangeRegistry {
    registered: BTreeSet<ChangeType>,
}

impl Default for ChangeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ChangeRegistry {
    /// Registry with no change types.
    pub fn empty() -> Self {
        Self {
            registered: BTreeSet::new(),
        }
    }

    /// Registry with every change type the engine implements.
    pub fn builtin() -> Self {
        Self {
            registered: ChangeType::ALL.into_iter().collect(),
        }
    }

    pub fn register(&mut self, change_type: ChangeType) -> &mut Self {
        self.registered.insert(change_type);
        self
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        type_name
            .parse::<ChangeType>()
            .map(|change_type| self.registered.contains(&change_type))
            .unwrap_or(false)
    }

    pub fn registered(&self) -> impl Iterator<Item = ChangeType> + '_ {
        self.registered.iter().copied()
    }

    /// Decodes a change from its JSON form.
    ///
    /// Fails with `UnknownChangeType` when `typeName` is missing or not
    /// registered, and with `Serialization` when the payload is malformed.
    pub fn from_json(&self, payload: &Value) -> Result<Change> {
        let type_name = payload
            .get("typeName")
            .and_then(Value::as_str)
            .ok_or_else(|| CollabError::UnknownChangeType("<missing typeName>".to_string()))?;
        if !self.is_registered(type_name) {
            return Err(CollabError::UnknownChangeType(type_name.to_string()));
        }
        Ok(serde_json::from_value(payload.clone())?)
    }

    /// Decodes a change from a JSON string.
    pub fn parse(&self, payload: &str) -> Result<Change> {
        let value: Value = serde_json::from_str(payload)?;
        self.from_json(&value)
    }
}
