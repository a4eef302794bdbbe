//! Append-only change log records and the filter used to query them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::change::{Change, ChangeRegistry};
use crate::error::Result;

/// Immutable record of one committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(default)]
    pub assembly: Option<String>,
    pub type_name: String,
    pub changed_ids: Vec<String>,
    /// Serialized change as committed, after normalization
    pub changes: serde_json::Value,
    /// Entry this one undoes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverts: Option<Uuid>,
    pub user: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl ChangeLogEntry {
    /// Builds the record for a change that is about to be committed.
    pub fn new(
        change: &Change,
        user: impl Into<String>,
        sequence: u64,
        created_at: DateTime<Utc>,
        reverts: Option<Uuid>,
    ) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            assembly: change.assembly_id().map(str::to_string),
            type_name: change.type_name().to_string(),
            changed_ids: change.changed_ids().to_vec(),
            changes: change.to_json()?,
            reverts,
            user: user.into(),
            sequence,
            created_at,
        })
    }

    /// Decodes the stored change.
    pub fn change(&self, registry: &ChangeRegistry) -> Result<Change> {
        registry.from_json(&self.changes)
    }
}

/// Criteria for listing change log entries. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFilter {
    pub assembly: Option<String>,
    pub type_name: Option<String>,
    /// Case-insensitive substring of the submitting user
    pub user: Option<String>,
}

impl ChangeFilter {
    pub fn matches(&self, entry: &ChangeLogEntry) -> bool {
        if let Some(assembly) = &self.assembly {
            if entry.assembly.as_deref() != Some(assembly.as_str()) {
                return false;
            }
        }
        if let Some(type_name) = &self.type_name {
            if &entry.type_name != type_name {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if !entry.user.to_lowercase().contains(&user.to_lowercase()) {
                return false;
            }
        }
        true
    }
}
