//! Typed, serializable edit operations.
//!
//! [`Change`] is a closed sum type tagged by `typeName` on the wire. Every
//! variant knows how to apply itself to an [`AnnotationStore`], how to build
//! its inverse, and which broadcast scope it belongs to.

mod assembly;
mod batch;
mod feature;
mod location;
mod registry;
mod user;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CollabError, Result};
use crate::model::{AnnotationStore, StoreEvent};

pub use assembly::{AddAssemblyChange, DeleteAssemblyChange};
pub use batch::Batch;
pub use feature::{
    AddFeatureChange, AddFeatureDetails, AddFeaturesFromFileChange, CopyFeatureChange,
    DeleteFeatureChange, DeleteFeatureDetails,
};
pub use location::{
    LocationEndChange, LocationEndDetails, LocationStartChange, LocationStartDetails, TypeChange,
    TypeDetails,
};
pub use registry::ChangeRegistry;
pub use user::{DeleteUserChange, UserChange};

/// Discriminant of every change the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeType {
    AddAssembly,
    DeleteAssembly,
    AddFeature,
    AddFeaturesFromFile,
    CopyFeature,
    DeleteFeature,
    LocationStart,
    LocationEnd,
    Type,
    User,
    DeleteUser,
}

impl ChangeType {
    pub const ALL: [ChangeType; 11] = [
        ChangeType::AddAssembly,
        ChangeType::DeleteAssembly,
        ChangeType::AddFeature,
        ChangeType::AddFeaturesFromFile,
        ChangeType::CopyFeature,
        ChangeType::DeleteFeature,
        ChangeType::LocationStart,
        ChangeType::LocationEnd,
        ChangeType::Type,
        ChangeType::User,
        ChangeType::DeleteUser,
    ];

    /// Wire name used as the `typeName` tag.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::AddAssembly => "AddAssemblyChange",
            ChangeType::DeleteAssembly => "DeleteAssemblyChange",
            ChangeType::AddFeature => "AddFeatureChange",
            ChangeType::AddFeaturesFromFile => "AddFeaturesFromFileChange",
            ChangeType::CopyFeature => "CopyFeatureChange",
            ChangeType::DeleteFeature => "DeleteFeatureChange",
            ChangeType::LocationStart => "LocationStartChange",
            ChangeType::LocationEnd => "LocationEndChange",
            ChangeType::Type => "TypeChange",
            ChangeType::User => "UserChange",
            ChangeType::DeleteUser => "DeleteUserChange",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = CollabError;

    fn from_str(s: &str) -> Result<Self> {
        ChangeType::ALL
            .iter()
            .copied()
            .find(|change_type| change_type.as_str() == s)
            .ok_or_else(|| CollabError::UnknownChangeType(s.to_string()))
    }
}

/// Where a committed change is broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Assembly-scope change, seen by every client
    Common,
    /// Per-feature change on a resolved refSeq
    RefSeq {
        assembly_id: String,
        ref_seq_name: String,
    },
    /// Not broadcast (user management)
    Unrouted,
}

/// Behavior shared by every change variant.
pub trait ChangeOperation {
    fn changed_ids(&self) -> &[String];

    /// Assembly the change is scoped to, if any.
    fn assembly_id(&self) -> Option<&str> {
        None
    }

    /// Mutates the store and fills in any data the submitter omitted
    /// (cascaded ids, snapshots, previous values).
    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>>;

    /// Builds the logically opposite change.
    fn inverse(&self) -> Result<Change>;

    /// Resolves the broadcast scope against the post-apply store.
    fn route_target(&self, store: &AnnotationStore) -> Result<RouteTarget>;
}

/// An edit operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typeName")]
pub enum Change {
    #[serde(rename = "AddAssemblyChange")]
    AddAssembly(AddAssemblyChange),
    #[serde(rename = "DeleteAssemblyChange")]
    DeleteAssembly(DeleteAssemblyChange),
    #[serde(rename = "AddFeatureChange")]
    AddFeature(AddFeatureChange),
    #[serde(rename = "AddFeaturesFromFileChange")]
    AddFeaturesFromFile(AddFeaturesFromFileChange),
    #[serde(rename = "CopyFeatureChange")]
    CopyFeature(CopyFeatureChange),
    #[serde(rename = "DeleteFeatureChange")]
    DeleteFeature(DeleteFeatureChange),
    #[serde(rename = "LocationStartChange")]
    LocationStart(LocationStartChange),
    #[serde(rename = "LocationEndChange")]
    LocationEnd(LocationEndChange),
    #[serde(rename = "TypeChange")]
    Type(TypeChange),
    #[serde(rename = "UserChange")]
    User(UserChange),
    #[serde(rename = "DeleteUserChange")]
    DeleteUser(DeleteUserChange),
}

macro_rules! dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Change::AddAssembly($inner) => $body,
            Change::DeleteAssembly($inner) => $body,
            Change::AddFeature($inner) => $body,
            Change::AddFeaturesFromFile($inner) => $body,
            Change::CopyFeature($inner) => $body,
            Change::DeleteFeature($inner) => $body,
            Change::LocationStart($inner) => $body,
            Change::LocationEnd($inner) => $body,
            Change::Type($inner) => $body,
            Change::User($inner) => $body,
            Change::DeleteUser($inner) => $body,
        }
    };
}

impl Change {
    pub fn type_name(&self) -> ChangeType {
        match self {
            Change::AddAssembly(_) => ChangeType::AddAssembly,
            Change::DeleteAssembly(_) => ChangeType::DeleteAssembly,
            Change::AddFeature(_) => ChangeType::AddFeature,
            Change::AddFeaturesFromFile(_) => ChangeType::AddFeaturesFromFile,
            Change::CopyFeature(_) => ChangeType::CopyFeature,
            Change::DeleteFeature(_) => ChangeType::DeleteFeature,
            Change::LocationStart(_) => ChangeType::LocationStart,
            Change::LocationEnd(_) => ChangeType::LocationEnd,
            Change::Type(_) => ChangeType::Type,
            Change::User(_) => ChangeType::User,
            Change::DeleteUser(_) => ChangeType::DeleteUser,
        }
    }

    pub fn changed_ids(&self) -> &[String] {
        dispatch!(self, c => c.changed_ids())
    }

    pub fn assembly_id(&self) -> Option<&str> {
        dispatch!(self, c => c.assembly_id())
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Applies the change on the authoritative side and resolves where the
    /// result must be broadcast.
    ///
    /// A failed refSeq resolution is reported as an error so the caller
    /// aborts the surrounding transaction.
    pub fn apply_to_server(&mut self, store: &mut AnnotationStore) -> Result<RouteTarget> {
        self.apply(store)?;
        dispatch!(self, c => c.route_target(store))
    }

    /// Applies the change to a client mirror.
    pub fn apply_to_client(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        self.apply(store)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        if self.changed_ids().is_empty() {
            return Err(CollabError::InvalidChange(format!(
                "{} has no changedIds",
                self.type_name()
            )));
        }
        dispatch!(self, c => c.apply(store))
    }

    pub fn inverse(&self) -> Result<Change> {
        dispatch!(self, c => c.inverse())
    }

    pub fn route_target(&self, store: &AnnotationStore) -> Result<RouteTarget> {
        dispatch!(self, c => c.route_target(store))
    }

    /// Form of the change sent to receivers.
    ///
    /// Copies are rewritten as an equivalent add of the copied subtree so
    /// receivers never need the source feature.
    pub fn broadcast_form(&self) -> Change {
        match self {
            Change::CopyFeature(copy) => match copy.as_add_feature() {
                Some(add) => Change::AddFeature(add),
                None => self.clone(),
            },
            other => other.clone(),
        }
    }
}

/// Appends ids not already present, keeping the existing order.
pub(crate) fn extend_changed_ids(changed_ids: &mut Vec<String>, ids: impl IntoIterator<Item = String>) {
    for id in ids {
        if !changed_ids.contains(&id) {
            changed_ids.push(id);
        }
    }
}

pub(crate) fn reversed(ids: &[String]) -> Vec<String> {
    ids.iter().rev().cloned().collect()
}
