use serde::{Deserialize, Serialize};

use super::batch::Batch;
use super::{Change, ChangeOperation, RouteTarget};
use crate::error::{CollabError, Result};
use crate::model::{AnnotationStore, FeatureNode, StoreEvent};

fn route_first(
    assembly_id: &str,
    feature_id: Option<&str>,
    store: &AnnotationStore,
) -> Result<RouteTarget> {
    let feature_id =
        feature_id.ok_or_else(|| CollabError::InvalidChange("change has no items".into()))?;
    let (_, ref_seq_name) = store.resolve_ref_seq(feature_id)?;
    Ok(RouteTarget::RefSeq {
        assembly_id: assembly_id.to_string(),
        ref_seq_name,
    })
}

/// Sets a field on each listed feature and records the value it replaced.
fn apply_edits<T, F>(
    store: &mut AnnotationStore,
    items: &mut Batch<T>,
    feature_id: fn(&T) -> &str,
    mut edit: F,
) -> Result<Vec<StoreEvent>>
where
    F: FnMut(&mut FeatureNode, &mut T),
{
    if items.is_empty() {
        return Err(CollabError::InvalidChange("change has no items".into()));
    }
    let mut events = Vec::with_capacity(items.len());
    for item in items.iter_mut() {
        let id = feature_id(item).to_string();
        let node = store.features_mut().require_mut(&id)?;
        edit(node, item);
        events.push(StoreEvent::FeatureUpdated { feature_id: id });
    }
    Ok(events)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStartDetails {
    pub feature_id: String,
    pub old_start: u64,
    pub new_start: u64,
}

/// Moves the start coordinate of one or more features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStartChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    #[serde(flatten)]
    pub changes: Batch<LocationStartDetails>,
}

impl LocationStartChange {
    pub fn new(assembly_id: impl Into<String>, details: Vec<LocationStartDetails>) -> Self {
        Self {
            changed_ids: details.iter().map(|d| d.feature_id.clone()).collect(),
            assembly_id: assembly_id.into(),
            changes: Batch::new(details),
        }
    }
}

impl ChangeOperation for LocationStartChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        apply_edits(
            store,
            &mut self.changes,
            |d| d.feature_id.as_str(),
            |node, d| {
                if node.start != d.old_start {
                    tracing::debug!(
                        feature = %node.id,
                        expected = d.old_start,
                        actual = node.start,
                        "start moved since the change was built"
                    );
                }
                d.old_start = node.start;
                node.start = d.new_start;
            },
        )
    }

    fn inverse(&self) -> Result<Change> {
        let items = self
            .changes
            .iter()
            .rev()
            .map(|d| LocationStartDetails {
                feature_id: d.feature_id.clone(),
                old_start: d.new_start,
                new_start: d.old_start,
            })
            .collect();
        Ok(Change::LocationStart(LocationStartChange {
            changed_ids: super::reversed(&self.changed_ids),
            assembly_id: self.assembly_id.clone(),
            changes: Batch::new(items),
        }))
    }

    fn route_target(&self, store: &AnnotationStore) -> Result<RouteTarget> {
        route_first(
            &self.assembly_id,
            self.changes.first().map(|d| d.feature_id.as_str()),
            store,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEndDetails {
    pub feature_id: String,
    pub old_end: u64,
    pub new_end: u64,
}

/// Moves the end coordinate of one or more features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEndChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    #[serde(flatten)]
    pub changes: Batch<LocationEndDetails>,
}

impl LocationEndChange {
    pub fn new(assembly_id: impl Into<String>, details: Vec<LocationEndDetails>) -> Self {
        Self {
            changed_ids: details.iter().map(|d| d.feature_id.clone()).collect(),
            assembly_id: assembly_id.into(),
            changes: Batch::new(details),
        }
    }
}

impl ChangeOperation for LocationEndChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        apply_edits(
            store,
            &mut self.changes,
            |d| d.feature_id.as_str(),
            |node, d| {
                d.old_end = node.end;
                node.end = d.new_end;
            },
        )
    }

    fn inverse(&self) -> Result<Change> {
        let items = self
            .changes
            .iter()
            .rev()
            .map(|d| LocationEndDetails {
                feature_id: d.feature_id.clone(),
                old_end: d.new_end,
                new_end: d.old_end,
            })
            .collect();
        Ok(Change::LocationEnd(LocationEndChange {
            changed_ids: super::reversed(&self.changed_ids),
            assembly_id: self.assembly_id.clone(),
            changes: Batch::new(items),
        }))
    }

    fn route_target(&self, store: &AnnotationStore) -> Result<RouteTarget> {
        route_first(
            &self.assembly_id,
            self.changes.first().map(|d| d.feature_id.as_str()),
            store,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDetails {
    pub feature_id: String,
    pub old_type: String,
    pub new_type: String,
}

/// Changes the feature type (e.g. `gene` to `pseudogene`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    #[serde(flatten)]
    pub changes: Batch<TypeDetails>,
}

impl TypeChange {
    pub fn new(assembly_id: impl Into<String>, details: Vec<TypeDetails>) -> Self {
        Self {
            changed_ids: details.iter().map(|d| d.feature_id.clone()).collect(),
            assembly_id: assembly_id.into(),
            changes: Batch::new(details),
        }
    }
}

impl ChangeOperation for TypeChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        apply_edits(
            store,
            &mut self.changes,
            |d| d.feature_id.as_str(),
            |node, d| {
                d.old_type = std::mem::replace(&mut node.feature_type, d.new_type.clone());
            },
        )
    }

    fn inverse(&self) -> Result<Change> {
        let items = self
            .changes
            .iter()
            .rev()
            .map(|d| TypeDetails {
                feature_id: d.feature_id.clone(),
                old_type: d.new_type.clone(),
                new_type: d.old_type.clone(),
            })
            .collect();
        Ok(Change::Type(TypeChange {
            changed_ids: super::reversed(&self.changed_ids),
            assembly_id: self.assembly_id.clone(),
            changes: Batch::new(items),
        }))
    }

    fn route_target(&self, store: &AnnotationStore) -> Result<RouteTarget> {
        route_first(
            &self.assembly_id,
            self.changes.first().map(|d| d.feature_id.as_str()),
            store,
        )
    }
}
