use serde::{Deserialize, Serialize};

use super::batch::Batch;
use super::{extend_changed_ids, reversed, Change, ChangeOperation, RouteTarget};
use crate::error::{CollabError, Result};
use crate::model::{AnnotationStore, FeatureSnapshot, StoreEvent};

/// Feature type used when an add arrives without a snapshot.
const DEFAULT_FEATURE_TYPE: &str = "region";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFeatureDetails {
    pub feature_id: String,
    pub target_assembly_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_feature: Option<FeatureSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_feature_id: Option<String>,
}

impl AddFeatureDetails {
    pub fn new(feature_id: impl Into<String>, target_assembly_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            target_assembly_id: target_assembly_id.into(),
            added_feature: None,
            parent_feature_id: None,
        }
    }

    pub fn with_feature(mut self, feature: FeatureSnapshot) -> Self {
        self.added_feature = Some(feature);
        self
    }

    pub fn with_parent(mut self, parent_feature_id: impl Into<String>) -> Self {
        self.parent_feature_id = Some(parent_feature_id.into());
        self
    }
}

/// Adds one or more feature subtrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFeatureChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    #[serde(flatten)]
    pub changes: Batch<AddFeatureDetails>,
}

impl AddFeatureChange {
    pub fn new(assembly_id: impl Into<String>, details: Vec<AddFeatureDetails>) -> Self {
        let changed_ids = details.iter().map(|d| d.feature_id.clone()).collect();
        Self {
            changed_ids,
            assembly_id: assembly_id.into(),
            changes: Batch::new(details),
        }
    }
}

/// Snapshot used when the submitter names only an id: a `region` spanning
/// the first refSeq of the target assembly.
fn default_feature(store: &AnnotationStore, details: &AddFeatureDetails) -> Result<FeatureSnapshot> {
    let assembly = store.require_assembly(&details.target_assembly_id)?;
    let ref_seq = assembly.first_ref_seq().ok_or_else(|| {
        CollabError::ReferentialIntegrity(format!(
            "Assembly '{}' has no refSeqs",
            assembly.id
        ))
    })?;
    Ok(FeatureSnapshot::new(
        &details.feature_id,
        DEFAULT_FEATURE_TYPE,
        &ref_seq.id,
        0,
        ref_seq.length,
    ))
}

impl ChangeOperation for AddFeatureChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        if self.changes.is_empty() {
            return Err(CollabError::InvalidChange("AddFeatureChange has no items".into()));
        }
        let mut events = Vec::new();
        for details in self.changes.iter_mut() {
            if details.target_assembly_id != self.assembly_id {
                return Err(CollabError::InvalidChange(format!(
                    "Feature '{}' targets assembly '{}' inside a change for '{}'",
                    details.feature_id, details.target_assembly_id, self.assembly_id
                )));
            }
            let snapshot = match &details.added_feature {
                Some(snapshot) => snapshot.clone(),
                None => default_feature(store, details)?,
            };
            if snapshot.id != details.feature_id {
                return Err(CollabError::InvalidChange(format!(
                    "featureId '{}' does not match added feature '{}'",
                    details.feature_id, snapshot.id
                )));
            }
            let ids = store.add_feature(
                &details.target_assembly_id,
                &snapshot,
                details.parent_feature_id.as_deref(),
            )?;
            events.extend(ids.iter().map(|id| StoreEvent::FeatureAdded {
                feature_id: id.clone(),
            }));
            extend_changed_ids(&mut self.changed_ids, ids);
            details.added_feature = Some(snapshot);
        }
        Ok(events)
    }

    fn inverse(&self) -> Result<Change> {
        let items = self
            .changes
            .iter()
            .rev()
            .map(|details| DeleteFeatureDetails {
                feature_id: details.feature_id.clone(),
                deleted_feature: details.added_feature.clone(),
                parent_feature_id: details.parent_feature_id.clone(),
            })
            .collect();
        Ok(Change::DeleteFeature(DeleteFeatureChange {
            changed_ids: reversed(&self.changed_ids),
            assembly_id: self.assembly_id.clone(),
            changes: Batch::new(items),
        }))
    }

    fn route_target(&self, store: &AnnotationStore) -> Result<RouteTarget> {
        let first = self
            .changes
            .first()
            .ok_or_else(|| CollabError::InvalidChange("AddFeatureChange has no items".into()))?;
        let (assembly_id, ref_seq_name) = store.resolve_ref_seq(&first.feature_id)?;
        Ok(RouteTarget::RefSeq {
            assembly_id,
            ref_seq_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFeatureDetails {
    pub feature_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_feature: Option<FeatureSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_feature_id: Option<String>,
}

impl DeleteFeatureDetails {
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            deleted_feature: None,
            parent_feature_id: None,
        }
    }
}

/// Removes one or more features together with their descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFeatureChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    #[serde(flatten)]
    pub changes: Batch<DeleteFeatureDetails>,
}

impl DeleteFeatureChange {
    pub fn new(assembly_id: impl Into<String>, details: Vec<DeleteFeatureDetails>) -> Self {
        let changed_ids = details.iter().map(|d| d.feature_id.clone()).collect();
        Self {
            changed_ids,
            assembly_id: assembly_id.into(),
            changes: Batch::new(details),
        }
    }
}

impl ChangeOperation for DeleteFeatureChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        if self.changes.is_empty() {
            return Err(CollabError::InvalidChange("DeleteFeatureChange has no items".into()));
        }
        let mut events = Vec::new();
        for details in self.changes.iter_mut() {
            let (snapshot, parent) = store.remove_feature(&details.feature_id)?;
            let ids = snapshot.all_ids();
            events.extend(ids.iter().map(|id| StoreEvent::FeatureRemoved {
                feature_id: id.clone(),
            }));
            extend_changed_ids(&mut self.changed_ids, ids);
            details.deleted_feature = Some(snapshot);
            details.parent_feature_id = parent;
        }
        Ok(events)
    }

    fn inverse(&self) -> Result<Change> {
        let items = self
            .changes
            .iter()
            .rev()
            .map(|details| {
                let snapshot = details.deleted_feature.clone().ok_or_else(|| {
                    CollabError::InvalidChange(format!(
                        "Cannot invert delete of '{}' without a snapshot",
                        details.feature_id
                    ))
                })?;
                Ok(AddFeatureDetails {
                    feature_id: details.feature_id.clone(),
                    target_assembly_id: self.assembly_id.clone(),
                    added_feature: Some(snapshot),
                    parent_feature_id: details.parent_feature_id.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Change::AddFeature(AddFeatureChange {
            changed_ids: reversed(&self.changed_ids),
            assembly_id: self.assembly_id.clone(),
            changes: Batch::new(items),
        }))
    }

    fn route_target(&self, store: &AnnotationStore) -> Result<RouteTarget> {
        // The feature is gone from the store; its snapshot still names the refSeq.
        let snapshot = self
            .changes
            .first()
            .and_then(|details| details.deleted_feature.as_ref())
            .ok_or_else(|| {
                CollabError::InvalidChange("DeleteFeatureChange has not been applied".into())
            })?;
        Ok(RouteTarget::RefSeq {
            assembly_id: self.assembly_id.clone(),
            ref_seq_name: store.ref_seq_name(&snapshot.ref_seq)?,
        })
    }
}

/// Copies a feature subtree onto the same-named refSeq of another assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFeatureChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    pub feature_id: String,
    pub target_assembly_id: String,
    pub new_feature_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_feature: Option<FeatureSnapshot>,
}

impl CopyFeatureChange {
    pub fn new(
        assembly_id: impl Into<String>,
        feature_id: impl Into<String>,
        target_assembly_id: impl Into<String>,
        new_feature_id: impl Into<String>,
    ) -> Self {
        let new_feature_id = new_feature_id.into();
        Self {
            changed_ids: vec![new_feature_id.clone()],
            assembly_id: assembly_id.into(),
            feature_id: feature_id.into(),
            target_assembly_id: target_assembly_id.into(),
            new_feature_id,
            copied_feature: None,
        }
    }

    /// Equivalent add of the copied subtree into the target assembly.
    ///
    /// Only available once the copy has been applied and carries its snapshot.
    pub fn as_add_feature(&self) -> Option<AddFeatureChange> {
        let copied = self.copied_feature.clone()?;
        Some(AddFeatureChange {
            changed_ids: self.changed_ids.clone(),
            assembly_id: self.target_assembly_id.clone(),
            changes: Batch::single(
                AddFeatureDetails::new(&self.new_feature_id, &self.target_assembly_id)
                    .with_feature(copied),
            ),
        })
    }
}

impl ChangeOperation for CopyFeatureChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        let source = store.features().snapshot(&self.feature_id)?;
        let source_ref_seq = store.ref_seq_name(&source.ref_seq)?;
        let target_ref_seq = store
            .require_assembly(&self.target_assembly_id)?
            .ref_seq_by_name(&source_ref_seq)
            .map(|ref_seq| ref_seq.id.clone())
            .ok_or_else(|| {
                CollabError::missing(format!(
                    "RefSeq '{}' in assembly '{}'",
                    source_ref_seq, self.target_assembly_id
                ))
            })?;
        let copy = source.relabeled(&self.new_feature_id, &target_ref_seq);
        let ids = store.add_feature(&self.target_assembly_id, &copy, None)?;
        let events = ids
            .iter()
            .map(|id| StoreEvent::FeatureAdded {
                feature_id: id.clone(),
            })
            .collect();
        extend_changed_ids(&mut self.changed_ids, ids);
        self.copied_feature = Some(copy);
        Ok(events)
    }

    fn inverse(&self) -> Result<Change> {
        let copied = self.copied_feature.clone().ok_or_else(|| {
            CollabError::InvalidChange(format!(
                "Cannot invert copy to '{}' without a snapshot",
                self.new_feature_id
            ))
        })?;
        Ok(Change::DeleteFeature(DeleteFeatureChange {
            changed_ids: reversed(&self.changed_ids),
            assembly_id: self.target_assembly_id.clone(),
            changes: Batch::single(DeleteFeatureDetails {
                feature_id: self.new_feature_id.clone(),
                deleted_feature: Some(copied),
                parent_feature_id: None,
            }),
        }))
    }

    fn route_target(&self, store: &AnnotationStore) -> Result<RouteTarget> {
        let (_, ref_seq_name) = store.resolve_ref_seq(&self.new_feature_id)?;
        Ok(RouteTarget::RefSeq {
            assembly_id: self.target_assembly_id.clone(),
            ref_seq_name,
        })
    }
}

/// Bulk-loads top-level features parsed from an uploaded file into an
/// existing assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFeaturesFromFileChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    pub file_id: String,
    pub features: Vec<FeatureSnapshot>,
}

impl AddFeaturesFromFileChange {
    pub fn new(
        assembly_id: impl Into<String>,
        file_id: impl Into<String>,
        features: Vec<FeatureSnapshot>,
    ) -> Self {
        let file_id = file_id.into();
        let mut changed_ids: Vec<String> = features.iter().map(|f| f.id.clone()).collect();
        if changed_ids.is_empty() {
            changed_ids.push(file_id.clone());
        }
        Self {
            changed_ids,
            assembly_id: assembly_id.into(),
            file_id,
            features,
        }
    }
}

impl ChangeOperation for AddFeaturesFromFileChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        let mut events = Vec::new();
        for feature in &self.features {
            let ids = store.add_feature(&self.assembly_id, feature, None)?;
            events.extend(ids.iter().map(|id| StoreEvent::FeatureAdded {
                feature_id: id.clone(),
            }));
            extend_changed_ids(&mut self.changed_ids, ids);
        }
        Ok(events)
    }

    fn inverse(&self) -> Result<Change> {
        let items = self
            .features
            .iter()
            .rev()
            .map(|feature| DeleteFeatureDetails {
                feature_id: feature.id.clone(),
                deleted_feature: Some(feature.clone()),
                parent_feature_id: None,
            })
            .collect::<Vec<_>>();
        if items.is_empty() {
            return Err(CollabError::InvalidChange(format!(
                "File '{}' added no features to invert",
                self.file_id
            )));
        }
        let changed_ids = reversed(
            &self
                .features
                .iter()
                .flat_map(FeatureSnapshot::all_ids)
                .collect::<Vec<_>>(),
        );
        Ok(Change::DeleteFeature(DeleteFeatureChange {
            changed_ids,
            assembly_id: self.assembly_id.clone(),
            changes: Batch::new(items),
        }))
    }

    fn route_target(&self, _store: &AnnotationStore) -> Result<RouteTarget> {
        Ok(RouteTarget::Common)
    }
}
