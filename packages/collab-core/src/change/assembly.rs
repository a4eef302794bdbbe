use serde::{Deserialize, Serialize};

use super::{extend_changed_ids, reversed, Change, ChangeOperation, RouteTarget};
use crate::error::{CollabError, Result};
use crate::model::{AnnotationStore, AssemblySnapshot, FeatureSnapshot, RefSeqSpec, StoreEvent};

/// Creates an assembly with its refSeqs, optionally with features already
/// parsed from an uploaded annotation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAssemblyChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    pub assembly_name: String,
    #[serde(default)]
    pub ref_seqs: Vec<RefSeqSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<FeatureSnapshot>,
}

impl AddAssemblyChange {
    pub fn new(
        assembly_id: impl Into<String>,
        assembly_name: impl Into<String>,
        ref_seqs: Vec<RefSeqSpec>,
    ) -> Self {
        let assembly_id = assembly_id.into();
        Self {
            changed_ids: vec![assembly_id.clone()],
            assembly_id,
            assembly_name: assembly_name.into(),
            ref_seqs,
            features: Vec::new(),
        }
    }

    pub fn with_features(mut self, features: Vec<FeatureSnapshot>) -> Self {
        self.features = features;
        self
    }

    fn snapshot(&self) -> AssemblySnapshot {
        AssemblySnapshot {
            id: self.assembly_id.clone(),
            name: self.assembly_name.clone(),
            ref_seqs: self.ref_seqs.clone(),
            features: self.features.clone(),
        }
    }
}

impl From<AssemblySnapshot> for AddAssemblyChange {
    fn from(snapshot: AssemblySnapshot) -> Self {
        let mut changed_ids = vec![snapshot.id.clone()];
        extend_changed_ids(
            &mut changed_ids,
            snapshot.features.iter().flat_map(FeatureSnapshot::all_ids),
        );
        Self {
            changed_ids,
            assembly_id: snapshot.id,
            assembly_name: snapshot.name,
            ref_seqs: snapshot.ref_seqs,
            features: snapshot.features,
        }
    }
}

impl ChangeOperation for AddAssemblyChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        let ids = store.add_assembly(&self.snapshot())?;
        let mut events = vec![StoreEvent::AssemblyAdded {
            assembly_id: self.assembly_id.clone(),
        }];
        events.extend(ids.iter().map(|id| StoreEvent::FeatureAdded {
            feature_id: id.clone(),
        }));
        extend_changed_ids(&mut self.changed_ids, ids);
        Ok(events)
    }

    fn inverse(&self) -> Result<Change> {
        Ok(Change::DeleteAssembly(DeleteAssemblyChange {
            changed_ids: reversed(&self.changed_ids),
            assembly_id: self.assembly_id.clone(),
            deleted_assembly: Some(self.snapshot()),
        }))
    }

    fn route_target(&self, _store: &AnnotationStore) -> Result<RouteTarget> {
        Ok(RouteTarget::Common)
    }
}

/// Removes an assembly with every refSeq and feature it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAssemblyChange {
    pub changed_ids: Vec<String>,
    pub assembly_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_assembly: Option<AssemblySnapshot>,
}

impl DeleteAssemblyChange {
    pub fn new(assembly_id: impl Into<String>) -> Self {
        let assembly_id = assembly_id.into();
        Self {
            changed_ids: vec![assembly_id.clone()],
            assembly_id,
            deleted_assembly: None,
        }
    }
}

impl ChangeOperation for DeleteAssemblyChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn assembly_id(&self) -> Option<&str> {
        Some(&self.assembly_id)
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        let snapshot = store.remove_assembly(&self.assembly_id)?;
        let feature_ids: Vec<String> = snapshot
            .features
            .iter()
            .flat_map(FeatureSnapshot::all_ids)
            .collect();
        let mut events: Vec<StoreEvent> = feature_ids
            .iter()
            .map(|id| StoreEvent::FeatureRemoved {
                feature_id: id.clone(),
            })
            .collect();
        events.push(StoreEvent::AssemblyRemoved {
            assembly_id: self.assembly_id.clone(),
        });
        extend_changed_ids(&mut self.changed_ids, feature_ids);
        self.deleted_assembly = Some(snapshot);
        Ok(events)
    }

    fn inverse(&self) -> Result<Change> {
        let snapshot = self.deleted_assembly.clone().ok_or_else(|| {
            CollabError::InvalidChange(format!(
                "Cannot invert delete of assembly '{}' without a snapshot",
                self.assembly_id
            ))
        })?;
        let mut add = AddAssemblyChange::from(snapshot);
        add.changed_ids = reversed(&self.changed_ids);
        Ok(Change::AddAssembly(add))
    }

    fn route_target(&self, _store: &AnnotationStore) -> Result<RouteTarget> {
        Ok(RouteTarget::Common)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn add_assembly() -> AddAssemblyChange {
        AddAssemblyChange::new(
            "A1",
            "hg38",
            vec![RefSeqSpec::new("r1", "chr1", 2_000), RefSeqSpec::new("r2", "chr2", 900)],
        )
        .with_features(vec![FeatureSnapshot::new("g1", "gene", "r2", 5, 50)])
    }

    #[test]
    fn test_add_assembly_loads_features() {
        let mut store = AnnotationStore::new();
        let mut change = add_assembly();
        let events = change.apply(&mut store).unwrap();
        assert_eq!(change.changed_ids, vec!["A1", "g1"]);
        assert_eq!(events.len(), 2);
        assert_eq!(store.resolve_ref_seq("g1").unwrap().1, "chr2");
        assert_eq!(change.route_target(&store).unwrap(), RouteTarget::Common);
    }

    #[test]
    fn test_delete_assembly_round_trips_through_inverse() {
        let mut store = AnnotationStore::new();
        add_assembly().apply(&mut store).unwrap();
        let before = store.clone();

        let mut delete = DeleteAssemblyChange::new("A1");
        delete.apply(&mut store).unwrap();
        assert!(!store.has_assembly("A1"));
        assert_eq!(delete.changed_ids, vec!["A1", "g1"]);

        let mut restore = delete.inverse().unwrap();
        restore.apply_to_client(&mut store).unwrap();
        assert_eq!(store, before);
    }

    #[test]
    fn test_duplicate_assembly_is_rejected() {
        let mut store = AnnotationStore::new();
        add_assembly().apply(&mut store).unwrap();
        assert!(matches!(
            add_assembly().apply(&mut store),
            Err(CollabError::ReferentialIntegrity(_))
        ));
    }
}
