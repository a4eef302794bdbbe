use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::assembly::{Assembly, AssemblySnapshot, RefSeq};
use super::feature::{FeatureSnapshot, FeatureTree};
use super::user::User;
use crate::error::{CollabError, Result};

/// Fine-grained notification emitted when a change mutates a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StoreEvent {
    AssemblyAdded { assembly_id: String },
    AssemblyRemoved { assembly_id: String },
    FeatureAdded { feature_id: String },
    FeatureRemoved { feature_id: String },
    FeatureUpdated { feature_id: String },
    UserUpdated { user_id: String },
    UserRemoved { user_id: String },
}

/// Assemblies, their feature trees and known users.
///
/// The same type backs the authoritative store on the server and the
/// local mirror on each client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationStore {
    assemblies: BTreeMap<String, Assembly>,
    features: FeatureTree,
    users: BTreeMap<String, User>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn features(&self) -> &FeatureTree {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut FeatureTree {
        &mut self.features
    }

    pub fn assemblies(&self) -> impl Iterator<Item = &Assembly> {
        self.assemblies.values()
    }

    pub fn assembly(&self, id: &str) -> Option<&Assembly> {
        self.assemblies.get(id)
    }

    pub fn has_assembly(&self, id: &str) -> bool {
        self.assemblies.contains_key(id)
    }

    pub fn require_assembly(&self, id: &str) -> Result<&Assembly> {
        self.assemblies
            .get(id)
            .ok_or_else(|| CollabError::missing(format!("Assembly '{}'", id)))
    }

    /// Finds the assembly owning a refSeq id.
    pub fn ref_seq_owner(&self, ref_seq_id: &str) -> Option<(&Assembly, &RefSeq)> {
        self.assemblies.values().find_map(|assembly| {
            assembly
                .ref_seqs
                .get(ref_seq_id)
                .map(|ref_seq| (assembly, ref_seq))
        })
    }

    fn ref_seq_mut(&mut self, ref_seq_id: &str) -> Option<&mut RefSeq> {
        self.assemblies
            .values_mut()
            .find_map(|assembly| assembly.ref_seqs.get_mut(ref_seq_id))
    }

    /// Creates an assembly and loads the features it carries.
    ///
    /// # Returns
    /// Ids of every feature loaded
    pub fn add_assembly(&mut self, snapshot: &AssemblySnapshot) -> Result<Vec<String>> {
        if self.assemblies.contains_key(&snapshot.id) {
            return Err(CollabError::ReferentialIntegrity(format!(
                "Assembly '{}' already exists",
                snapshot.id
            )));
        }
        for spec in &snapshot.ref_seqs {
            if self.ref_seq_owner(&spec.id).is_some() {
                return Err(CollabError::ReferentialIntegrity(format!(
                    "RefSeq '{}' already exists",
                    spec.id
                )));
            }
        }
        self.assemblies.insert(
            snapshot.id.clone(),
            Assembly::new(&snapshot.id, &snapshot.name, &snapshot.ref_seqs),
        );
        let mut ids = Vec::new();
        for feature in &snapshot.features {
            ids.extend(self.add_feature(&snapshot.id, feature, None)?);
        }
        Ok(ids)
    }

    /// Copies an assembly and its annotations out of the store.
    pub fn export_assembly(&self, id: &str) -> Result<AssemblySnapshot> {
        let assembly = self.require_assembly(id)?;
        let mut features = Vec::new();
        for ref_seq in assembly.ref_seqs.values() {
            for feature_id in &ref_seq.features {
                features.push(self.features.snapshot(feature_id)?);
            }
        }
        Ok(AssemblySnapshot {
            id: assembly.id.clone(),
            name: assembly.name.clone(),
            ref_seqs: assembly.ref_seq_specs(),
            features,
        })
    }

    /// Removes an assembly with all of its annotations.
    pub fn remove_assembly(&mut self, id: &str) -> Result<AssemblySnapshot> {
        let snapshot = self.export_assembly(id)?;
        for feature in &snapshot.features {
            self.features.remove(&feature.id)?;
        }
        self.assemblies.remove(id);
        Ok(snapshot)
    }

    /// Adds a feature subtree to an assembly.
    ///
    /// Without a parent the subtree becomes a top-level feature of the refSeq
    /// named by `snapshot.ref_seq`, which must belong to `assembly_id`.
    pub fn add_feature(
        &mut self,
        assembly_id: &str,
        snapshot: &FeatureSnapshot,
        parent: Option<&str>,
    ) -> Result<Vec<String>> {
        let assembly = self.require_assembly(assembly_id)?;
        match parent {
            Some(parent_id) => {
                let parent_node = self.features.require(parent_id)?;
                if !assembly.ref_seqs.contains_key(&parent_node.ref_seq) {
                    return Err(CollabError::ReferentialIntegrity(format!(
                        "Parent feature '{}' is not part of assembly '{}'",
                        parent_id, assembly_id
                    )));
                }
                if parent_node.ref_seq != snapshot.ref_seq {
                    return Err(CollabError::InvalidChange(format!(
                        "Feature '{}' is on refSeq '{}' but its parent is on '{}'",
                        snapshot.id, snapshot.ref_seq, parent_node.ref_seq
                    )));
                }
                self.features.insert(snapshot, Some(parent_id))
            }
            None => {
                if !assembly.ref_seqs.contains_key(&snapshot.ref_seq) {
                    return Err(CollabError::missing(format!(
                        "RefSeq '{}' in assembly '{}'",
                        snapshot.ref_seq, assembly_id
                    )));
                }
                let ids = self.features.insert(snapshot, None)?;
                if let Some(ref_seq) = self.ref_seq_mut(&snapshot.ref_seq) {
                    ref_seq.features.insert(snapshot.id.clone());
                }
                Ok(ids)
            }
        }
    }

    /// Removes a feature subtree.
    ///
    /// # Returns
    /// Snapshot of the removed subtree and the former parent id
    pub fn remove_feature(&mut self, id: &str) -> Result<(FeatureSnapshot, Option<String>)> {
        let (snapshot, parent) = self.features.remove(id)?;
        if parent.is_none() {
            if let Some(ref_seq) = self.ref_seq_mut(&snapshot.ref_seq) {
                ref_seq.features.remove(id);
            }
        }
        Ok((snapshot, parent))
    }

    /// Assembly that owns a feature, if the feature is present.
    pub fn assembly_of_feature(&self, feature_id: &str) -> Option<&Assembly> {
        let node = self.features.get(feature_id)?;
        self.ref_seq_owner(&node.ref_seq)
            .map(|(assembly, _)| assembly)
    }

    /// Resolves the refSeq a feature lives on by finding the top-level
    /// feature whose subtree contains it.
    ///
    /// # Returns
    /// `(assembly_id, ref_seq_name)`
    pub fn resolve_ref_seq(&self, feature_id: &str) -> Result<(String, String)> {
        let root = self.features.root_of(feature_id).ok_or_else(|| {
            CollabError::missing(format!("Top-level feature containing '{}'", feature_id))
        })?;
        match self.ref_seq_owner(&root.ref_seq) {
            Some((assembly, ref_seq)) if ref_seq.features.contains(&root.id) => {
                Ok((assembly.id.clone(), ref_seq.name.clone()))
            }
            _ => Err(CollabError::missing(format!(
                "RefSeq '{}' holding feature '{}'",
                root.ref_seq, root.id
            ))),
        }
    }

    /// Name of a refSeq by id.
    pub fn ref_seq_name(&self, ref_seq_id: &str) -> Result<String> {
        self.ref_seq_owner(ref_seq_id)
            .map(|(_, ref_seq)| ref_seq.name.clone())
            .ok_or_else(|| CollabError::missing(format!("RefSeq '{}'", ref_seq_id)))
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Inserts or replaces a user, returning the previous record.
    pub fn upsert_user(&mut self, user: User) -> Option<User> {
        self.users.insert(user.id.clone(), user)
    }

    pub fn remove_user(&mut self, id: &str) -> Result<User> {
        self.users
            .remove(id)
            .ok_or_else(|| CollabError::missing(format!("User '{}'", id)))
    }
}
