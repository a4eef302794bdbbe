use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CollabError, Result};

/// Strand a feature is annotated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
}

/// Self-contained, serializable copy of a feature and all of its descendants.
///
/// Snapshots travel inside change payloads so that a change can be inverted
/// or replayed on a replica without consulting the store it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSnapshot {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub feature_type: String,
    pub ref_seq: String,
    pub start: u64,
    pub end: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strand: Option<Strand>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, FeatureSnapshot>,
}

impl FeatureSnapshot {
    pub fn new(
        id: impl Into<String>,
        feature_type: impl Into<String>,
        ref_seq: impl Into<String>,
        start: u64,
        end: u64,
    ) -> Self {
        Self {
            id: id.into(),
            feature_type: feature_type.into(),
            ref_seq: ref_seq.into(),
            start,
            end,
            strand: None,
            attributes: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn with_strand(mut self, strand: Strand) -> Self {
        self.strand = Some(strand);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_child(mut self, child: FeatureSnapshot) -> Self {
        self.children.insert(child.id.clone(), child);
        self
    }

    /// Ids of this feature and every descendant, parents before children.
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    /// First `(key, _id)` pair in the subtree where a child is filed under
    /// a key other than its own id.
    pub fn mismatched_child_key(&self) -> Option<(&str, &str)> {
        self.children.iter().find_map(|(key, child)| {
            if key != &child.id {
                Some((key.as_str(), child.id.as_str()))
            } else {
                child.mismatched_child_key()
            }
        })
    }

    fn collect_ids(&self, ids: &mut Vec<String>) {
        ids.push(self.id.clone());
        for child in self.children.values() {
            child.collect_ids(ids);
        }
    }

    /// Returns a copy with every id rewritten and the refSeq replaced.
    ///
    /// The root takes `new_root_id`, descendants become `{new_root_id}-{old_id}`.
    pub fn relabeled(&self, new_root_id: &str, ref_seq: &str) -> FeatureSnapshot {
        let mut copy = self.relabel_descendants(new_root_id, ref_seq);
        copy.id = new_root_id.to_string();
        copy
    }

    fn relabel_descendants(&self, prefix: &str, ref_seq: &str) -> FeatureSnapshot {
        let children = self
            .children
            .values()
            .map(|child| {
                let mut relabeled = child.relabel_descendants(prefix, ref_seq);
                relabeled.id = format!("{}-{}", prefix, child.id);
                (relabeled.id.clone(), relabeled)
            })
            .collect();
        FeatureSnapshot {
            id: self.id.clone(),
            feature_type: self.feature_type.clone(),
            ref_seq: ref_seq.to_string(),
            start: self.start,
            end: self.end,
            strand: self.strand,
            attributes: self.attributes.clone(),
            children,
        }
    }
}

/// A feature as stored in the arena. Links are by id in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureNode {
    pub id: String,
    pub feature_type: String,
    pub ref_seq: String,
    pub start: u64,
    pub end: u64,
    pub strand: Option<Strand>,
    pub attributes: BTreeMap<String, Vec<String>>,
    pub parent: Option<String>,
    pub children: BTreeSet<String>,
}

/// Arena of features keyed by id.
///
/// Parent and child links are plain ids, so the ancestry walk and the
/// descendant walk are both map lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTree {
    nodes: BTreeMap<String, FeatureNode>,
}

impl FeatureTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&FeatureNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut FeatureNode> {
        self.nodes.get_mut(id)
    }

    /// Looks up a feature, failing with a referential integrity error.
    pub fn require(&self, id: &str) -> Result<&FeatureNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| CollabError::missing(format!("Feature '{}'", id)))
    }

    pub fn require_mut(&mut self, id: &str) -> Result<&mut FeatureNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CollabError::missing(format!("Feature '{}'", id)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureNode> {
        self.nodes.values()
    }

    /// Inserts a snapshot subtree, optionally beneath an existing parent.
    ///
    /// Nothing is inserted if any id in the subtree is already present.
    ///
    /// # Returns
    /// Ids inserted, parents before children
    pub fn insert(&mut self, snapshot: &FeatureSnapshot, parent: Option<&str>) -> Result<Vec<String>> {
        if let Some((key, id)) = snapshot.mismatched_child_key() {
            return Err(CollabError::InvalidChange(format!(
                "Child feature '{}' is keyed as '{}'",
                id, key
            )));
        }
        let ids = snapshot.all_ids();
        let mut seen = BTreeSet::new();
        for id in &ids {
            if self.nodes.contains_key(id) || !seen.insert(id.as_str()) {
                return Err(CollabError::ReferentialIntegrity(format!(
                    "Feature '{}' already exists",
                    id
                )));
            }
        }
        if let Some(parent_id) = parent {
            self.require(parent_id)?;
        }

        self.insert_node(snapshot, parent.map(str::to_string));
        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(parent_id) {
                parent_node.children.insert(snapshot.id.clone());
            }
        }
        Ok(ids)
    }

    fn insert_node(&mut self, snapshot: &FeatureSnapshot, parent: Option<String>) {
        for child in snapshot.children.values() {
            self.insert_node(child, Some(snapshot.id.clone()));
        }
        self.nodes.insert(
            snapshot.id.clone(),
            FeatureNode {
                id: snapshot.id.clone(),
                feature_type: snapshot.feature_type.clone(),
                ref_seq: snapshot.ref_seq.clone(),
                start: snapshot.start,
                end: snapshot.end,
                strand: snapshot.strand,
                attributes: snapshot.attributes.clone(),
                parent,
                children: snapshot.children.values().map(|child| child.id.clone()).collect(),
            },
        );
    }

    /// Rebuilds the nested snapshot for a feature.
    pub fn snapshot(&self, id: &str) -> Result<FeatureSnapshot> {
        let node = self.require(id)?;
        let mut children = BTreeMap::new();
        for child_id in &node.children {
            children.insert(child_id.clone(), self.snapshot(child_id)?);
        }
        Ok(FeatureSnapshot {
            id: node.id.clone(),
            feature_type: node.feature_type.clone(),
            ref_seq: node.ref_seq.clone(),
            start: node.start,
            end: node.end,
            strand: node.strand,
            attributes: node.attributes.clone(),
            children,
        })
    }

    /// Removes a feature together with all descendants and detaches it
    /// from its parent.
    ///
    /// # Returns
    /// The snapshot of the removed subtree and the former parent id
    pub fn remove(&mut self, id: &str) -> Result<(FeatureSnapshot, Option<String>)> {
        let snapshot = self.snapshot(id)?;
        let parent = self.nodes.get(id).and_then(|node| node.parent.clone());
        for removed in snapshot.all_ids() {
            self.nodes.remove(&removed);
        }
        if let Some(parent_id) = &parent {
            if let Some(parent_node) = self.nodes.get_mut(parent_id) {
                parent_node.children.remove(id);
            }
        }
        Ok((snapshot, parent))
    }

    /// Ids of a feature and all descendants, parents before children.
    pub fn descendant_ids(&self, id: &str) -> Vec<String> {
        let mut ids = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().cloned());
                ids.push(current);
            }
        }
        ids
    }

    /// Walks parent links up to the top-level ancestor.
    pub fn root_of(&self, id: &str) -> Option<&FeatureNode> {
        let mut node = self.nodes.get(id)?;
        while let Some(parent_id) = &node.parent {
            node = self.nodes.get(parent_id)?;
        }
        Some(node)
    }
}
