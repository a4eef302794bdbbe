use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::feature::FeatureSnapshot;

/// Reference sequence within an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefSeq {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub length: u64,
    /// Top-level features annotated on this sequence
    #[serde(default)]
    pub features: BTreeSet<String>,
}

/// Reference sequence declaration carried in assembly payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefSeqSpec {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub length: u64,
}

impl RefSeqSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, length: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assembly {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub ref_seqs: BTreeMap<String, RefSeq>,
}

impl Assembly {
    pub fn new(id: impl Into<String>, name: impl Into<String>, ref_seqs: &[RefSeqSpec]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ref_seqs: ref_seqs
                .iter()
                .map(|spec| {
                    (
                        spec.id.clone(),
                        RefSeq {
                            id: spec.id.clone(),
                            name: spec.name.clone(),
                            length: spec.length,
                            features: BTreeSet::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// First refSeq in id order.
    pub fn first_ref_seq(&self) -> Option<&RefSeq> {
        self.ref_seqs.values().next()
    }

    pub fn ref_seq_by_name(&self, name: &str) -> Option<&RefSeq> {
        self.ref_seqs.values().find(|ref_seq| ref_seq.name == name)
    }

    pub fn ref_seq_specs(&self) -> Vec<RefSeqSpec> {
        self.ref_seqs
            .values()
            .map(|ref_seq| RefSeqSpec::new(&ref_seq.id, &ref_seq.name, ref_seq.length))
            .collect()
    }
}

/// Everything needed to recreate an assembly and its annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblySnapshot {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub ref_seqs: Vec<RefSeqSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<FeatureSnapshot>,
}
