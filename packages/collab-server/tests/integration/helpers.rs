//! Shared fixtures.

use std::sync::Arc;

use collab_core::change::{AddFeatureChange, AddFeatureDetails};
use collab_core::model::{AssemblySnapshot, FeatureSnapshot, RefSeqSpec, Role, User};
use collab_core::{Change, EngineConfig, InMemoryBus};
use collab_server::ChangeService;

pub const ADMIN: &str = "admin";
pub const CURATOR: &str = "curator";
pub const VIEWER: &str = "viewer";

pub fn hg38() -> AssemblySnapshot {
    AssemblySnapshot {
        id: "A1".into(),
        name: "hg38".into(),
        ref_seqs: vec![
            RefSeqSpec::new("r1", "chr1", 10_000),
            RefSeqSpec::new("r2", "chr2", 8_000),
        ],
        features: vec![],
    }
}

/// Service with the three users registered and assembly A1 imported.
pub fn service_with(config: EngineConfig, bus: Arc<InMemoryBus>) -> ChangeService {
    let service = ChangeService::new(config, bus).unwrap();
    service.register_user(User::new(ADMIN, Role::Admin)).unwrap();
    service.register_user(User::new(CURATOR, Role::User)).unwrap();
    service.register_user(User::new(VIEWER, Role::ReadOnly)).unwrap();
    service.import_assembly(&hg38()).unwrap();
    service
}

pub fn service(bus: Arc<InMemoryBus>) -> ChangeService {
    service_with(EngineConfig::default(), bus)
}

/// A gene on chr1 with two transcripts.
pub fn gene(id: &str) -> FeatureSnapshot {
    FeatureSnapshot::new(id, "gene", "r1", 100, 900)
        .with_child(FeatureSnapshot::new(format!("{}.t1", id), "mRNA", "r1", 100, 500))
        .with_child(FeatureSnapshot::new(format!("{}.t2", id), "mRNA", "r1", 400, 900))
}

pub fn add_gene(id: &str) -> Change {
    Change::AddFeature(AddFeatureChange::new(
        "A1",
        vec![AddFeatureDetails::new(id, "A1").with_feature(gene(id))],
    ))
}
