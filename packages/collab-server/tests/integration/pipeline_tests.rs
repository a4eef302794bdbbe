//! Apply pipeline: scenarios, atomicity, sequencing and undo.

use std::sync::Arc;

use collab_core::change::{
    AddAssemblyChange, CopyFeatureChange, DeleteFeatureChange, DeleteFeatureDetails,
    LocationEndChange, LocationEndDetails, LocationStartChange, LocationStartDetails,
};
use collab_core::model::{AssemblySnapshot, RefSeqSpec};
use collab_core::{Change, ChangeFilter, CollabError, InMemoryBus, MessageBus, ValidationStage};
use ntest::timeout;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::helpers::{add_gene, gene, service, ADMIN, CURATOR, VIEWER};

#[test]
#[timeout(5000)]
fn test_add_feature_scenario() {
    let bus = Arc::new(InMemoryBus::new(64));
    let service = service(bus.clone());
    let mut sub = bus.subscribe("A1-chr1");

    let entry = service
        .submit_json(
            &json!({
                "typeName": "AddFeatureChange",
                "changedIds": ["f1"],
                "assemblyId": "A1",
                "featureId": "f1",
                "targetAssemblyId": "A1"
            }),
            CURATOR,
            "",
        )
        .unwrap();

    assert_eq!(entry.sequence, 1);
    assert_eq!(entry.type_name, "AddFeatureChange");
    assert_eq!(entry.changed_ids, vec!["f1".to_string()]);

    let state = service.snapshot();
    assert!(state.features().contains("f1"));
    assert_eq!(
        state.resolve_ref_seq("f1").unwrap(),
        ("A1".to_string(), "chr1".to_string())
    );

    let message = sub.try_recv().expect("broadcast on the refSeq channel");
    assert_eq!(message.channel, "A1-chr1");
    assert_eq!(message.change_sequence, 1);
    assert_eq!(message.user_name, CURATOR);
    assert_eq!(message.change_info["typeName"], "AddFeatureChange");
}

#[test]
fn test_delete_cascades_to_children() {
    let service = service(Arc::new(InMemoryBus::new(64)));
    service.submit_change(add_gene("g1"), CURATOR).unwrap();

    let entry = service
        .submit_change(
            Change::DeleteFeature(DeleteFeatureChange::new(
                "A1",
                vec![DeleteFeatureDetails::new("g1")],
            )),
            ADMIN,
        )
        .unwrap();

    for id in ["g1", "g1.t1", "g1.t2"] {
        assert!(entry.changed_ids.iter().any(|c| c == id), "{} not in changedIds", id);
        assert!(!service.snapshot().features().contains(id));
    }
    assert!(service.snapshot().assembly("A1").unwrap().ref_seqs["r1"].features.is_empty());
}

#[test]
fn test_undo_delete_restores_subtree() {
    let service = service(Arc::new(InMemoryBus::new(64)));
    service.submit_change(add_gene("g1"), CURATOR).unwrap();
    let before = service.snapshot();

    let delete = service
        .submit_change(
            Change::DeleteFeature(DeleteFeatureChange::new(
                "A1",
                vec![DeleteFeatureDetails::new("g1")],
            )),
            ADMIN,
        )
        .unwrap();
    let undo = service.undo(delete.id, CURATOR).unwrap();

    assert_eq!(undo.reverts, Some(delete.id));
    assert_eq!(undo.type_name, "AddFeatureChange");
    assert_eq!(undo.sequence, delete.sequence + 1);
    assert_eq!(service.snapshot().features().snapshot("g1").unwrap(), gene("g1"));
    assert_eq!(*service.snapshot(), *before);
    // History is kept: add, delete, undo
    assert_eq!(service.change_log().len(), 3);
}

#[test]
fn test_undo_location_change() {
    let service = service(Arc::new(InMemoryBus::new(64)));
    service.submit_change(add_gene("g1"), CURATOR).unwrap();

    let moved = service
        .submit_change(
            Change::LocationStart(LocationStartChange::new(
                "A1",
                vec![LocationStartDetails {
                    feature_id: "g1".into(),
                    old_start: 100,
                    new_start: 50,
                }],
            )),
            CURATOR,
        )
        .unwrap();
    assert_eq!(service.snapshot().features().get("g1").unwrap().start, 50);

    service.undo(moved.id, CURATOR).unwrap();
    assert_eq!(service.snapshot().features().get("g1").unwrap().start, 100);
}

#[test]
fn test_post_validation_failure_is_atomic() {
    let service = service(Arc::new(InMemoryBus::new(64)));
    service.submit_change(add_gene("g1"), CURATOR).unwrap();
    let before = service.snapshot();
    let log_len = service.change_log().len();

    // Transcript would end past its gene
    let result = service.submit_change(
        Change::LocationEnd(LocationEndChange::new(
            "A1",
            vec![LocationEndDetails {
                feature_id: "g1.t1".into(),
                old_end: 500,
                new_end: 950,
            }],
        )),
        CURATOR,
    );

    match result {
        Err(CollabError::Validation { stage, messages }) => {
            assert_eq!(stage, ValidationStage::Post);
            assert!(messages.iter().any(|m| m.contains("g1.t1")));
        }
        other => panic!("expected post-validation failure, got {:?}", other),
    }
    assert_eq!(*service.snapshot(), *before);
    assert_eq!(service.change_log().len(), log_len);
    assert!(service.change_log().find(&ChangeFilter::default()).iter().all(|e| e.type_name != "LocationEndChange"));
}

#[test]
fn test_pre_validation_rejects_read_only_user() {
    let service = service(Arc::new(InMemoryBus::new(64)));
    let err = service.submit_change(add_gene("g1"), VIEWER).unwrap_err();
    assert!(matches!(
        err,
        CollabError::Validation {
            stage: ValidationStage::Pre,
            ..
        }
    ));
    assert!(err.is_user_facing());
    assert!(service.change_log().is_empty());
    assert_eq!(service.counter().current("changeCounter"), 0);
}

#[test]
fn test_unknown_change_type_is_rejected_before_processing() {
    let service = service(Arc::new(InMemoryBus::new(64)));
    let err = service
        .submit_json(
            &json!({"typeName": "MergeFeaturesChange", "changedIds": ["f1"]}),
            ADMIN,
            "",
        )
        .unwrap_err();
    assert_eq!(err, CollabError::UnknownChangeType("MergeFeaturesChange".into()));
    assert!(service.change_log().is_empty());
}

#[test]
fn test_missing_feature_is_internal_fault() {
    let service = service(Arc::new(InMemoryBus::new(64)));
    let err = service
        .submit_change(
            Change::DeleteFeature(DeleteFeatureChange::new(
                "A1",
                vec![DeleteFeatureDetails::new("ghost")],
            )),
            ADMIN,
        )
        .unwrap_err();
    assert!(matches!(err, CollabError::ReferentialIntegrity(_)));
    assert!(!err.is_user_facing());
    assert!(service.change_log().is_empty());
}

#[test]
#[timeout(20000)]
fn test_concurrent_submissions_get_unique_sequences() {
    let service = service(Arc::new(InMemoryBus::new(1024)));
    let threads = 8;
    let per_thread = 10;

    let mut sequences: Vec<u64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let service = &service;
                scope.spawn(move || {
                    (0..per_thread)
                        .map(|i| {
                            service
                                .submit_change(add_gene(&format!("g{}-{}", t, i)), CURATOR)
                                .unwrap()
                                .sequence
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    sequences.sort_unstable();
    let expected: Vec<u64> = (1..=(threads * per_thread) as u64).collect();
    assert_eq!(sequences, expected);

    // Commit order, sequence order and createdAt order agree
    let log = service.change_log().since(chrono::DateTime::<chrono::Utc>::MIN_UTC);
    assert!(log.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[test]
#[timeout(20000)]
fn test_concurrent_commits_publish_in_sequence_order() {
    let bus = Arc::new(InMemoryBus::new(1024));
    let service = service(bus.clone());
    let mut sub = bus.subscribe("A1-chr1");
    let threads = 8;
    let per_thread = 50;

    std::thread::scope(|scope| {
        for t in 0..threads {
            let service = &service;
            scope.spawn(move || {
                for i in 0..per_thread {
                    service
                        .submit_change(add_gene(&format!("g{}-{}", t, i)), CURATOR)
                        .unwrap();
                }
            });
        }
    });

    let mut received = Vec::new();
    while let Some(message) = sub.try_recv() {
        received.push(message.change_sequence);
    }
    assert_eq!(received.len(), threads * per_thread);
    assert!(
        received.windows(2).all(|w| w[0] < w[1]),
        "out of order: {:?}",
        received.windows(2).find(|w| w[0] >= w[1])
    );
}

#[test]
#[timeout(5000)]
fn test_child_keyed_under_other_id_is_rejected() {
    let service = service(Arc::new(InMemoryBus::new(16)));
    let payload = json!({
        "typeName": "AddFeatureChange",
        "changedIds": ["p1"],
        "assemblyId": "A1",
        "featureId": "p1",
        "targetAssemblyId": "A1",
        "addedFeature": {
            "_id": "p1",
            "type": "gene",
            "refSeq": "r1",
            "start": 100,
            "end": 900,
            "children": {
                "wrongkey": {"_id": "c1", "type": "mRNA", "refSeq": "r1", "start": 100, "end": 500}
            }
        }
    });

    let err = service.submit_json(&payload, CURATOR, "").unwrap_err();
    assert!(matches!(err, CollabError::InvalidChange(_)), "{:?}", err);
    let features = service.snapshot();
    assert!(!features.features().contains("p1"));
    assert!(!features.features().contains("c1"));
    assert!(service.change_log().is_empty());
}

#[test]
#[timeout(5000)]
fn test_copy_is_broadcast_as_add_on_destination() {
    let bus = Arc::new(InMemoryBus::new(64));
    let service = service(bus.clone());
    service
        .import_assembly(&AssemblySnapshot {
            id: "A2".into(),
            name: "hg38-alt".into(),
            ref_seqs: vec![RefSeqSpec::new("q1", "chr1", 10_000)],
            features: vec![],
        })
        .unwrap();
    service.submit_change(add_gene("g1"), CURATOR).unwrap();

    let mut source = bus.subscribe("A1-chr1");
    let mut destination = bus.subscribe("A2-chr1");
    let entry = service
        .submit_change(
            Change::CopyFeature(CopyFeatureChange::new("A1", "g1", "A2", "g1copy")),
            CURATOR,
        )
        .unwrap();

    assert_eq!(entry.type_name, "CopyFeatureChange");
    assert!(entry.changed_ids.contains(&"g1copy-g1.t1".to_string()));
    let state = service.snapshot();
    assert_eq!(state.features().get("g1copy").unwrap().ref_seq, "q1");
    assert!(state.features().contains("g1copy-g1.t2"));

    let message = destination.try_recv().expect("broadcast on destination");
    assert_eq!(message.change_info["typeName"], "AddFeatureChange");
    assert_eq!(message.change_info["assemblyId"], "A2");
    assert!(source.try_recv().is_none());
}

#[test]
#[timeout(5000)]
fn test_assembly_changes_go_to_common() {
    let bus = Arc::new(InMemoryBus::new(64));
    let service = service(bus.clone());
    let mut common = bus.subscribe("COMMON");

    service
        .submit_change(
            Change::AddAssembly(AddAssemblyChange::new(
                "A3",
                "mm10",
                vec![RefSeqSpec::new("m1", "chr1", 5_000)],
            )),
            ADMIN,
        )
        .unwrap();

    let message = common.try_recv().unwrap();
    assert_eq!(message.channel, "COMMON");
    assert_eq!(message.change_info["typeName"], "AddAssemblyChange");
    assert!(service.snapshot().has_assembly("A3"));
}

#[test]
fn test_find_changes_filters_and_orders() {
    let service = service(Arc::new(InMemoryBus::new(64)));
    service.submit_change(add_gene("g1"), CURATOR).unwrap();
    service.submit_change(add_gene("g2"), ADMIN).unwrap();
    service
        .submit_change(
            Change::DeleteFeature(DeleteFeatureChange::new(
                "A1",
                vec![DeleteFeatureDetails::new("g1")],
            )),
            ADMIN,
        )
        .unwrap();

    let all: Vec<u64> = service
        .find_changes(&ChangeFilter::default())
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(all, vec![3, 2, 1]);

    let by_admin = service.find_changes(&ChangeFilter {
        user: Some("ADM".into()),
        ..Default::default()
    });
    assert_eq!(by_admin.len(), 2);

    let adds_by_admin = service.find_changes(&ChangeFilter {
        user: Some("admin".into()),
        type_name: Some("AddFeatureChange".into()),
        assembly: Some("A1".into()),
    });
    assert_eq!(adds_by_admin.len(), 1);
    assert_eq!(adds_by_admin[0].sequence, 2);
}
