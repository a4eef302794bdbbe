//! Replay streaming and client sessions talking to an in-process service.

use std::sync::Arc;
use std::time::Duration;

use collab_client::{ClientConfig, ClientError, ClientSession, MessageOutcome, SessionEvent};
use collab_core::{ChangeBackend, CollabError, InMemoryBus, MessageBus};
use collab_server::{ChangeService, LocalBackend};
use ntest::timeout;
use pretty_assertions::assert_eq;

use super::helpers::{add_gene, service, ADMIN, CURATOR, VIEWER};

fn session(service: &Arc<ChangeService>, bus: &Arc<InMemoryBus>, user: &str) -> ClientSession {
    let backend: Arc<dyn ChangeBackend> = Arc::new(LocalBackend::new(service.clone(), user));
    let mut session = ClientSession::open(
        ClientConfig::default(),
        service.registry().clone(),
        Some(backend),
        bus.clone(),
    );
    session
        .load_assembly(&service.snapshot().export_assembly("A1").unwrap())
        .unwrap();
    session
}

#[tokio::test]
#[timeout(5000)]
async fn test_replay_streams_entries_since_timestamp_in_order() {
    let bus = Arc::new(InMemoryBus::new(64));
    let service = service(bus.clone());
    service.submit_change(add_gene("g1"), CURATOR).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let t0 = service.server_time();
    for id in ["g2", "g3", "g4"] {
        service.submit_change(add_gene(id), CURATOR).unwrap();
    }

    let mut replay = bus.subscribe("tmp_replay");
    let ack = service.request_replay(t0, "tmp_replay").unwrap();
    assert_eq!(ack.entries, 3);

    let mut sequences = Vec::new();
    for _ in 0..ack.entries {
        let message = replay.recv().await.unwrap();
        assert!(message.timestamp >= t0);
        assert_eq!(message.user_token, "");
        sequences.push(message.change_sequence);
    }
    assert_eq!(sequences, vec![2, 3, 4]);
    assert!(replay.try_recv().is_none());
}

#[tokio::test]
#[timeout(5000)]
async fn test_submitter_skips_echo_and_peer_applies() {
    let bus = Arc::new(InMemoryBus::new(64));
    let service = Arc::new(service(bus.clone()));
    let mut alice = session(&service, &bus, CURATOR);
    let mut bob = session(&service, &bus, ADMIN);
    let mut bob_notices = bob.manager().notices();

    let entry = alice.submit(add_gene("g1")).await.unwrap().unwrap();
    assert_eq!(entry.sequence, 1);
    // Optimistic apply happened before the backend answered
    assert!(alice.manager().data_store().store().features().contains("g1.t2"));

    let outcome = alice.process_next().await.unwrap().unwrap();
    assert_eq!(outcome, MessageOutcome::SkippedEcho);
    assert!(alice.manager().data_store().store().features().contains("g1"));

    assert!(!bob.manager().data_store().store().features().contains("g1"));
    let outcome = bob.process_next().await.unwrap().unwrap();
    assert_eq!(outcome, MessageOutcome::Applied);
    assert_eq!(
        bob.manager().data_store().store().features().snapshot("g1").unwrap(),
        service.snapshot().features().snapshot("g1").unwrap()
    );
    assert_eq!(
        bob_notices.try_recv().unwrap(),
        SessionEvent::RemoteChangeApplied {
            user_name: CURATOR.into(),
            type_name: "AddFeatureChange".into(),
            sequence: 1,
        }
    );
    assert_eq!(bob.manager().last_timestamp(), Some(entry.created_at));
}

#[tokio::test]
#[timeout(5000)]
async fn test_rejected_submit_rolls_back_mirror() {
    let bus = Arc::new(InMemoryBus::new(64));
    let service = Arc::new(service(bus.clone()));
    let mut viewer = session(&service, &bus, VIEWER);
    let before = viewer.manager().data_store().store().clone();
    let mut notices = viewer.manager().notices();

    let err = viewer.submit(add_gene("g1")).await.unwrap_err();
    assert!(matches!(err, ClientError::Core(CollabError::Validation { .. })));
    assert!(err.is_user_facing());
    assert_eq!(viewer.manager().data_store().store(), &before);
    assert!(matches!(
        notices.try_recv().unwrap(),
        SessionEvent::ChangeRejected { .. }
    ));
    assert!(service.change_log().is_empty());
}

#[tokio::test]
#[timeout(10000)]
async fn test_reconnect_replays_missed_changes() {
    let bus = Arc::new(InMemoryBus::new(64));
    let service = Arc::new(service(bus.clone()));
    let mut alice = session(&service, &bus, CURATOR);
    let mut bob = session(&service, &bus, ADMIN);
    let mut bob_notices = bob.manager().notices();

    alice.submit(add_gene("g1")).await.unwrap();
    assert_eq!(bob.process_next().await.unwrap().unwrap(), MessageOutcome::Applied);
    let checkpoint = bob.manager().last_timestamp().unwrap();

    bob.mark_disconnected();
    assert!(!bob.is_connected());
    alice.submit(add_gene("g2")).await.unwrap();
    alice.submit(add_gene("g3")).await.unwrap();

    let replayed = bob.reconnect().await.unwrap();
    // g1 is delivered again because the window is inclusive
    assert_eq!(replayed, 3);
    assert!(bob.is_connected());
    let mirror = bob.manager().data_store().store();
    for id in ["g1", "g2", "g3"] {
        assert!(mirror.features().contains(id), "{} missing after replay", id);
    }
    assert!(bob.manager().last_timestamp().unwrap() > checkpoint);
    assert_eq!(bob.process_pending(), 0);

    let mut events = Vec::new();
    while let Ok(event) = bob_notices.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&SessionEvent::Disconnected));
    assert!(events.contains(&SessionEvent::Reconnected { replayed: 3 }));

    // Live broadcasts flow again after reconnect
    alice.submit(add_gene("g4")).await.unwrap();
    assert_eq!(bob.process_next().await.unwrap().unwrap(), MessageOutcome::Applied);
    assert!(bob.manager().data_store().store().features().contains("g4"));
}

#[tokio::test]
#[timeout(5000)]
async fn test_reconnect_without_checkpoint_skips_replay() {
    let bus = Arc::new(InMemoryBus::new(64));
    let service = Arc::new(service(bus.clone()));
    service.submit_change(add_gene("g1"), CURATOR).unwrap();

    let mut fresh = session(&service, &bus, CURATOR);
    let channels_before = bus.channel_count();
    assert_eq!(fresh.reconnect().await.unwrap(), 0);
    // No ephemeral channel was opened
    assert_eq!(bus.channel_count(), channels_before);
}

#[tokio::test]
#[timeout(5000)]
async fn test_changes_for_unloaded_assembly_are_skipped() {
    use collab_core::change::{AddFeatureChange, AddFeatureDetails};
    use collab_core::model::{AssemblySnapshot, RefSeqSpec};
    use collab_core::Change;

    let bus = Arc::new(InMemoryBus::new(64));
    let service = Arc::new(service(bus.clone()));
    service
        .import_assembly(&AssemblySnapshot {
            id: "A2".into(),
            name: "mm10".into(),
            ref_seqs: vec![RefSeqSpec::new("m1", "chr1", 5_000)],
            features: vec![],
        })
        .unwrap();
    let mut bob = session(&service, &bus, ADMIN);
    // Bob has only A1 loaded but listens on A2's channel too
    bob.open_ref_seq("A2", "chr1");

    service
        .submit_change(
            Change::AddFeature(AddFeatureChange::new(
                "A2",
                vec![AddFeatureDetails::new("m-f1", "A2")],
            )),
            CURATOR,
        )
        .unwrap();

    assert_eq!(
        bob.process_next().await.unwrap().unwrap(),
        MessageOutcome::SkippedUntracked
    );
    assert!(!bob.manager().data_store().store().features().contains("m-f1"));
}
