//! Durable log, counters and snapshot recovery.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use collab_core::{CollabError, EngineConfig, InMemoryBus};
use collab_server::ChangeService;
use ntest::timeout;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use super::helpers::{add_gene, service_with, CURATOR};

fn persistent_config(dir: &std::path::Path) -> EngineConfig {
    EngineConfig {
        data_dir: dir.to_path_buf(),
        persist: true,
        snapshot_interval_changes: 2,
        persistence_retry_delay_ms: 1,
        ..Default::default()
    }
}

#[test]
#[timeout(10000)]
fn test_reopen_restores_store_log_and_counter() {
    let temp_dir = tempdir().unwrap();
    let config = persistent_config(temp_dir.path());

    let (state, entries) = {
        let service = service_with(config.clone(), Arc::new(InMemoryBus::new(16)));
        for id in ["g1", "g2", "g3"] {
            service.submit_change(add_gene(id), CURATOR).unwrap();
        }
        (service.snapshot(), service.change_log().len())
    };
    assert!(temp_dir.path().join("changes.log").exists());
    assert!(temp_dir.path().join("counters.json").exists());
    assert!(temp_dir.path().join("store.json").exists());

    // g3 is only in the log; the snapshot was taken after g2
    let reopened = ChangeService::new(config, Arc::new(InMemoryBus::new(16))).unwrap();
    assert_eq!(*reopened.snapshot(), *state);
    assert_eq!(reopened.change_log().len(), entries);

    let next = reopened.submit_change(add_gene("g4"), CURATOR).unwrap();
    assert_eq!(next.sequence, 4);
}

#[test]
#[timeout(10000)]
fn test_log_lines_are_checksummed_json() {
    let temp_dir = tempdir().unwrap();
    let service = service_with(
        persistent_config(temp_dir.path()),
        Arc::new(InMemoryBus::new(16)),
    );
    let entry = service.submit_change(add_gene("g1"), CURATOR).unwrap();

    let contents = fs::read_to_string(temp_dir.path().join("changes.log")).unwrap();
    let line = contents.lines().next().unwrap();
    let (crc, json) = line.split_once(' ').unwrap();
    assert_eq!(crc.len(), 8);
    let value: serde_json::Value = serde_json::from_str(json).unwrap();
    assert_eq!(value["typeName"], "AddFeatureChange");
    assert_eq!(value["sequence"], 1);
    assert_eq!(value["_id"], entry.id.to_string());
    assert_eq!(value["changes"]["featureId"], "g1");
}

#[test]
#[timeout(10000)]
fn test_torn_trailing_line_is_ignored() {
    let temp_dir = tempdir().unwrap();
    let config = persistent_config(temp_dir.path());
    {
        let service = service_with(config.clone(), Arc::new(InMemoryBus::new(16)));
        service.submit_change(add_gene("g1"), CURATOR).unwrap();
    }

    let mut log = OpenOptions::new()
        .append(true)
        .open(temp_dir.path().join("changes.log"))
        .unwrap();
    log.write_all(b"0badc0de {\"typeName\":\"AddFea").unwrap();
    drop(log);

    {
        let reopened = ChangeService::new(config.clone(), Arc::new(InMemoryBus::new(16))).unwrap();
        assert_eq!(reopened.change_log().len(), 1);
        assert!(reopened.snapshot().features().contains("g1"));
        reopened.submit_change(add_gene("g2"), CURATOR).unwrap();
    }

    // The torn bytes were cut, so the next append did not merge into them
    let again = ChangeService::new(config, Arc::new(InMemoryBus::new(16))).unwrap();
    let sequences: Vec<u64> = again
        .change_log()
        .since(chrono::DateTime::<chrono::Utc>::MIN_UTC)
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2]);
    assert!(again.snapshot().features().contains("g2"));
}

#[test]
#[timeout(10000)]
fn test_flush_waits_for_open_transaction() {
    let temp_dir = tempdir().unwrap();
    let service = service_with(
        persistent_config(temp_dir.path()),
        Arc::new(InMemoryBus::new(16)),
    );
    let flushed = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let tx = service.store().begin();
        let flusher = scope.spawn(|| {
            service.flush().unwrap();
            flushed.store(true, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(100));
        assert!(!flushed.load(Ordering::SeqCst));
        tx.abort();
        flusher.join().unwrap();
    });
    assert!(flushed.load(Ordering::SeqCst));
}

#[test]
#[timeout(20000)]
fn test_concurrent_flushes_never_skip_logged_changes() {
    let temp_dir = tempdir().unwrap();
    let config = EngineConfig {
        snapshot_interval_changes: 1,
        ..persistent_config(temp_dir.path())
    };
    let expected = {
        let service = service_with(config.clone(), Arc::new(InMemoryBus::new(16)));
        std::thread::scope(|scope| {
            for t in 0..4 {
                let service = &service;
                scope.spawn(move || {
                    for i in 0..10 {
                        service
                            .submit_change(add_gene(&format!("g{}-{}", t, i)), CURATOR)
                            .unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..20 {
                    service.flush().unwrap();
                }
            });
        });
        service.snapshot()
    };

    let reopened = ChangeService::new(config, Arc::new(InMemoryBus::new(16))).unwrap();
    assert_eq!(*reopened.snapshot(), *expected);
    assert_eq!(reopened.snapshot().features().len(), 40 * 3);
}

#[test]
#[timeout(10000)]
fn test_checksum_mismatch_is_corruption() {
    let temp_dir = tempdir().unwrap();
    let config = persistent_config(temp_dir.path());
    {
        let service = service_with(config.clone(), Arc::new(InMemoryBus::new(16)));
        service.submit_change(add_gene("g1"), CURATOR).unwrap();
    }

    let path = temp_dir.path().join("changes.log");
    let tampered = fs::read_to_string(&path).unwrap().replace("\"g1\"", "\"g9\"");
    fs::write(&path, tampered).unwrap();

    match ChangeService::new(config, Arc::new(InMemoryBus::new(16))) {
        Err(CollabError::DataCorruption(message)) => assert!(message.contains("checksum")),
        Err(other) => panic!("expected corruption, got {:?}", other),
        Ok(_) => panic!("tampered log was accepted"),
    }
}
