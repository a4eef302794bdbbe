//! The authoritative apply pipeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use collab_core::model::{AssemblySnapshot, User};
use collab_core::{
    AnnotationStore, Change, ChangeFilter, ChangeLogEntry, ChangeRegistry, ChangeType, Channel,
    CollabError, EngineConfig, MessageBus, PermissionTable, ReplayAck, Result, RouteTarget,
    ValidationContext, ValidationRegistry, ValidationStage,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::change_log::ChangeLog;
use crate::counter::SequenceCounter;
use crate::persistence::PersistenceManager;
use crate::router;
use crate::store::FeatureStore;

/// Validates, applies, logs, sequences and broadcasts changes.
pub struct ChangeService {
    config: EngineConfig,
    registry: Arc<ChangeRegistry>,
    validators: Arc<ValidationRegistry>,
    store: FeatureStore,
    counter: SequenceCounter,
    log: ChangeLog,
    persistence: Option<PersistenceManager>,
    bus: Arc<dyn MessageBus>,
}

impl ChangeService {
    /// Opens the service with built-in change types and validators.
    pub fn new(config: EngineConfig, bus: Arc<dyn MessageBus>) -> Result<Self> {
        Self::open(
            config,
            Arc::new(ChangeRegistry::builtin()),
            Arc::new(ValidationRegistry::with_builtin(PermissionTable::default())),
            bus,
        )
    }

    /// Opens the service, restoring persisted state when `config.persist` is set.
    ///
    /// The store is loaded from the latest snapshot, then every logged change
    /// newer than the snapshot is re-applied.
    pub fn open(
        config: EngineConfig,
        registry: Arc<ChangeRegistry>,
        validators: Arc<ValidationRegistry>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self> {
        config.validate()?;
        if !config.persist {
            return Ok(Self {
                config,
                registry,
                validators,
                store: FeatureStore::default(),
                counter: SequenceCounter::new(),
                log: ChangeLog::new(),
                persistence: None,
                bus,
            });
        }

        let persistence = PersistenceManager::new(&config);
        let (mut store, last_sequence) = match persistence.load_snapshot()? {
            Some(snapshot) => (snapshot.store, snapshot.last_sequence),
            None => (AnnotationStore::new(), 0),
        };
        let entries = persistence.load_log()?;
        let mut replayed = 0;
        for entry in entries.iter().filter(|e| e.sequence > last_sequence) {
            let mut change = entry.change(&registry)?;
            change.apply_to_client(&mut store).map_err(|e| {
                CollabError::DataCorruption(format!(
                    "Logged change {} (sequence {}) no longer applies: {}",
                    entry.id, entry.sequence, e
                ))
            })?;
            replayed += 1;
        }

        let counter = SequenceCounter::from_values(&persistence.load_counters()?);
        if let Some(max) = entries.iter().map(|e| e.sequence).max() {
            counter.ensure_at_least(&config.counter_name, max);
        }
        info!(
            data_dir = %persistence.data_dir().display(),
            entries = entries.len(),
            replayed,
            "Opened change store"
        );

        Ok(Self {
            config,
            registry,
            validators,
            store: FeatureStore::new(store),
            counter,
            log: ChangeLog::from_entries(entries),
            persistence: Some(persistence),
            bus,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChangeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// Last committed annotation state.
    pub fn snapshot(&self) -> Arc<AnnotationStore> {
        self.store.snapshot()
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.log
    }

    pub fn counter(&self) -> &SequenceCounter {
        &self.counter
    }

    /// Seeds a user outside the change log (initial admin, external auth sync).
    pub fn register_user(&self, user: User) -> Result<()> {
        self.seed(|store| {
            store.upsert_user(user);
            Ok(())
        })
    }

    /// Loads an assembly outside the change log, as an initial bulk import.
    pub fn import_assembly(&self, snapshot: &AssemblySnapshot) -> Result<()> {
        self.seed(|store| store.add_assembly(snapshot).map(|_| ()))?;
        info!(assembly = %snapshot.id, ref_seqs = snapshot.ref_seqs.len(), "Imported assembly");
        Ok(())
    }

    fn seed<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut AnnotationStore) -> Result<()>,
    {
        let mut tx = self.store.begin();
        mutate(tx.staged_mut())?;
        let last_sequence = self.last_sequence();
        let (_, _, saved) = tx.commit_with(|state, _| match &self.persistence {
            Some(persistence) => persistence.save_snapshot(state, last_sequence),
            None => Ok(()),
        });
        saved
    }

    /// Sequence of the newest log entry. Only consistent with the committed
    /// store while the writer lock is held.
    fn last_sequence(&self) -> u64 {
        self.log.last().map(|e| e.sequence).unwrap_or(0)
    }

    /// Submits a change on behalf of `user` with no session token.
    pub fn submit_change(&self, change: Change, user: &str) -> Result<ChangeLogEntry> {
        self.run_pipeline(change, user, "", None)
    }

    /// Submits a change from a client session identified by `user_token`.
    pub fn submit(&self, change: Change, user: &str, user_token: &str) -> Result<ChangeLogEntry> {
        self.run_pipeline(change, user, user_token, None)
    }

    /// Decodes a wire payload and submits it.
    pub fn submit_json(
        &self,
        payload: &serde_json::Value,
        user: &str,
        user_token: &str,
    ) -> Result<ChangeLogEntry> {
        let change = self.registry.from_json(payload)?;
        self.run_pipeline(change, user, user_token, None)
    }

    /// Submits the inverse of a logged change as a new entry that reverts it.
    pub fn undo(&self, entry_id: Uuid, user: &str) -> Result<ChangeLogEntry> {
        let original = self
            .log
            .get(entry_id)
            .ok_or_else(|| CollabError::missing(format!("Change log entry '{}'", entry_id)))?;
        let inverse = original.change(&self.registry)?.inverse()?;
        debug!(reverts = %entry_id, type_name = %inverse.type_name(), "Undoing change");
        self.run_pipeline(inverse, user, "", Some(entry_id))
    }

    fn run_pipeline(
        &self,
        mut change: Change,
        user: &str,
        user_token: &str,
        reverts: Option<Uuid>,
    ) -> Result<ChangeLogEntry> {
        let type_name = change.type_name();
        debug!(%type_name, user, changed_ids = ?change.changed_ids(), "Change requested");

        let committed = self.store.snapshot();
        let ctx = ValidationContext {
            store: &committed,
            actor: user,
        };
        self.validators
            .backend_pre_validate(&change, &ctx)
            .into_result(ValidationStage::Pre)
            .map_err(|e| rejected(type_name, user, e))?;

        let mut tx = self.store.begin();
        let target = change
            .apply_to_server(tx.staged_mut())
            .map_err(|e| rejected(type_name, user, e))?;

        let sequence = self.counter.next(&self.config.counter_name);
        let created_at = self.log.next_timestamp(Utc::now());
        let entry = ChangeLogEntry::new(&change, user, sequence, created_at, reverts)?;
        tx.stage_log_entry(entry.clone())?;

        let ctx = ValidationContext {
            store: tx.staged(),
            actor: user,
        };
        self.validators
            .backend_post_validate(&change, &ctx)
            .into_result(ValidationStage::Post)
            .map_err(|e| rejected(type_name, user, e))?;

        if let Some(persistence) = &self.persistence {
            persistence.save_counters(&self.counter.values())?;
            persistence.append_log_entry(&entry)?;
        }
        self.log.append(entry.clone());
        // Snapshot and publish before the writer lock drops, so both follow
        // commit order.
        tx.commit_with(|state, _| {
            if let Some(persistence) = &self.persistence {
                if let Err(e) = persistence.record_commit(state, sequence) {
                    warn!(error = %e, "Failed to write store snapshot");
                }
            }
            self.broadcast(&change, &target, &entry, user_token);
        });
        info!(%type_name, sequence, user, "Change committed");
        Ok(entry)
    }

    fn broadcast(&self, change: &Change, target: &RouteTarget, entry: &ChangeLogEntry, user_token: &str) {
        let Some(channel) = router::route_channel(target) else {
            debug!(type_name = %entry.type_name, "Change is not broadcast");
            return;
        };
        match router::envelope(change, &channel, entry, user_token) {
            Ok(message) => {
                let reached = self.bus.publish(&channel.name(), message);
                debug!(%channel, sequence = entry.sequence, reached, "Change broadcast");
            }
            Err(e) => warn!(%channel, error = %e, "Failed to build broadcast message"),
        }
    }

    /// Lists log entries newest first.
    pub fn find_changes(&self, filter: &ChangeFilter) -> Vec<ChangeLogEntry> {
        self.log.find(filter)
    }

    pub fn server_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Streams every entry with `createdAt >= since` to `channel`, oldest
    /// first, and returns how many will be sent.
    ///
    /// Inside a tokio runtime the stream runs on a spawned task; otherwise
    /// the messages are published before returning.
    pub fn request_replay(&self, since: DateTime<Utc>, channel: &str) -> Result<ReplayAck> {
        let replay_channel = Channel::Ephemeral(channel.to_string());
        let messages = self
            .log
            .since(since)
            .iter()
            .map(|entry| {
                let change = entry.change(&self.registry)?;
                router::envelope(&change, &replay_channel, entry, "")
            })
            .collect::<Result<Vec<_>>>()?;
        let count = messages.len();
        info!(channel, %since, entries = count, "Replaying changes");

        let bus = Arc::clone(&self.bus);
        let channel_name = channel.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for message in messages {
                        bus.publish(&channel_name, message);
                        tokio::task::yield_now().await;
                    }
                    debug!(channel = %channel_name, "Replay stream finished");
                });
            }
            Err(_) => {
                for message in messages {
                    bus.publish(&channel_name, message);
                }
            }
        }

        Ok(ReplayAck {
            channel: channel.to_string(),
            entries: count,
        })
    }

    /// Writes a store snapshot now.
    pub fn flush(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        self.store
            .with_committed(|state| persistence.save_snapshot(state, self.last_sequence()))
    }
}

fn rejected(type_name: ChangeType, user: &str, error: CollabError) -> CollabError {
    if error.is_user_facing() {
        warn!(%type_name, user, error = %error, "Change rejected");
    } else {
        error!(%type_name, user, error = %error, "Change failed");
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_core::change::{AddAssemblyChange, AddFeatureChange, AddFeatureDetails};
    use collab_core::model::{RefSeqSpec, Role};
    use collab_core::InMemoryBus;

    fn service() -> ChangeService {
        let service =
            ChangeService::new(EngineConfig::default(), Arc::new(InMemoryBus::new(64))).unwrap();
        service.register_user(User::new("admin", Role::Admin)).unwrap();
        service
            .submit_change(
                Change::AddAssembly(AddAssemblyChange::new(
                    "A1",
                    "hg38",
                    vec![RefSeqSpec::new("r1", "chr1", 1_000)],
                )),
                "admin",
            )
            .unwrap();
        service
    }

    #[test]
    fn test_sequences_are_consecutive() {
        let service = service();
        for (i, id) in ["f1", "f2", "f3"].iter().enumerate() {
            let entry = service
                .submit_change(
                    Change::AddFeature(AddFeatureChange::new(
                        "A1",
                        vec![AddFeatureDetails::new(*id, "A1")],
                    )),
                    "admin",
                )
                .unwrap();
            assert_eq!(entry.sequence, i as u64 + 2);
        }
    }

    #[test]
    fn test_rejected_change_touches_nothing() {
        let service = service();
        let before = service.snapshot();
        let log_len = service.change_log().len();
        let result = service.submit_change(
            Change::AddFeature(AddFeatureChange::new(
                "A1",
                vec![AddFeatureDetails::new("f1", "A1")],
            )),
            "nobody",
        );
        assert!(matches!(result, Err(CollabError::Validation { .. })));
        assert_eq!(*service.snapshot(), *before);
        assert_eq!(service.change_log().len(), log_len);
    }

    #[test]
    fn test_replay_without_runtime_publishes_inline() {
        let bus = Arc::new(InMemoryBus::new(64));
        let service = ChangeService::new(EngineConfig::default(), bus.clone()).unwrap();
        service.register_user(User::new("admin", Role::Admin)).unwrap();
        let since = service.server_time();
        service
            .submit_change(
                Change::AddAssembly(AddAssemblyChange::new("A1", "hg38", vec![])),
                "admin",
            )
            .unwrap();

        let mut sub = bus.subscribe("tmp_test");
        let ack = service.request_replay(since, "tmp_test").unwrap();
        assert_eq!(ack.entries, 1);
        let message = sub.try_recv().unwrap();
        assert_eq!(message.change_sequence, 1);
        assert_eq!(message.user_token, "");
    }
}
