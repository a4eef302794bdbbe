//! Serialized transaction over the feature store.

use std::sync::Arc;

use arc_swap::ArcSwap;
use collab_core::{AnnotationStore, ChangeLogEntry, CollabError, Result};
use parking_lot::MutexGuard;

/// Staged copy of the store plus the log entry that will describe it.
///
/// Holds the store's writer lock for its whole lifetime. Dropping it
/// without [`commit`](Self::commit) discards every staged mutation.
pub struct StoreTransaction<'a> {
    _writer: MutexGuard<'a, ()>,
    committed: &'a ArcSwap<AnnotationStore>,
    staged: AnnotationStore,
    log_entry: Option<ChangeLogEntry>,
    auto_abort: bool,
}

impl<'a> StoreTransaction<'a> {
    pub(crate) fn new(
        writer: MutexGuard<'a, ()>,
        staged: AnnotationStore,
        committed: &'a ArcSwap<AnnotationStore>,
    ) -> Self {
        Self {
            _writer: writer,
            committed,
            staged,
            log_entry: None,
            auto_abort: true,
        }
    }

    /// Staged state, including everything applied so far.
    pub fn staged(&self) -> &AnnotationStore {
        &self.staged
    }

    pub fn staged_mut(&mut self) -> &mut AnnotationStore {
        &mut self.staged
    }

    /// Records the log entry committed together with the staged state.
    pub fn stage_log_entry(&mut self, entry: ChangeLogEntry) -> Result<()> {
        if self.log_entry.is_some() {
            return Err(CollabError::TransactionConflict(
                "log entry already staged".into(),
            ));
        }
        self.log_entry = Some(entry);
        Ok(())
    }

    pub fn log_entry(&self) -> Option<&ChangeLogEntry> {
        self.log_entry.as_ref()
    }

    /// Publishes the staged state.
    ///
    /// # Returns
    /// The new committed state and the staged log entry
    pub fn commit(self) -> (Arc<AnnotationStore>, Option<ChangeLogEntry>) {
        let (state, entry, ()) = self.commit_with(|_, _| ());
        (state, entry)
    }

    /// Publishes the staged state, then runs `after` before the writer
    /// lock is released.
    ///
    /// Work done in `after` is ordered exactly like the commits themselves.
    pub fn commit_with<R, F>(mut self, after: F) -> (Arc<AnnotationStore>, Option<ChangeLogEntry>, R)
    where
        F: FnOnce(&Arc<AnnotationStore>, Option<&ChangeLogEntry>) -> R,
    {
        self.auto_abort = false;
        let state = Arc::new(std::mem::take(&mut self.staged));
        self.committed.store(Arc::clone(&state));
        let entry = self.log_entry.take();
        let result = after(&state, entry.as_ref());
        (state, entry, result)
    }

    /// Discards the staged state.
    pub fn abort(mut self) {
        self.auto_abort = false;
        tracing::debug!("Transaction aborted");
    }
}

impl Drop for StoreTransaction<'_> {
    fn drop(&mut self) {
        if self.auto_abort {
            tracing::debug!(
                staged_entry = self.log_entry.as_ref().map(|e| e.sequence),
                "Transaction dropped without commit, discarding staged changes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::FeatureStore;
    use collab_core::model::User;
    use collab_core::model::Role;
    use std::sync::Arc;

    #[test]
    fn test_commit_swaps_state() {
        let store = FeatureStore::default();
        let before = store.snapshot();
        let mut tx = store.begin();
        tx.staged_mut().upsert_user(User::new("alice", Role::Admin));
        let (committed, entry) = tx.commit();
        assert!(entry.is_none());
        assert!(committed.user("alice").is_some());
        assert!(store.snapshot().user("alice").is_some());
        assert!(before.user("alice").is_none());
    }

    #[test]
    fn test_commit_with_runs_under_writer_lock() {
        let store = FeatureStore::default();
        let mut tx = store.begin();
        tx.staged_mut().upsert_user(User::new("alice", Role::Admin));
        let (_, _, locked) = tx.commit_with(|state, entry| {
            assert!(state.user("alice").is_some());
            assert!(entry.is_none());
            store.try_begin().is_none()
        });
        assert!(locked);
        assert!(store.try_begin().is_some());
    }

    #[test]
    fn test_drop_discards_staged_state() {
        let store = FeatureStore::default();
        {
            let mut tx = store.begin();
            tx.staged_mut().upsert_user(User::new("alice", Role::Admin));
        }
        assert!(store.snapshot().user("alice").is_none());

        let tx = store.begin();
        tx.abort();
        assert!(store.snapshot().user("alice").is_none());
    }

    #[test]
    fn test_writers_serialize() {
        let store = Arc::new(FeatureStore::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut tx = store.begin();
                    tx.staged_mut()
                        .upsert_user(User::new(format!("user{}", i), Role::User));
                    tx.commit();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.snapshot().users().count(), 8);
    }
}
