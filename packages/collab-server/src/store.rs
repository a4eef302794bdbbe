//! Shared feature store with copy-on-write commits.

use std::sync::Arc;

use arc_swap::ArcSwap;
use collab_core::AnnotationStore;
use parking_lot::Mutex;

use crate::transaction::StoreTransaction;

/// Authoritative annotation state.
///
/// Readers get the last committed snapshot without locking. Writers
/// serialize on a mutex, stage a full copy, and swap it in on commit.
pub struct FeatureStore {
    committed: ArcSwap<AnnotationStore>,
    writer: Mutex<()>,
}

impl FeatureStore {
    pub fn new(initial: AnnotationStore) -> Self {
        Self {
            committed: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
        }
    }

    /// Last committed state.
    pub fn snapshot(&self) -> Arc<AnnotationStore> {
        self.committed.load_full()
    }

    /// Opens a transaction. Blocks while another transaction is open.
    pub fn begin(&self) -> StoreTransaction<'_> {
        let guard = self.writer.lock();
        let staged = AnnotationStore::clone(&self.committed.load());
        StoreTransaction::new(guard, staged, &self.committed)
    }

    /// Runs `f` on the committed state with the writer lock held, so no
    /// commit lands while it runs.
    pub fn with_committed<R>(&self, f: impl FnOnce(&Arc<AnnotationStore>) -> R) -> R {
        let _writer = self.writer.lock();
        f(&self.committed.load_full())
    }

    /// Opens a transaction unless another one is already open.
    pub fn try_begin(&self) -> Option<StoreTransaction<'_>> {
        let guard = self.writer.try_lock()?;
        let staged = AnnotationStore::clone(&self.committed.load());
        Some(StoreTransaction::new(guard, staged, &self.committed))
    }
}

impl Default for FeatureStore {
    fn default() -> Self {
        Self::new(AnnotationStore::new())
    }
}
