//! In-memory index of committed change log entries.

use chrono::{DateTime, Utc};
use collab_core::{ChangeFilter, ChangeLogEntry};
use parking_lot::RwLock;
use uuid::Uuid;

/// Committed entries in commit order.
#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: RwLock<Vec<ChangeLogEntry>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ChangeLogEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn append(&self, entry: ChangeLogEntry) {
        self.entries.write().push(entry);
    }

    pub fn get(&self, id: Uuid) -> Option<ChangeLogEntry> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn last(&self) -> Option<ChangeLogEntry> {
        self.entries.read().last().cloned()
    }

    /// Commit timestamp for a new entry: `now`, but never earlier than the
    /// last committed entry, so commit order and `createdAt` order agree.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.entries.read().last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        }
    }

    /// Entries matching the filter, newest first.
    pub fn find(&self, filter: &ChangeFilter) -> Vec<ChangeLogEntry> {
        let mut found: Vec<ChangeLogEntry> = self
            .entries
            .read()
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });
        found
    }

    /// Entries with `createdAt >= since`, oldest first.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<ChangeLogEntry> {
        let mut found: Vec<ChangeLogEntry> = self
            .entries
            .read()
            .iter()
            .filter(|entry| entry.created_at >= since)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        found
    }
}
