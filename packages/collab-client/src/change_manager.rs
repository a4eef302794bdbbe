//! Optimistic local apply, backend submission and remote change intake.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use collab_core::{Change, ChangeBackend, ChangeLogEntry, ChangeRegistry, Message};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::data_store::ClientDataStore;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Forward to the backend after applying locally. `false` for changes
    /// that were already committed elsewhere.
    pub submit_to_backend: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            submit_to_backend: true,
        }
    }
}

impl SubmitOptions {
    pub fn local_only() -> Self {
        Self {
            submit_to_backend: false,
        }
    }
}

/// What happened to an incoming broadcast or replay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Applied,
    /// Our own change coming back
    SkippedEcho,
    /// Sequence already processed
    SkippedDuplicate,
    /// Concerns an assembly this client has not loaded
    SkippedUntracked,
}

/// Notices for the user of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    RemoteChangeApplied {
        user_name: String,
        type_name: String,
        sequence: u64,
    },
    ChangeRejected {
        type_name: String,
        message: String,
    },
    Disconnected,
    Reconnected {
        replayed: usize,
    },
    ReplayFailed {
        error: String,
    },
}

/// Bounded memory of processed change sequences.
#[derive(Debug)]
struct SeenSequences {
    window: usize,
    order: VecDeque<u64>,
    set: HashSet<u64>,
}

impl SeenSequences {
    fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    fn contains(&self, sequence: u64) -> bool {
        self.set.contains(&sequence)
    }

    fn insert(&mut self, sequence: u64) {
        if !self.set.insert(sequence) {
            return;
        }
        self.order.push_back(sequence);
        while self.order.len() > self.window {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }
}

/// Applies changes to the local mirror and keeps it in step with the server.
pub struct ChangeManager {
    config: ClientConfig,
    registry: Arc<ChangeRegistry>,
    data_store: ClientDataStore,
    backend: Option<Arc<dyn ChangeBackend>>,
    token: String,
    last_timestamp: Option<DateTime<Utc>>,
    seen: SeenSequences,
    notices: broadcast::Sender<SessionEvent>,
}

impl ChangeManager {
    pub fn new(
        config: ClientConfig,
        registry: Arc<ChangeRegistry>,
        backend: Option<Arc<dyn ChangeBackend>>,
    ) -> Self {
        let (notices, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            data_store: ClientDataStore::new(config.event_capacity),
            seen: SeenSequences::new(config.seen_sequence_window),
            token: Uuid::new_v4().to_string(),
            last_timestamp: None,
            config,
            registry,
            backend,
            notices,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session token sent with every submission.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn backend(&self) -> Option<&Arc<dyn ChangeBackend>> {
        self.backend.as_ref()
    }

    pub fn data_store(&self) -> &ClientDataStore {
        &self.data_store
    }

    pub fn data_store_mut(&mut self) -> &mut ClientDataStore {
        &mut self.data_store
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionEvent> {
        self.notices.subscribe()
    }

    pub(crate) fn notify(&self, event: SessionEvent) {
        let _ = self.notices.send(event);
    }

    /// Timestamp of the last change this client processed.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Moves the replay checkpoint forward; never moves it back.
    pub fn observe_timestamp(&mut self, timestamp: DateTime<Utc>) {
        if self.last_timestamp.map_or(true, |last| timestamp > last) {
            self.last_timestamp = Some(timestamp);
        }
    }

    /// Applies `change` locally and, if requested, submits it to the backend.
    ///
    /// A local failure leaves the mirror untouched and nothing is sent. On
    /// backend rejection the local apply is undone when
    /// `rollback_on_reject` is set, and the error is returned.
    pub async fn submit(
        &mut self,
        mut change: Change,
        options: SubmitOptions,
    ) -> Result<Option<ChangeLogEntry>> {
        let backend = if options.submit_to_backend {
            Some(self.backend.clone().ok_or(ClientError::NoBackend)?)
        } else {
            None
        };
        let payload = change.to_json()?;
        self.data_store.apply(&mut change)?;

        let Some(backend) = backend else {
            return Ok(None);
        };
        match backend.submit_change(payload, &self.token).await {
            Ok(entry) => {
                self.seen.insert(entry.sequence);
                self.observe_timestamp(entry.created_at);
                debug!(sequence = entry.sequence, "Change accepted");
                Ok(Some(entry))
            }
            Err(err) => {
                warn!(type_name = %change.type_name(), error = %err, "Change rejected by backend");
                self.notify(SessionEvent::ChangeRejected {
                    type_name: change.type_name().to_string(),
                    message: err.to_string(),
                });
                if self.config.rollback_on_reject {
                    self.roll_back(&change);
                }
                Err(err.into())
            }
        }
    }

    fn roll_back(&mut self, change: &Change) {
        match change.inverse() {
            Ok(mut inverse) => {
                if let Err(e) = self.data_store.apply(&mut inverse) {
                    error!(error = %e, "Rolling back rejected change failed");
                }
            }
            Err(e) => error!(error = %e, "Rejected change has no inverse"),
        }
    }

    /// Handles a message received from a broadcast or replay channel.
    pub fn handle_message(&mut self, message: Message) -> Result<MessageOutcome> {
        if !message.user_token.is_empty() && message.user_token == self.token {
            self.seen.insert(message.change_sequence);
            self.observe_timestamp(message.timestamp);
            return Ok(MessageOutcome::SkippedEcho);
        }
        if self.seen.contains(message.change_sequence) {
            return Ok(MessageOutcome::SkippedDuplicate);
        }

        let mut change = self.registry.from_json(&message.change_info)?;
        if !self.data_store.is_tracking(&change) {
            debug!(
                sequence = message.change_sequence,
                assembly = ?change.assembly_id(),
                "Skipping change for an assembly that is not loaded"
            );
            self.seen.insert(message.change_sequence);
            self.observe_timestamp(message.timestamp);
            return Ok(MessageOutcome::SkippedUntracked);
        }

        self.data_store.apply(&mut change)?;
        self.seen.insert(message.change_sequence);
        self.observe_timestamp(message.timestamp);
        info!(
            user = %message.user_name,
            type_name = %change.type_name(),
            sequence = message.change_sequence,
            "Applied remote change"
        );
        self.notify(SessionEvent::RemoteChangeApplied {
            user_name: message.user_name,
            type_name: change.type_name().to_string(),
            sequence: message.change_sequence,
        });
        Ok(MessageOutcome::Applied)
    }
}
