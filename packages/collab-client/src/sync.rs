//! Broadcast intake and reconnect replay for a client session.

use std::collections::HashMap;
use std::sync::Arc;

use collab_core::model::AssemblySnapshot;
use collab_core::{
    Change, ChangeBackend, ChangeLogEntry, ChangeRegistry, Channel, Message, MessageBus,
    Subscription, COMMON_CHANNEL,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::change_manager::{ChangeManager, MessageOutcome, SessionEvent, SubmitOptions};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Reconnect recovery: fetch server time, open a replay channel, request
/// replay and apply what arrives.
#[derive(Debug, Clone)]
pub struct ReplaySync {
    config: ClientConfig,
}

impl ReplaySync {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Replays everything committed since the manager's last timestamp.
    ///
    /// Returns the number of replayed messages. Without a timestamp nothing
    /// is requested. Failed attempts are retried with exponential backoff up
    /// to `replay_max_attempts`.
    pub async fn recover(&self, manager: &mut ChangeManager, bus: &dyn MessageBus) -> Result<usize> {
        let Some(since) = manager.last_timestamp() else {
            debug!("No checkpoint, skipping replay");
            return Ok(0);
        };
        let backend = manager.backend().cloned().ok_or(ClientError::NoBackend)?;

        let max_attempts = self.config.replay_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(manager, backend.as_ref(), bus, since).await {
                Ok(received) => return Ok(received),
                Err(e) if attempt >= max_attempts => {
                    error!(attempts = attempt, error = %e, "Replay failed");
                    let failed = ClientError::ReplayFailed {
                        attempts: attempt,
                        last_error: e.to_string(),
                    };
                    manager.notify(SessionEvent::ReplayFailed {
                        error: failed.to_string(),
                    });
                    return Err(failed);
                }
                Err(e) => {
                    let delay = self.config.backoff(attempt);
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Replay attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        manager: &mut ChangeManager,
        backend: &dyn ChangeBackend,
        bus: &dyn MessageBus,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<usize> {
        let server_now = backend.server_time().await?;
        let channel = Channel::ephemeral().name();
        let subscription = bus.subscribe(&channel);
        let result = self
            .stream(manager, backend, subscription, &channel, since)
            .await;
        bus.close(&channel);
        let received = result?;

        manager.observe_timestamp(server_now);
        info!(%channel, replayed = received, "Replay complete");
        Ok(received)
    }

    /// Requests the replay on `channel` and applies every announced entry.
    async fn stream(
        &self,
        manager: &mut ChangeManager,
        backend: &dyn ChangeBackend,
        mut subscription: Subscription,
        channel: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<usize> {
        let ack = backend.request_replay(since, channel).await?;
        debug!(%channel, expected = ack.entries, %since, "Replay requested");

        let mut received = 0;
        while received < ack.entries {
            let message = match tokio::time::timeout(self.config.message_timeout(), subscription.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => return Err(ClientError::ReplayInterrupted(channel.to_string())),
                Err(_) => {
                    return Err(ClientError::ReplayTimeout {
                        channel: channel.to_string(),
                        received,
                        expected: ack.entries,
                    })
                }
            };
            received += 1;
            let sequence = message.change_sequence;
            if let Err(e) = manager.handle_message(message) {
                warn!(sequence, error = %e, "Replayed change could not be applied");
            }
        }
        Ok(received)
    }
}

/// A connected client: change manager plus the channels it listens to.
///
/// Messages from every subscribed channel are funnelled into one inbox and
/// processed one at a time, so each apply is atomic with respect to the
/// others.
pub struct ClientSession {
    manager: ChangeManager,
    bus: Arc<dyn MessageBus>,
    replay: ReplaySync,
    inbox_tx: mpsc::UnboundedSender<Message>,
    inbox: mpsc::UnboundedReceiver<Message>,
    channels: Vec<String>,
    forwarders: HashMap<String, JoinHandle<()>>,
}

impl ClientSession {
    /// Opens a session subscribed to the common channel. Must be called
    /// inside a tokio runtime.
    pub fn open(
        config: ClientConfig,
        registry: Arc<ChangeRegistry>,
        backend: Option<Arc<dyn ChangeBackend>>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let mut session = Self {
            replay: ReplaySync::new(config.clone()),
            manager: ChangeManager::new(config, registry, backend),
            bus,
            inbox_tx,
            inbox,
            channels: Vec::new(),
            forwarders: HashMap::new(),
        };
        session.listen(COMMON_CHANNEL);
        session
    }

    pub fn manager(&self) -> &ChangeManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ChangeManager {
        &mut self.manager
    }

    pub fn token(&self) -> &str {
        self.manager.token()
    }

    /// Channels this session listens to, in subscription order.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn is_connected(&self) -> bool {
        !self.forwarders.is_empty()
    }

    /// Loads an assembly into the mirror and listens to all of its refSeqs.
    pub fn load_assembly(&mut self, snapshot: &AssemblySnapshot) -> Result<()> {
        self.manager.data_store_mut().load_assembly(snapshot)?;
        for ref_seq in &snapshot.ref_seqs {
            self.open_ref_seq(&snapshot.id, &ref_seq.name);
        }
        Ok(())
    }

    /// Starts listening to the channel of one refSeq.
    pub fn open_ref_seq(&mut self, assembly_id: &str, ref_seq_name: &str) {
        self.listen(&Channel::ref_seq(assembly_id, ref_seq_name).name());
    }

    fn listen(&mut self, channel: &str) {
        if !self.channels.iter().any(|c| c == channel) {
            self.channels.push(channel.to_string());
        }
        if !self.forwarders.contains_key(channel) {
            let handle = self.spawn_forwarder(channel);
            self.forwarders.insert(channel.to_string(), handle);
        }
    }

    fn spawn_forwarder(&self, channel: &str) -> JoinHandle<()> {
        let mut subscription = self.bus.subscribe(channel);
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                if inbox.send(message).is_err() {
                    break;
                }
            }
            debug!(channel = %subscription.channel(), "Forwarder stopped");
        })
    }

    /// Applies a change locally and submits it to the backend.
    pub async fn submit(&mut self, change: Change) -> Result<Option<ChangeLogEntry>> {
        self.manager.submit(change, SubmitOptions::default()).await
    }

    /// Waits for the next incoming message and handles it.
    ///
    /// Returns `None` if the inbox is closed.
    pub async fn process_next(&mut self) -> Option<Result<MessageOutcome>> {
        let message = self.inbox.recv().await?;
        Some(self.manager.handle_message(message))
    }

    /// Handles every message already queued; returns how many were applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.inbox.try_recv() {
            let sequence = message.change_sequence;
            match self.manager.handle_message(message) {
                Ok(MessageOutcome::Applied) => applied += 1,
                Ok(_) => {}
                Err(e) => warn!(sequence, error = %e, "Incoming change could not be applied"),
            }
        }
        applied
    }

    /// Drops every subscription, as when the transport goes away.
    pub fn mark_disconnected(&mut self) {
        for (_, handle) in self.forwarders.drain() {
            handle.abort();
        }
        info!(token = %self.manager.token(), "Session disconnected");
        self.manager.notify(SessionEvent::Disconnected);
    }

    /// Re-subscribes to every known channel, then replays what was missed.
    pub async fn reconnect(&mut self) -> Result<usize> {
        for channel in self.channels.clone() {
            self.listen(&channel);
        }
        let replayed = self.replay.recover(&mut self.manager, self.bus.as_ref()).await?;
        info!(replayed, "Session reconnected");
        self.manager.notify(SessionEvent::Reconnected { replayed });
        Ok(replayed)
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        for (_, handle) in self.forwarders.drain() {
            handle.abort();
        }
    }
}
