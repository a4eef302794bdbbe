//! Publish/subscribe transport between the authoritative side and clients.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::message::Message;

/// Fire-and-forget pub/sub keyed by channel name.
pub trait MessageBus: Send + Sync {
    /// Publishes a message; returns how many subscribers it reached.
    fn publish(&self, channel: &str, message: Message) -> usize;

    fn subscribe(&self, channel: &str) -> Subscription;

    /// Forgets a channel. Existing subscribers see it as closed.
    fn close(&self, channel: &str);
}

/// Receiving end of one channel.
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<Message>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: broadcast::Receiver<Message>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next message. Returns `None` once the channel is closed.
    ///
    /// Messages dropped because this subscriber fell behind are logged and
    /// skipped; replay is the recovery path for them.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, messages dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// In-process bus with one tokio broadcast channel per name.
pub struct InMemoryBus {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Message>>>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Message> {
        if let Some(sender) = self.channels.read().get(channel) {
            return sender.clone();
        }
        self.channels
            .write()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, channel: &str, message: Message) -> usize {
        let sender = match self.channels.read().get(channel) {
            Some(sender) => sender.clone(),
            None => {
                debug!(channel, "No subscribers, message dropped");
                return 0;
            }
        };
        sender.send(message).unwrap_or(0)
    }

    fn subscribe(&self, channel: &str) -> Subscription {
        Subscription::new(channel, self.sender(channel).subscribe())
    }

    fn close(&self, channel: &str) {
        if self.channels.write().remove(channel).is_some() {
            debug!(channel, "Channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ntest::timeout;

    fn message(sequence: u64) -> Message {
        Message {
            change_info: serde_json::json!({}),
            channel: "A1-chr1".into(),
            user_name: "alice".into(),
            user_token: String::new(),
            timestamp: Utc::now(),
            change_sequence: sequence,
        }
    }

    #[tokio::test]
    #[timeout(1000)]
    async fn test_publish_reaches_every_subscriber_in_order() {
        let bus = InMemoryBus::new(16);
        let mut first = bus.subscribe("A1-chr1");
        let mut second = bus.subscribe("A1-chr1");
        let mut other = bus.subscribe("A1-chr2");

        assert_eq!(bus.publish("A1-chr1", message(1)), 2);
        assert_eq!(bus.publish("A1-chr1", message(2)), 2);

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await.unwrap().change_sequence, 1);
            assert_eq!(sub.recv().await.unwrap().change_sequence, 2);
        }
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = InMemoryBus::new(4);
        assert_eq!(bus.publish("COMMON", message(1)), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    #[timeout(1000)]
    async fn test_close_forgets_channel_and_ends_subscribers() {
        let bus = InMemoryBus::new(4);
        let mut sub = bus.subscribe("tmp_1");
        assert_eq!(bus.channel_count(), 1);

        bus.close("tmp_1");
        assert_eq!(bus.channel_count(), 0);
        assert!(sub.recv().await.is_none());
        assert_eq!(bus.publish("tmp_1", message(1)), 0);
    }
}
