//! Client session configuration.

use std::time::Duration;

/// Tuning for one client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Replay attempts before giving up
    pub replay_max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub replay_initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts
    pub replay_max_backoff_ms: u64,
    /// How long to wait for each replayed message
    pub replay_message_timeout_ms: u64,
    /// Undo the optimistic local apply when the backend rejects a change
    pub rollback_on_reject: bool,
    /// How many recent change sequences are remembered for deduplication
    pub seen_sequence_window: usize,
    /// Buffer of the store event channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            replay_max_attempts: 5,
            replay_initial_backoff_ms: 200,
            replay_max_backoff_ms: 5_000,
            replay_message_timeout_ms: 2_000,
            rollback_on_reject: true,
            seen_sequence_window: 1_024,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let millis = self
            .replay_initial_backoff_ms
            .saturating_mul(factor)
            .min(self.replay_max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_message_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ClientConfig {
            replay_initial_backoff_ms: 100,
            replay_max_backoff_ms: 500,
            ..Default::default()
        };
        let delays: Vec<u64> = (1..=5).map(|a| config.backoff(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(config.backoff(80).as_millis(), 500);
    }
}
