//! Broadcast channels and the message envelope published on them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the channel every client listens on.
pub const COMMON_CHANNEL: &str = "COMMON";

const EPHEMERAL_PREFIX: &str = "tmp_";

/// A named broadcast scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Assembly-scope events, delivered to everyone
    Common,
    /// Per-feature events on one refSeq of one assembly
    RefSeq {
        assembly_id: String,
        ref_seq_name: String,
    },
    /// Short-lived channel for streaming a replay to one client
    Ephemeral(String),
}

impl Channel {
    pub fn ref_seq(assembly_id: impl Into<String>, ref_seq_name: impl Into<String>) -> Self {
        Channel::RefSeq {
            assembly_id: assembly_id.into(),
            ref_seq_name: ref_seq_name.into(),
        }
    }

    /// Fresh, uniquely named replay channel.
    pub fn ephemeral() -> Self {
        Channel::Ephemeral(format!("{}{}", EPHEMERAL_PREFIX, Uuid::new_v4().simple()))
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Channel::Ephemeral(_))
    }

    /// Wire name of the channel.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Common => f.write_str(COMMON_CHANNEL),
            Channel::RefSeq {
                assembly_id,
                ref_seq_name,
            } => write!(f, "{}-{}", assembly_id, ref_seq_name),
            Channel::Ephemeral(name) => f.write_str(name),
        }
    }
}

/// Envelope carrying one committed change to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Serialized change, decoded by receivers through their registry
    pub change_info: serde_json::Value,
    pub channel: String,
    pub user_name: String,
    /// Session token of the submitter, empty for replayed entries
    pub user_token: String,
    /// Commit time of the change
    pub timestamp: DateTime<Utc>,
    pub change_sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Common.name(), "COMMON");
        assert_eq!(Channel::ref_seq("A1", "chr1").name(), "A1-chr1");

        let tmp = Channel::ephemeral();
        assert!(tmp.is_ephemeral());
        assert!(tmp.name().starts_with("tmp_"));
        assert_ne!(tmp, Channel::ephemeral());
    }

    #[test]
    fn test_envelope_wire_fields() {
        let message = Message {
            change_info: serde_json::json!({"typeName": "AddFeatureChange"}),
            channel: "A1-chr1".into(),
            user_name: "alice".into(),
            user_token: "t-1".into(),
            timestamp: Utc::now(),
            change_sequence: 7,
        };
        let value = serde_json::to_value(&message).unwrap();
        for field in ["changeInfo", "channel", "userName", "userToken", "timestamp", "changeSequence"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
    }
}
