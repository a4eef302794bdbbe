//! Maps committed changes to broadcast channels and envelopes.

use collab_core::{Change, ChangeLogEntry, Channel, Message, Result, RouteTarget};

/// Channel for a committed change, given its resolved route target.
///
/// `None` means the change is not broadcast.
pub fn route_channel(target: &RouteTarget) -> Option<Channel> {
    match target {
        RouteTarget::Common => Some(Channel::Common),
        RouteTarget::RefSeq {
            assembly_id,
            ref_seq_name,
        } => Some(Channel::ref_seq(assembly_id, ref_seq_name)),
        RouteTarget::Unrouted => None,
    }
}

/// Builds the envelope published for a committed change.
///
/// The payload is the change's broadcast form, so copies arrive as adds.
pub fn envelope(
    change: &Change,
    channel: &Channel,
    entry: &ChangeLogEntry,
    user_token: &str,
) -> Result<Message> {
    Ok(Message {
        change_info: change.broadcast_form().to_json()?,
        channel: channel.name(),
        user_name: entry.user.clone(),
        user_token: user_token.to_string(),
        timestamp: entry.created_at,
        change_sequence: entry.sequence,
    })
}
