//! Messages exchanged with the relay server.

use serde::{Deserialize, Serialize};

use crate::drawing_log::ClockVector;
use crate::stroke::ParticipantId;
use crate::wire::WireEvent;

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, optionally asking to keep a previously assigned id
    Join {
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant: Option<ParticipantId>,
    },
    /// Leave current room
    Leave,
    /// Publish a board event to the room
    Publish { event: WireEvent },
    /// Ask for every event after the given per-participant clocks
    Resync { since: ClockVector },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join and the participant id to use
    Joined {
        room: String,
        participant_id: ParticipantId,
        peer_count: usize,
    },
    /// Peer joined the room
    PeerJoined { participant_id: ParticipantId },
    /// Peer left the room
    PeerLeft { participant_id: ParticipantId },
    /// Board event published by another peer
    Event { from: ParticipantId, event: WireEvent },
    /// Reply to a resync request
    ResyncBatch {
        events: Vec<WireEvent>,
        /// The server's clocks after the batch, so the client can upload
        /// whatever the server is missing.
        clocks: ClockVector,
    },
    /// Error message
    Error { message: String },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}
