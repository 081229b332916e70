//! Room registry and per-room authoritative logs.

use std::collections::HashMap;

use dashmap::DashMap;
use inkboard_core::{Appended, BoardError, ClockVector, DrawingLog, LogEntry, ParticipantId, ServerMessage, WireEvent};
use tokio::sync::broadcast;

/// A message fanned out to a room, tagged with its sender.
pub type RoomMessage = (ParticipantId, ServerMessage);

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<RoomMessage>,
    /// Connected participants, with their connection count. A participant
    /// reconnecting may briefly hold two connections.
    peers: HashMap<ParticipantId, usize>,
    /// Every event published to the room
    log: DrawingLog,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashMap::new(),
            log: DrawingLog::new(ParticipantId::new("relay")),
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Active rooms
    rooms: DashMap<String, Room>,
    channel_capacity: usize,
}

impl AppState {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            channel_capacity,
        }
    }

    /// Add a participant to a room. Returns the room feed and the number of
    /// distinct participants present.
    pub fn join_room(&self, room_id: &str, participant: &ParticipantId) -> (broadcast::Receiver<RoomMessage>, usize) {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(self.channel_capacity));
        *room.peers.entry(participant.clone()).or_insert(0) += 1;
        (room.tx.subscribe(), room.peers.len())
    }

    /// Remove one connection of `participant`. Empty rooms are dropped
    /// together with their history; returning clients re-upload it on resync.
    pub fn leave_room(&self, room_id: &str, participant: &ParticipantId) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if let Some(count) = room.peers.get_mut(participant) {
            *count -= 1;
            if *count == 0 {
                room.peers.remove(participant);
            }
        }
        if room.peers.is_empty() {
            drop(room);
            self.rooms.remove(room_id);
        }
    }

    /// Record a published event and relay it to the rest of the room.
    ///
    /// Re-deliveries are acknowledged but not relayed again.
    pub fn publish(&self, room_id: &str, from: &ParticipantId, event: WireEvent) -> Result<Appended, BoardError> {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return Err(BoardError::InvalidState(format!("room {} does not exist", room_id)));
        };
        let entry = LogEntry::try_from(event.clone())?;
        let appended = room.log.append_remote(entry)?;
        if appended.is_inserted() {
            let msg = ServerMessage::Event { from: from.clone(), event };
            let _ = room.tx.send((from.clone(), msg));
        }
        Ok(appended)
    }

    /// Events after `since`, plus the room's clocks.
    pub fn resync(&self, room_id: &str, since: &ClockVector) -> ServerMessage {
        match self.rooms.get(room_id) {
            Some(room) => ServerMessage::ResyncBatch {
                events: room.log.events_since(since).iter().map(WireEvent::from).collect(),
                clocks: room.log.clocks().clone(),
            },
            None => ServerMessage::ResyncBatch {
                events: Vec::new(),
                clocks: ClockVector::new(),
            },
        }
    }

    /// Broadcast message to room
    pub fn broadcast(&self, room_id: &str, from: &ParticipantId, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.clone(), msg));
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self) -> usize {
        self.rooms.iter().map(|room| room.peers.len()).sum()
    }

    /// Number of events held for `room_id`.
    pub fn history_len(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.log.len())
    }
}
