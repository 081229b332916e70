//! Per-connection protocol handling.

use inkboard_core::{ClientMessage, ParticipantId, ServerMessage};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::state::{AppState, RoomMessage};

/// Room membership of one WebSocket connection.
#[derive(Default)]
pub struct Session {
    participant: Option<ParticipantId>,
    room: Option<String>,
    feed: Option<broadcast::Receiver<RoomMessage>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participant(&self) -> Option<&ParticipantId> {
        self.participant.as_ref()
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Apply one client message. Returns the replies for this client.
    pub fn handle(&mut self, state: &AppState, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Join { room, participant } => {
                self.leave(state);
                let participant = participant
                    .or_else(|| self.participant.clone())
                    .unwrap_or_else(ParticipantId::random);
                let (feed, peer_count) = state.join_room(&room, &participant);
                state.broadcast(&room, &participant, ServerMessage::PeerJoined {
                    participant_id: participant.clone(),
                });
                info!("Peer {} joined room {}", participant, room);

                self.feed = Some(feed);
                self.room = Some(room.clone());
                self.participant = Some(participant.clone());
                vec![ServerMessage::Joined {
                    room,
                    participant_id: participant,
                    peer_count,
                }]
            }
            ClientMessage::Leave => {
                self.leave(state);
                Vec::new()
            }
            ClientMessage::Publish { event } => {
                let (Some(room), Some(participant)) = (&self.room, &self.participant) else {
                    return vec![not_in_room()];
                };
                match state.publish(room, participant, event) {
                    Ok(_) => Vec::new(),
                    Err(e) => {
                        warn!("Rejected event from {}: {}", participant, e);
                        vec![ServerMessage::Error { message: e.to_string() }]
                    }
                }
            }
            ClientMessage::Resync { since } => match &self.room {
                Some(room) => vec![state.resync(room, &since)],
                None => vec![not_in_room()],
            },
        }
    }

    /// Leave the current room, if any.
    pub fn leave(&mut self, state: &AppState) {
        self.feed = None;
        let (Some(room), Some(participant)) = (self.room.take(), &self.participant) else {
            return;
        };
        state.leave_room(&room, participant);
        state.broadcast(&room, participant, ServerMessage::PeerLeft {
            participant_id: participant.clone(),
        });
        info!("Peer {} left room {}", participant, room);
    }

    /// Next message relayed from the room, skipping this participant's own.
    /// Pends forever outside a room.
    pub async fn next_relayed(&mut self) -> Result<ServerMessage, RecvError> {
        let Some(feed) = self.feed.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            let (from, msg) = feed.recv().await?;
            if Some(&from) != self.participant.as_ref() {
                return Ok(msg);
            }
        }
    }
}

fn not_in_room() -> ServerMessage {
    ServerMessage::Error {
        message: "Not in a room".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_core::{BoardEvent, ClearEvent, ClockVector, LogEntry, Stamp, WireEvent};

    fn join(session: &mut Session, state: &AppState, participant: Option<&str>) -> ServerMessage {
        let replies = session.handle(state, ClientMessage::Join {
            room: "room".to_string(),
            participant: participant.map(ParticipantId::new),
        });
        replies.into_iter().next().unwrap()
    }

    fn clear_event(participant: &str, clock: u64) -> WireEvent {
        WireEvent::from(&LogEntry::new(
            Stamp::new(clock, participant.into()),
            BoardEvent::Clear(ClearEvent { origin: participant.into(), timestamp_ms: None }),
        ))
    }

    #[test]
    fn test_join_honors_requested_id() {
        let state = AppState::new(16);
        let mut session = Session::new();
        let reply = join(&mut session, &state, Some("alice"));
        assert_eq!(
            reply,
            ServerMessage::Joined {
                room: "room".to_string(),
                participant_id: "alice".into(),
                peer_count: 1,
            }
        );

        let mut anonymous = Session::new();
        let ServerMessage::Joined { participant_id, peer_count, .. } = join(&mut anonymous, &state, None) else {
            panic!("expected joined");
        };
        assert_eq!(peer_count, 2);
        assert_ne!(participant_id, ParticipantId::new("alice"));
        // Rejoining keeps the assigned id.
        join(&mut anonymous, &state, None);
        assert_eq!(anonymous.participant(), Some(&participant_id));
    }

    #[test]
    fn test_requires_room() {
        let state = AppState::new(16);
        let mut session = Session::new();
        let replies = session.handle(&state, ClientMessage::Publish { event: clear_event("alice", 1) });
        assert!(matches!(replies.as_slice(), [ServerMessage::Error { .. }]));
        let replies = session.handle(&state, ClientMessage::Resync { since: ClockVector::new() });
        assert!(matches!(replies.as_slice(), [ServerMessage::Error { .. }]));
    }

    #[test]
    fn test_conflict_reported_to_sender() {
        let state = AppState::new(16);
        let mut session = Session::new();
        join(&mut session, &state, Some("alice"));
        assert!(session.handle(&state, ClientMessage::Publish { event: clear_event("alice", 3) }).is_empty());
        let replies = session.handle(&state, ClientMessage::Publish { event: clear_event("alice", 2) });
        assert!(matches!(replies.as_slice(), [ServerMessage::Error { .. }]));
    }

    #[tokio::test]
    async fn test_relays_to_others_only() {
        let state = AppState::new(16);
        let mut alice = Session::new();
        let mut bob = Session::new();
        join(&mut alice, &state, Some("alice"));
        join(&mut bob, &state, Some("bob"));

        assert_eq!(
            alice.next_relayed().await.unwrap(),
            ServerMessage::PeerJoined { participant_id: "bob".into() }
        );

        alice.handle(&state, ClientMessage::Publish { event: clear_event("alice", 1) });
        let relayed = bob.next_relayed().await.unwrap();
        assert!(matches!(relayed, ServerMessage::Event { ref from, .. } if from.as_str() == "alice"));

        bob.leave(&state);
        assert_eq!(
            alice.next_relayed().await.unwrap(),
            ServerMessage::PeerLeft { participant_id: "bob".into() }
        );
    }
}
