//! Shared fixtures: an in-process relay and board helpers.

#![allow(dead_code)]

use std::time::Instant;

use inkboard_core::{
    BoardConfig, BoardController, ClientMessage, DrawingLog, InputEvent, LogEntry, MemoryLink,
    MemoryTransport, ParticipantId, RecordingSurface, ServerMessage, WireEvent,
};

pub type Board = BoardController<MemoryTransport, RecordingSurface>;

/// Relay scripted over memory links, keeping an authoritative log the way
/// the real server does.
pub struct Relay {
    log: DrawingLog,
    peers: Vec<Peer>,
}

struct Peer {
    link: MemoryLink,
    id: Option<ParticipantId>,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            log: DrawingLog::new("relay".into()),
            peers: Vec::new(),
        }
    }

    pub fn attach(&mut self, link: MemoryLink) {
        self.peers.push(Peer { link, id: None });
    }

    pub fn log(&self) -> &DrawingLog {
        &self.log
    }

    /// Handle everything the clients sent since the last call.
    pub fn serve(&mut self) {
        for index in 0..self.peers.len() {
            for msg in self.peers[index].link.take_client_messages() {
                self.handle(index, msg);
            }
        }
    }

    fn handle(&mut self, index: usize, msg: ClientMessage) {
        match msg {
            ClientMessage::Join { room, participant } => {
                let id = participant.unwrap_or_else(|| ParticipantId::new(format!("peer-{}", index)));
                self.peers[index].id = Some(id.clone());
                let peer_count = self.peers.iter().filter(|p| p.id.is_some()).count();
                self.send(index, &ServerMessage::Joined { room, participant_id: id.clone(), peer_count });
                self.broadcast(index, &ServerMessage::PeerJoined { participant_id: id });
            }
            ClientMessage::Leave => {
                self.peers[index].id = None;
            }
            ClientMessage::Publish { event } => {
                let Ok(entry) = LogEntry::try_from(event.clone()) else {
                    return;
                };
                if let Ok(appended) = self.log.append_remote(entry) {
                    if appended.is_inserted() {
                        let from = event.participant_id.clone();
                        self.broadcast(index, &ServerMessage::Event { from, event });
                    }
                }
            }
            ClientMessage::Resync { since } => {
                let events = self.log.events_since(&since).iter().map(WireEvent::from).collect();
                let clocks = self.log.clocks().clone();
                self.send(index, &ServerMessage::ResyncBatch { events, clocks });
            }
        }
    }

    fn send(&self, index: usize, msg: &ServerMessage) {
        self.peers[index].link.deliver_message(msg).unwrap();
    }

    fn broadcast(&self, sender: usize, msg: &ServerMessage) {
        for (index, peer) in self.peers.iter().enumerate() {
            if index != sender && peer.id.is_some() && peer.link.is_up() {
                self.send(index, msg);
            }
        }
    }
}

pub fn board(name: &str, config: BoardConfig) -> (Board, MemoryLink) {
    let (transport, link) = MemoryTransport::pair();
    let board = BoardController::new(name.into(), transport, RecordingSurface::new(), config);
    (board, link)
}

/// Draw a vertical three-point stroke at `x`.
pub fn draw_stroke(board: &mut Board, x: f64, now: Instant) {
    board.handle_input(&InputEvent::start(x, 0.0, 0), now).unwrap();
    board.handle_input(&InputEvent::moved(x, 10.0, 1), now).unwrap();
    board.handle_input(&InputEvent::end(x, 20.0, 2), now).unwrap();
}

/// Alternate relay turns and board pumps until traffic settles.
pub fn settle(relay: &mut Relay, boards: &mut [&mut Board], now: Instant) {
    for _ in 0..8 {
        for board in boards.iter_mut() {
            board.pump(now);
        }
        relay.serve();
    }
    for board in boards.iter_mut() {
        board.pump(now);
    }
}

/// Render a log from scratch onto a fresh surface.
pub fn replay(log: &DrawingLog) -> RecordingSurface {
    use inkboard_core::{DrawPrimitive, RenderSurface};

    let mut surface = RecordingSurface::new();
    for entry in log.replay_from(0) {
        surface.draw(&DrawPrimitive::from_entry(entry));
    }
    surface
}
