//! Board controller: input to strokes, strokes to the log, the log to the
//! render surface and the network.

use std::collections::BTreeSet;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Instant, SystemTime, UNIX_EPOCH};
#[cfg(target_arch = "wasm32")]
use web_time::{Instant, SystemTime, UNIX_EPOCH};

use crate::channel::{Incoming, SyncChannel};
use crate::config::BoardConfig;
use crate::drawing_log::{Appended, BoardEvent, ClearEvent, ClockVector, DrawingLog, LogEntry};
use crate::error::{BoardError, BoardResult};
use crate::input::{InputEvent, PointerPhase};
use crate::protocol::ConnectionState;
use crate::render::{DrawPrimitive, RenderSurface};
use crate::stroke::{ParticipantId, Point, Rgb, StrokeHandle, StrokeModel, Tool};
use crate::transport::Transport;

/// State of the local drawing gesture.
///
/// Sealing happens inside the pointer-up handler, so a gesture is only
/// ever observed idle or active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Active(StrokeHandle),
}

/// Progress of reconciling the local log with the relay's history.
///
/// Outside [`ResyncState::Settled`] local events stay in the log only and
/// live events are held back. The resync reply fixes the relay's clocks,
/// after which everything it lacks is uploaded in clock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncState {
    #[default]
    Settled,
    /// History may be missing; a request goes out once joined.
    Owed,
    /// Request sent, reply not applied yet.
    Requested,
}

/// Style captured when a gesture starts, so echo matches the sealed stroke.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Brush {
    tool: Tool,
    color: Option<Rgb>,
    width: f64,
}

impl Brush {
    fn primitive(&self, points: Vec<Point>) -> DrawPrimitive {
        DrawPrimitive::Stroke {
            tool: self.tool,
            color: self.color,
            width: self.width,
            points,
        }
    }
}

/// Drives one participant's view of a shared board.
pub struct BoardController<T: Transport, S: RenderSurface> {
    config: BoardConfig,
    model: StrokeModel,
    log: DrawingLog,
    channel: SyncChannel<T>,
    surface: S,
    tool: Tool,
    color: Rgb,
    width: f64,
    gesture: GestureState,
    brush: Brush,
    /// Remote changes arrived mid-gesture; redraw once it ends.
    redraw_pending: bool,
    resync: ResyncState,
    /// Live events received while a resync is outstanding.
    held: Vec<LogEntry>,
    peers: BTreeSet<ParticipantId>,
}

impl<T: Transport, S: RenderSurface> BoardController<T, S> {
    pub fn new(participant: ParticipantId, transport: T, surface: S, config: BoardConfig) -> Self {
        Self {
            model: StrokeModel::new(participant.clone()),
            log: DrawingLog::new(participant),
            channel: SyncChannel::new(transport, &config),
            surface,
            tool: Tool::Pen,
            color: config.default_color,
            width: config.default_width,
            gesture: GestureState::Idle,
            brush: Brush {
                tool: Tool::Pen,
                color: Some(config.default_color),
                width: config.default_width,
            },
            redraw_pending: false,
            resync: ResyncState::Settled,
            held: Vec::new(),
            peers: BTreeSet::new(),
            config,
        }
    }

    /// Join `room` and start connecting. Drawing works offline meanwhile.
    pub fn connect(&mut self, room: &str, now: Instant) -> BoardResult<()> {
        self.channel.join(room, Some(self.log.participant().clone()))?;
        self.channel.connect(now)
    }

    pub fn disconnect(&mut self) {
        self.channel.disconnect();
    }

    pub fn participant(&self) -> &ParticipantId {
        self.log.participant()
    }

    pub fn log(&self) -> &DrawingLog {
        &self.log
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn channel(&self) -> &SyncChannel<T> {
        &self.channel
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn gesture(&self) -> GestureState {
        self.gesture
    }

    pub fn peers(&self) -> &BTreeSet<ParticipantId> {
        &self.peers
    }

    pub fn resync_state(&self) -> ResyncState {
        self.resync
    }

    /// A resync is owed or in flight (after joining, an overflow or a
    /// conflict).
    pub fn is_resync_pending(&self) -> bool {
        self.resync != ResyncState::Settled
    }

    fn schedule_resync(&mut self) {
        if self.resync == ResyncState::Settled {
            self.resync = ResyncState::Owed;
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn color(&self) -> Rgb {
        self.color
    }

    pub fn set_color(&mut self, color: Rgb) {
        self.color = color;
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn set_width(&mut self, width: f64) -> BoardResult<()> {
        if !(width.is_finite() && width > 0.0) {
            return Err(BoardError::InvalidState(format!("stroke width must be positive, got {}", width)));
        }
        self.width = width;
        Ok(())
    }

    /// Feed one pointer event through the gesture state machine.
    pub fn handle_input(&mut self, event: &InputEvent, now: Instant) -> BoardResult<()> {
        let point = event.point();
        match (self.gesture, event.phase) {
            (GestureState::Idle, PointerPhase::Start) => {
                let handle = self.model.begin(self.tool, self.color, self.width, point)?;
                self.brush = Brush {
                    tool: self.tool,
                    color: (!self.tool.is_destructive()).then_some(self.color),
                    width: self.width,
                };
                self.gesture = GestureState::Active(handle);
            }
            (GestureState::Active(_), PointerPhase::Start) => {
                log::debug!("Ignoring pointer-down during an active stroke");
            }
            (GestureState::Active(handle), PointerPhase::Move) => {
                self.extend_active(handle, point)?;
            }
            (GestureState::Active(handle), phase) if phase.finishes() => {
                self.extend_active(handle, point)?;
                self.finish(handle, now)?;
            }
            (GestureState::Active(handle), PointerPhase::Cancel) => {
                self.model.cancel(handle);
                self.gesture = GestureState::Idle;
                self.redraw_all();
            }
            (GestureState::Idle, _) | (GestureState::Active(_), _) => {}
        }
        Ok(())
    }

    /// Append `point` unless it is within the move threshold, echoing the
    /// new segment immediately.
    fn extend_active(&mut self, handle: StrokeHandle, point: Point) -> BoardResult<()> {
        let Some(last) = self.model.last_point(handle) else {
            return Err(BoardError::InvalidState("active gesture lost its stroke".to_string()));
        };
        if last.distance(&point) < self.config.min_move_distance {
            return Ok(());
        }
        self.model.extend(handle, point)?;
        self.surface.draw(&self.brush.primitive(vec![last, point]));
        Ok(())
    }

    fn finish(&mut self, handle: StrokeHandle, now: Instant) -> BoardResult<()> {
        self.gesture = GestureState::Idle;
        let stroke = self.model.seal(handle)?;
        if stroke.points().len() == 1 {
            self.surface.draw(&DrawPrimitive::from_stroke(&stroke));
        }
        self.commit(BoardEvent::Stroke(stroke), now)?;
        if self.redraw_pending {
            self.redraw_all();
        }
        Ok(())
    }

    /// Wipe the board for everyone.
    pub fn clear(&mut self, now: Instant) -> BoardResult<()> {
        let event = BoardEvent::Clear(ClearEvent {
            origin: self.log.participant().clone(),
            timestamp_ms: Some(wall_clock_ms()),
        });
        self.commit(event, now)?;
        self.redraw_all();
        Ok(())
    }

    /// Append a local event and publish it.
    fn commit(&mut self, event: BoardEvent, now: Instant) -> BoardResult<()> {
        self.log.append_local(event)?;
        let Some(entry) = self.log.entries().last().cloned() else {
            return Err(BoardError::InvalidState("local append left the log empty".to_string()));
        };
        self.publish(&entry, now);
        Ok(())
    }

    fn publish(&mut self, entry: &LogEntry, now: Instant) {
        if self.resync != ResyncState::Settled {
            // Uploaded from the log once the relay's clocks are known.
            log::debug!("Holding {} until resync completes", entry.stamp);
            return;
        }
        match self.channel.publish(entry, now) {
            Ok(()) => {}
            Err(BoardError::Overflow { queued }) => self.handle_overflow(queued),
            Err(e) => log::warn!("Failed to publish {}: {}", entry.stamp, e),
        }
    }

    fn handle_overflow(&mut self, queued: usize) {
        let dropped = self.channel.discard_outbox();
        log::warn!(
            "Outbound queue overflowed with {} events; dropped {} and scheduled a full resync",
            queued,
            dropped
        );
        self.schedule_resync();
    }

    /// One turn of the event loop: reconnect, apply received messages, then
    /// flush the outbound queue or ask for a resync.
    pub fn pump(&mut self, now: Instant) {
        if let Err(e) = self.channel.tick(now) {
            log::warn!("Reconnect failed: {}", e);
        }

        let mut received = Vec::new();
        self.channel.on_receive(now, |incoming| received.push(incoming));
        for incoming in received {
            self.handle_incoming(incoming, now);
        }

        // Flushing ahead of the resync would lift the relay's clock for us
        // past entries it has not seen.
        if self.resync == ResyncState::Settled {
            match self.channel.flush(now) {
                Ok(_) => {}
                Err(BoardError::Overflow { queued }) => self.handle_overflow(queued),
                Err(e) => log::warn!("Flush failed: {}", e),
            }
        }

        if self.resync == ResyncState::Owed && self.channel.is_joined() {
            let since = self.log.clocks().clone();
            match self.channel.request_resync(&since) {
                Ok(()) => self.resync = ResyncState::Requested,
                Err(e) => log::warn!("Resync request failed: {}", e),
            }
        }
    }

    fn handle_incoming(&mut self, incoming: Incoming, now: Instant) {
        match incoming {
            Incoming::Connected => log::info!("Connected to relay"),
            Incoming::Disconnected => {
                log::info!("Disconnected from relay, drawing offline");
                self.lose_resync_reply();
            }
            Incoming::Error { message } => {
                log::warn!("Relay error: {}", message);
                if !self.channel.is_joined() {
                    self.lose_resync_reply();
                }
            }
            Incoming::Joined { participant, .. } => {
                self.adopt_participant(participant);
                self.peers.clear();
                // Anything published while we were away has to be fetched.
                self.resync = ResyncState::Owed;
            }
            Incoming::PeerJoined(peer) => {
                self.peers.insert(peer);
            }
            Incoming::PeerLeft(peer) => {
                self.peers.remove(&peer);
            }
            Incoming::Event { entry, .. } if self.resync != ResyncState::Settled => self.held.push(entry),
            Incoming::Event { entry, .. } => self.apply_remote(entry),
            Incoming::Resync { events, clocks } => self.apply_resync(events, &clocks, now),
        }
    }

    /// The connection carrying a resync request is gone; ask again after
    /// the next join.
    fn lose_resync_reply(&mut self) {
        if self.resync == ResyncState::Requested {
            self.resync = ResyncState::Owed;
        }
    }

    fn adopt_participant(&mut self, participant: ParticipantId) {
        if &participant == self.log.participant() {
            return;
        }
        match self.log.set_participant(participant.clone()) {
            Ok(()) => {
                log::info!("Relay assigned participant id {}", participant);
                self.model.set_participant(participant);
            }
            Err(e) => log::warn!("Keeping participant id {}: {}", self.log.participant(), e),
        }
    }

    fn apply_remote(&mut self, entry: LogEntry) {
        let stamp = entry.stamp.clone();
        match self.log.append_remote(entry) {
            Ok(Appended::Inserted { position, at_tail }) => {
                if matches!(self.gesture, GestureState::Active(_)) {
                    self.redraw_pending = true;
                    return;
                }
                match self.log.get(position) {
                    Some(entry) if at_tail && !entry.is_clear() => {
                        let primitive = DrawPrimitive::from_entry(entry);
                        self.surface.draw(&primitive);
                    }
                    _ => self.redraw_all(),
                }
            }
            Ok(Appended::Duplicate { .. }) => log::debug!("Ignoring duplicate {}", stamp),
            Ok(Appended::Obsolete) => log::debug!("Ignoring {} from before compaction", stamp),
            Err(e @ BoardError::OrderingConflict { .. }) => {
                log::warn!("{}; scheduling resync", e);
                self.schedule_resync();
            }
            Err(e) => log::warn!("Rejected remote event {}: {}", stamp, e),
        }
    }

    fn apply_resync(&mut self, events: Vec<LogEntry>, server_clocks: &ClockVector, now: Instant) {
        // The reply may trail live events it also contains, so history is
        // backfilled by stamp. Held live events follow it.
        let held = std::mem::take(&mut self.held);
        let mut inserted = 0;
        let mut conflicted = false;
        for entry in events.into_iter().chain(held) {
            let stamp = entry.stamp.clone();
            match self.log.backfill(entry) {
                Ok(appended) if appended.is_inserted() => inserted += 1,
                Ok(_) => {}
                Err(e @ BoardError::OrderingConflict { .. }) => {
                    log::warn!("{}; scheduling resync", e);
                    conflicted = true;
                }
                Err(e) => log::warn!("Skipping resync event {}: {}", stamp, e),
            }
        }

        // Anything still queued is part of what the relay lacks.
        self.channel.discard_outbox();
        if conflicted {
            self.resync = ResyncState::Owed;
        } else {
            self.resync = ResyncState::Settled;
            let missing = self.log.events_since(server_clocks);
            log::info!("Resync applied {} events, uploading {}", inserted, missing.len());
            for entry in &missing {
                self.publish(entry, now);
            }
        }

        if matches!(self.gesture, GestureState::Active(_)) {
            self.redraw_pending = true;
        } else {
            self.redraw_all();
        }
    }

    /// Discard the surface and replay the visible part of the log, then the
    /// stroke in progress.
    pub fn redraw_all(&mut self) {
        self.redraw_pending = false;
        self.surface.full_redraw();
        for entry in self.log.replay_from(0) {
            self.surface.draw(&DrawPrimitive::from_entry(entry));
        }
        if let GestureState::Active(handle) = self.gesture {
            if let Some(points) = self.model.points(handle) {
                let primitive = self.brush.primitive(points.to_vec());
                self.surface.draw(&primitive);
            }
        }
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
