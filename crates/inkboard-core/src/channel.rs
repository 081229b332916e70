//! Sync channel: board events over an unreliable transport.
//!
//! The channel owns the transport, the room membership and a bounded
//! outbound queue. It never touches the drawing log; received events are
//! handed to the caller in arrival order and the caller inserts them.

use std::collections::VecDeque;
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

use crate::config::BoardConfig;
use crate::drawing_log::{ClockVector, LogEntry};
use crate::error::{BoardError, BoardResult};
use crate::protocol::{ClientMessage, ConnectionState, ServerMessage};
use crate::stroke::ParticipantId;
use crate::transport::{Transport, TransportEvent};
use crate::wire::WireEvent;

/// Something the channel received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Connected,
    Disconnected,
    Joined {
        room: String,
        participant: ParticipantId,
        peer_count: usize,
    },
    PeerJoined(ParticipantId),
    PeerLeft(ParticipantId),
    /// A decoded board event published by `from`.
    Event { from: ParticipantId, entry: LogEntry },
    /// Reply to [`SyncChannel::request_resync`].
    Resync { events: Vec<LogEntry>, clocks: ClockVector },
    Error { message: String },
}

/// Exponential retry delay.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Clone)]
struct Queued {
    frame: String,
    queued_at: Instant,
}

/// Board-event channel to the relay.
pub struct SyncChannel<T: Transport> {
    transport: T,
    url: String,
    /// Whether the owner wants a live connection (drives reconnects).
    wanted: bool,
    room: Option<String>,
    participant: Option<ParticipantId>,
    joined: bool,
    outbox: VecDeque<Queued>,
    max_queue: usize,
    max_queue_age: Duration,
    backoff: Backoff,
    retry_at: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl<T: Transport> SyncChannel<T> {
    pub fn new(transport: T, config: &BoardConfig) -> Self {
        Self {
            transport,
            url: config.server_url.clone(),
            wanted: false,
            room: None,
            participant: None,
            joined: false,
            outbox: VecDeque::new(),
            max_queue: config.max_outbound_queue,
            max_queue_age: config.max_queue_age(),
            backoff: Backoff::new(config.backoff_initial(), config.backoff_max()),
            retry_at: None,
            reconnect_at: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start connecting; reconnects automatically after drops until
    /// [`SyncChannel::disconnect`] is called.
    pub fn connect(&mut self, now: Instant) -> BoardResult<()> {
        self.wanted = true;
        self.reconnect_at = None;
        if let Err(e) = self.transport.connect(&self.url) {
            self.schedule_reconnect(now);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.wanted = false;
        self.joined = false;
        self.reconnect_at = None;
        self.transport.disconnect();
    }

    /// Join `room`, now if connected or as soon as the connection is up.
    pub fn join(&mut self, room: &str, participant: Option<ParticipantId>) -> BoardResult<()> {
        self.room = Some(room.to_string());
        self.participant = participant;
        self.joined = false;
        if self.transport.is_connected() {
            self.send_join()?;
        }
        Ok(())
    }

    pub fn leave(&mut self) -> BoardResult<()> {
        self.room = None;
        if self.joined {
            self.joined = false;
            self.send_message(&ClientMessage::Leave)?;
        }
        Ok(())
    }

    fn send_join(&mut self) -> BoardResult<()> {
        let Some(room) = self.room.clone() else {
            return Ok(());
        };
        self.send_message(&ClientMessage::Join {
            room,
            participant: self.participant.clone(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Connected and confirmed in a room.
    pub fn is_joined(&self) -> bool {
        self.joined && self.transport.is_connected()
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    fn send_message(&self, msg: &ClientMessage) -> BoardResult<()> {
        if !self.transport.is_connected() {
            return Err(BoardError::Disconnected);
        }
        let frame = serde_json::to_string(msg)?;
        self.transport.send(&frame)?;
        Ok(())
    }

    fn publish_frame(entry: &LogEntry) -> BoardResult<String> {
        Ok(serde_json::to_string(&ClientMessage::Publish {
            event: WireEvent::from(entry),
        })?)
    }

    /// Send an event now. Fails with [`BoardError::Disconnected`] when not
    /// joined; the caller decides whether to queue.
    pub fn send(&mut self, entry: &LogEntry) -> BoardResult<()> {
        if !self.is_joined() {
            return Err(BoardError::Disconnected);
        }
        let frame = Self::publish_frame(entry)?;
        self.transport.send(&frame)?;
        Ok(())
    }

    /// Add an event to the outbound queue.
    ///
    /// Fails with [`BoardError::Overflow`] (without queuing) once the queue
    /// is full or its oldest event is older than the configured bound.
    pub fn enqueue(&mut self, entry: &LogEntry, now: Instant) -> BoardResult<()> {
        self.check_bounds(now)?;
        if self.outbox.len() >= self.max_queue {
            return Err(BoardError::Overflow { queued: self.outbox.len() });
        }
        self.outbox.push_back(Queued {
            frame: Self::publish_frame(entry)?,
            queued_at: now,
        });
        Ok(())
    }

    fn check_bounds(&self, now: Instant) -> BoardResult<()> {
        match self.outbox.front() {
            Some(oldest) if now.saturating_duration_since(oldest.queued_at) > self.max_queue_age => {
                Err(BoardError::Overflow { queued: self.outbox.len() })
            }
            _ => Ok(()),
        }
    }

    /// Send directly when nothing is queued, otherwise queue behind the
    /// pending events so a participant's events stay in clock order.
    pub fn publish(&mut self, entry: &LogEntry, now: Instant) -> BoardResult<()> {
        if self.outbox.is_empty() {
            match self.send(entry) {
                Ok(()) => return Ok(()),
                Err(BoardError::Disconnected) => {}
                Err(e) => {
                    log::warn!("Send of {} failed, queuing: {}", entry.stamp, e);
                    self.retry_at = Some(now + self.backoff.next_delay());
                }
            }
        }
        self.enqueue(entry, now)
    }

    /// Retry queued events. Returns how many were sent.
    pub fn flush(&mut self, now: Instant) -> BoardResult<usize> {
        if !self.is_joined() {
            self.check_bounds(now)?;
            return Ok(0);
        }
        if self.retry_at.is_some_and(|at| now < at) {
            return Ok(0);
        }
        let mut sent = 0;
        while let Some(queued) = self.outbox.front() {
            match self.transport.send(&queued.frame) {
                Ok(()) => {
                    self.outbox.pop_front();
                    sent += 1;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    log::warn!("Flush failed after {} events, retrying in {:?}: {}", sent, delay, e);
                    self.retry_at = Some(now + delay);
                    return Ok(sent);
                }
            }
        }
        self.retry_at = None;
        if sent > 0 {
            self.backoff.reset();
            log::debug!("Flushed {} queued events", sent);
        }
        Ok(sent)
    }

    /// Drop everything queued. Returns how many events were dropped.
    pub fn discard_outbox(&mut self) -> usize {
        let dropped = self.outbox.len();
        self.outbox.clear();
        self.retry_at = None;
        dropped
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Ask the relay for every event after `since`. The reply arrives as
    /// [`Incoming::Resync`].
    pub fn request_resync(&mut self, since: &ClockVector) -> BoardResult<()> {
        if !self.is_joined() {
            return Err(BoardError::Disconnected);
        }
        log::info!("Requesting resync from {} participant clocks", since.len());
        self.send_message(&ClientMessage::Resync { since: since.clone() })
    }

    /// Reconnect if a scheduled retry is due.
    pub fn tick(&mut self, now: Instant) -> BoardResult<()> {
        let due = self.reconnect_at.is_some_and(|at| now >= at);
        if !self.wanted || !due {
            return Ok(());
        }
        match self.transport.state() {
            ConnectionState::Connected | ConnectionState::Connecting => Ok(()),
            _ => {
                log::info!("Reconnecting to {}", self.url);
                self.connect(now)
            }
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if self.wanted && self.reconnect_at.is_none() {
            let delay = self.backoff.next_delay();
            log::info!("Connection lost, retrying in {:?}", delay);
            self.reconnect_at = Some(now + delay);
        }
    }

    /// Drain the transport, invoking `callback` once per received item in
    /// arrival order.
    pub fn on_receive(&mut self, now: Instant, mut callback: impl FnMut(Incoming)) {
        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected => {
                    self.backoff.reset();
                    self.reconnect_at = None;
                    if let Err(e) = self.send_join() {
                        log::warn!("Failed to send join: {}", e);
                    }
                    callback(Incoming::Connected);
                }
                TransportEvent::Disconnected => {
                    self.joined = false;
                    self.schedule_reconnect(now);
                    callback(Incoming::Disconnected);
                }
                TransportEvent::Error { message } => {
                    self.joined = false;
                    self.schedule_reconnect(now);
                    callback(Incoming::Error { message });
                }
                TransportEvent::Frame(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if let Some(incoming) = self.handle_message(msg) {
                            callback(incoming);
                        }
                    }
                    Err(e) => log::warn!("Failed to parse server message: {} ({})", e, text),
                },
            }
        }
    }

    fn handle_message(&mut self, msg: ServerMessage) -> Option<Incoming> {
        match msg {
            ServerMessage::Joined { room, participant_id, peer_count } => {
                self.joined = true;
                self.participant = Some(participant_id.clone());
                log::info!("Joined room {} as {} ({} peers)", room, participant_id, peer_count);
                Some(Incoming::Joined {
                    room,
                    participant: participant_id,
                    peer_count,
                })
            }
            ServerMessage::PeerJoined { participant_id } => Some(Incoming::PeerJoined(participant_id)),
            ServerMessage::PeerLeft { participant_id } => Some(Incoming::PeerLeft(participant_id)),
            ServerMessage::Event { from, event } => match LogEntry::try_from(event) {
                Ok(entry) => Some(Incoming::Event { from, entry }),
                Err(e) => {
                    log::warn!("Dropping malformed event from {}: {}", from, e);
                    None
                }
            },
            ServerMessage::ResyncBatch { events, clocks } => {
                let total = events.len();
                let events: Vec<LogEntry> = events
                    .into_iter()
                    .filter_map(|wire| match LogEntry::try_from(wire) {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            log::warn!("Dropping malformed resync event: {}", e);
                            None
                        }
                    })
                    .collect();
                log::info!("Resync batch: {} of {} events usable", events.len(), total);
                Some(Incoming::Resync { events, clocks })
            }
            ServerMessage::Error { message } => {
                log::warn!("Relay error: {}", message);
                Some(Incoming::Error { message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawing_log::{BoardEvent, ClearEvent, Stamp};
    use crate::transport::{MemoryLink, MemoryTransport};

    fn clear_entry(clock: u64) -> LogEntry {
        LogEntry::new(
            Stamp::new(clock, "alice".into()),
            BoardEvent::Clear(ClearEvent { origin: "alice".into(), timestamp_ms: Some(0) }),
        )
    }

    fn joined_channel(config: &BoardConfig) -> (SyncChannel<MemoryTransport>, MemoryLink, Instant) {
        let (transport, link) = MemoryTransport::pair();
        let mut channel = SyncChannel::new(transport, config);
        let now = Instant::now();
        channel.join("room", Some("alice".into())).unwrap();
        channel.connect(now).unwrap();
        channel.on_receive(now, |_| {});
        link.deliver_message(&ServerMessage::Joined {
            room: "room".to_string(),
            participant_id: "alice".into(),
            peer_count: 1,
        })
        .unwrap();
        channel.on_receive(now, |_| {});
        link.take_sent();
        (channel, link, now)
    }

    #[test]
    fn test_join_sent_on_connect() {
        let (transport, link) = MemoryTransport::pair();
        let mut channel = SyncChannel::new(transport, &BoardConfig::default());
        let now = Instant::now();
        channel.join("room", None).unwrap();
        channel.connect(now).unwrap();

        let mut seen = Vec::new();
        channel.on_receive(now, |incoming| seen.push(incoming));
        assert_eq!(seen, vec![Incoming::Connected]);
        assert_eq!(
            link.take_client_messages(),
            vec![ClientMessage::Join { room: "room".to_string(), participant: None }]
        );
        assert!(!channel.is_joined());
    }

    #[test]
    fn test_send_requires_join() {
        let (transport, _link) = MemoryTransport::pair();
        let mut channel = SyncChannel::new(transport, &BoardConfig::default());
        assert!(matches!(channel.send(&clear_entry(1)), Err(BoardError::Disconnected)));
    }

    #[test]
    fn test_publish_sends_when_joined() {
        let (mut channel, link, now) = joined_channel(&BoardConfig::default());
        channel.publish(&clear_entry(1), now).unwrap();

        let sent = link.take_client_messages();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], ClientMessage::Publish { event } if event.logical_clock == 1));
        assert_eq!(channel.outbox_len(), 0);
    }

    #[test]
    fn test_overflow_after_bound() {
        let config = BoardConfig { max_outbound_queue: 3, ..BoardConfig::default() };
        let (transport, _link) = MemoryTransport::pair();
        let mut channel = SyncChannel::new(transport, &config);
        let now = Instant::now();

        for clock in 1..=3 {
            channel.publish(&clear_entry(clock), now).unwrap();
        }
        let err = channel.publish(&clear_entry(4), now).unwrap_err();
        assert!(matches!(err, BoardError::Overflow { queued: 3 }));
        assert_eq!(channel.discard_outbox(), 3);
    }

    #[test]
    fn test_overflow_by_age() {
        let config = BoardConfig { max_queue_age_ms: 1_000, ..BoardConfig::default() };
        let (transport, _link) = MemoryTransport::pair();
        let mut channel = SyncChannel::new(transport, &config);
        let now = Instant::now();

        channel.enqueue(&clear_entry(1), now).unwrap();
        let later = now + Duration::from_secs(2);
        assert!(matches!(channel.flush(later), Err(BoardError::Overflow { .. })));
        assert!(matches!(channel.enqueue(&clear_entry(2), later), Err(BoardError::Overflow { .. })));
    }

    #[test]
    fn test_flush_preserves_order_and_backs_off() {
        let (mut channel, link, now) = joined_channel(&BoardConfig::default());
        link.set_fail_sends(true);
        channel.publish(&clear_entry(1), now).unwrap();
        channel.publish(&clear_entry(2), now).unwrap();
        assert_eq!(channel.outbox_len(), 2);

        link.set_fail_sends(false);
        // Still inside the backoff window.
        assert_eq!(channel.flush(now).unwrap(), 0);

        let later = now + Duration::from_secs(1);
        assert_eq!(channel.flush(later).unwrap(), 2);
        let clocks: Vec<u64> = link
            .take_client_messages()
            .into_iter()
            .filter_map(|msg| match msg {
                ClientMessage::Publish { event } => Some(event.logical_clock),
                _ => None,
            })
            .collect();
        assert_eq!(clocks, vec![1, 2]);
    }

    #[test]
    fn test_reconnect_after_drop() {
        let config = BoardConfig::default();
        let (mut channel, link, now) = joined_channel(&config);

        link.drop_connection();
        let mut seen = Vec::new();
        channel.on_receive(now, |incoming| seen.push(incoming));
        assert_eq!(seen, vec![Incoming::Disconnected]);
        assert!(!channel.is_joined());

        // Not yet due.
        channel.tick(now).unwrap();
        assert_eq!(link.connect_attempts(), 1);

        channel.tick(now + config.backoff_initial()).unwrap();
        assert_eq!(link.connect_attempts(), 2);
        channel.on_receive(now, |_| {});
        assert_eq!(
            link.take_client_messages(),
            vec![ClientMessage::Join { room: "room".to_string(), participant: Some("alice".into()) }]
        );
    }

    #[test]
    fn test_events_decoded_in_arrival_order() {
        let (mut channel, link, now) = joined_channel(&BoardConfig::default());
        for clock in [5, 2] {
            let event = WireEvent::from(&clear_entry(clock));
            link.deliver_message(&ServerMessage::Event { from: "alice".into(), event }).unwrap();
        }
        link.deliver("garbage");

        let mut clocks = Vec::new();
        channel.on_receive(now, |incoming| {
            if let Incoming::Event { entry, .. } = incoming {
                clocks.push(entry.stamp.clock);
            }
        });
        assert_eq!(clocks, vec![5, 2]);
    }

    #[test]
    fn test_request_resync_message() {
        let (mut channel, link, _now) = joined_channel(&BoardConfig::default());
        let mut since = ClockVector::new();
        since.insert("bob".into(), 3);
        channel.request_resync(&since).unwrap();
        assert_eq!(link.take_client_messages(), vec![ClientMessage::Resync { since }]);
    }
}
