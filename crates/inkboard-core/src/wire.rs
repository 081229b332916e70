//! Wire format for board events.
//!
//! Every event travels as a JSON envelope:
//!
//! ```json
//! { "kind": "stroke", "participantId": "a1", "logicalClock": 7,
//!   "payload": { "seq": 3, "tool": "pen", "color": "#ff0000", "width": 2.0,
//!                "points": [ { "x": 1.0, "y": 2.0, "t": 1700000000000 } ] } }
//! { "kind": "clear", "participantId": "a1", "logicalClock": 8,
//!   "timestampMillis": 1700000000500, "payload": {} }
//! ```
//!
//! Encoding is deterministic, so decode-then-encode reproduces the input
//! bytes of anything this module produced.

use serde::{Deserialize, Serialize};

use crate::drawing_log::{BoardEvent, ClearEvent, LogEntry, Stamp};
use crate::error::{BoardError, BoardResult};
use crate::stroke::{ParticipantId, Point, Rgb, Stroke, StrokeId, Tool};

/// Discriminant of a wire event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Stroke,
    Clear,
}

/// Serialized form of a [`LogEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub kind: EventKind,
    pub participant_id: ParticipantId,
    pub logical_clock: u64,
    /// Creation time of a clear. Absent for strokes, whose points carry time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_millis: Option<u64>,
    pub payload: WirePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePayload {
    Stroke(StrokePayload),
    Empty(EmptyPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokePayload {
    pub seq: u64,
    pub tool: Tool,
    pub color: Rgb,
    pub width: f64,
    pub points: Vec<Point>,
}

/// The `{}` payload of a clear.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyPayload {}

impl WireEvent {
    pub fn to_json(&self) -> BoardResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> BoardResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.logical_clock, self.participant_id.clone())
    }
}

impl From<&LogEntry> for WireEvent {
    fn from(entry: &LogEntry) -> Self {
        let (kind, timestamp_millis, payload) = match &entry.event {
            BoardEvent::Stroke(stroke) => (
                EventKind::Stroke,
                None,
                WirePayload::Stroke(StrokePayload {
                    seq: stroke.id().seq,
                    tool: stroke.tool(),
                    color: stroke.raw_color(),
                    width: stroke.width(),
                    points: stroke.points().to_vec(),
                }),
            ),
            BoardEvent::Clear(clear) => (
                EventKind::Clear,
                clear.timestamp_ms,
                WirePayload::Empty(EmptyPayload::default()),
            ),
        };
        Self {
            kind,
            participant_id: entry.stamp.participant.clone(),
            logical_clock: entry.stamp.clock,
            timestamp_millis,
            payload,
        }
    }
}

impl TryFrom<WireEvent> for LogEntry {
    type Error = BoardError;

    fn try_from(wire: WireEvent) -> BoardResult<Self> {
        let stamp = wire.stamp();
        let event = match (wire.kind, wire.payload) {
            (EventKind::Stroke, WirePayload::Stroke(payload)) => {
                let id = StrokeId {
                    participant: wire.participant_id,
                    seq: payload.seq,
                };
                let stroke = Stroke::from_parts(id, payload.tool, payload.color, payload.width, payload.points)
                    .map_err(|e| match e {
                        BoardError::InvalidState(msg) => BoardError::Malformed(msg),
                        other => other,
                    })?;
                BoardEvent::Stroke(stroke)
            }
            (EventKind::Clear, WirePayload::Empty(_)) => BoardEvent::Clear(ClearEvent {
                origin: wire.participant_id,
                timestamp_ms: wire.timestamp_millis,
            }),
            (kind, _) => {
                return Err(BoardError::Malformed(format!(
                    "payload does not match kind {:?} for {}",
                    kind, stamp
                )));
            }
        };
        Ok(LogEntry::new(stamp, event))
    }
}

/// Encode a log entry as a JSON envelope.
pub fn encode(entry: &LogEntry) -> BoardResult<String> {
    WireEvent::from(entry).to_json()
}

/// Decode and validate a JSON envelope.
pub fn decode(json: &str) -> BoardResult<LogEntry> {
    WireEvent::from_json(json)?.try_into()
}
