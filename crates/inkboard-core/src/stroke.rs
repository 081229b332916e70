//! Strokes: continuous pen or eraser gestures.
//!
//! A stroke is built through [`StrokeModel`] while the pointer is down and
//! sealed into an immutable [`Stroke`] once the gesture ends. Sealed strokes
//! are what the drawing log stores and what travels over the wire.

use kurbo::Rect;
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{BoardError, BoardResult};

/// Stable identifier of a participant in a room.
///
/// Ordering is plain byte-wise string ordering; it is the tie-break for
/// entries that share a logical clock.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id, used until the relay confirms one.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A recorded pointer sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "t")]
    pub timestamp_ms: u64,
}

impl Point {
    pub fn new(x: f64, y: f64, timestamp_ms: u64) -> Self {
        Self { x, y, timestamp_ms }
    }

    /// Euclidean distance to another sample, ignoring time.
    pub fn distance(&self, other: &Point) -> f64 {
        self.to_kurbo().distance(other.to_kurbo())
    }

    pub fn to_kurbo(self) -> kurbo::Point {
        kurbo::Point::new(self.x, self.y)
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Drawing tool of a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    /// Removes pixels (destructive compositing) rather than painting.
    Eraser,
}

impl Tool {
    pub fn is_destructive(self) -> bool {
        matches!(self, Tool::Eraser)
    }
}

/// An opaque RGB color, serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0)
    }

    pub const fn white() -> Self {
        Self::new(255, 255, 255)
    }

    /// Parse a `#rrggbb` string (the leading `#` is optional, digits may be
    /// upper or lower case).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::black()
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    /// Only the canonical `#rrggbb` lowercase form, so decoding and
    /// re-encoding reproduce the same bytes.
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::from_hex(&value)
            .filter(|color| color.to_hex() == value)
            .ok_or_else(|| format!("invalid color: {}", value))
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_hex()
    }
}

impl From<Color> for Rgb {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self::new(rgba.r, rgba.g, rgba.b)
    }
}

impl From<Rgb> for Color {
    fn from(color: Rgb) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, 255)
    }
}

/// Identifier of a stroke: its author plus the author's local sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrokeId {
    pub participant: ParticipantId,
    pub seq: u64,
}

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.participant, self.seq)
    }
}

/// A sealed stroke. Read-only once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    id: StrokeId,
    tool: Tool,
    color: Rgb,
    width: f64,
    points: Vec<Point>,
}

impl Stroke {
    /// Build a sealed stroke from its parts, validating them.
    ///
    /// Fails with [`BoardError::InvalidState`] for an empty point list, a
    /// non-positive width or non-finite coordinates.
    pub fn from_parts(
        id: StrokeId,
        tool: Tool,
        color: Rgb,
        width: f64,
        points: Vec<Point>,
    ) -> BoardResult<Self> {
        validate_width(width)?;
        if points.is_empty() {
            return Err(BoardError::InvalidState(format!("stroke {} has no points", id)));
        }
        if !points.iter().all(Point::is_finite) {
            return Err(BoardError::InvalidState(format!(
                "stroke {} has non-finite coordinates",
                id
            )));
        }
        Ok(Self { id, tool, color, width, points })
    }

    pub fn id(&self) -> &StrokeId {
        &self.id
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Color used for painting. Erasers have no meaningful color.
    pub fn color(&self) -> Option<Rgb> {
        match self.tool {
            Tool::Pen => Some(self.color),
            Tool::Eraser => None,
        }
    }

    /// The color as recorded, regardless of tool.
    pub fn raw_color(&self) -> Rgb {
        self.color
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Line segments in drawing order. A single-point stroke yields one
    /// degenerate segment so that taps still render as dots.
    pub fn segments(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let dot = (self.points.len() == 1).then(|| (self.points[0], self.points[0]));
        dot.into_iter()
            .chain(self.points.windows(2).map(|pair| (pair[0], pair[1])))
    }

    /// Bounding box of the stroke, inflated by half its width.
    pub fn bounds(&self) -> Rect {
        let mut rect = Rect::from_points(self.points[0].to_kurbo(), self.points[0].to_kurbo());
        for point in &self.points[1..] {
            rect = rect.union_pt(point.to_kurbo());
        }
        rect.inflate(self.width / 2.0, self.width / 2.0)
    }
}

fn validate_width(width: f64) -> BoardResult<()> {
    if width.is_finite() && width > 0.0 {
        Ok(())
    } else {
        Err(BoardError::InvalidState(format!("stroke width must be positive, got {}", width)))
    }
}

/// Handle to a stroke under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrokeHandle(u64);

#[derive(Debug, Clone)]
struct Draft {
    tool: Tool,
    color: Rgb,
    width: f64,
    points: Vec<Point>,
}

/// Builds strokes for one participant.
///
/// Each handle is valid from `begin` until it is sealed or cancelled; any
/// later use fails with [`BoardError::InvalidState`].
#[derive(Debug, Clone)]
pub struct StrokeModel {
    participant: ParticipantId,
    next_seq: u64,
    active: HashMap<StrokeHandle, Draft>,
}

impl StrokeModel {
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            next_seq: 1,
            active: HashMap::new(),
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Rebind to another participant id. Only strokes begun afterwards are affected.
    pub fn set_participant(&mut self, participant: ParticipantId) {
        self.participant = participant;
    }

    /// Start a stroke at `origin`.
    pub fn begin(&mut self, tool: Tool, color: Rgb, width: f64, origin: Point) -> BoardResult<StrokeHandle> {
        validate_width(width)?;
        if !origin.is_finite() {
            return Err(BoardError::InvalidState("stroke origin is not finite".to_string()));
        }
        let handle = StrokeHandle(self.next_seq);
        self.next_seq += 1;
        self.active.insert(
            handle,
            Draft {
                tool,
                color,
                width,
                points: vec![origin],
            },
        );
        Ok(handle)
    }

    /// Append a point to an active stroke.
    pub fn extend(&mut self, handle: StrokeHandle, point: Point) -> BoardResult<()> {
        let draft = self.active.get_mut(&handle).ok_or_else(|| inactive(handle))?;
        if !point.is_finite() {
            return Err(BoardError::InvalidState("stroke point is not finite".to_string()));
        }
        draft.points.push(point);
        Ok(())
    }

    /// Seal an active stroke. The handle becomes invalid.
    pub fn seal(&mut self, handle: StrokeHandle) -> BoardResult<Stroke> {
        let draft = self.active.remove(&handle).ok_or_else(|| inactive(handle))?;
        let id = StrokeId {
            participant: self.participant.clone(),
            seq: handle.0,
        };
        Stroke::from_parts(id, draft.tool, draft.color, draft.width, draft.points)
    }

    /// Discard an active stroke. Returns false if the handle was not active.
    pub fn cancel(&mut self, handle: StrokeHandle) -> bool {
        self.active.remove(&handle).is_some()
    }

    pub fn is_active(&self, handle: StrokeHandle) -> bool {
        self.active.contains_key(&handle)
    }

    /// Points recorded so far for an active stroke.
    pub fn points(&self, handle: StrokeHandle) -> Option<&[Point]> {
        self.active.get(&handle).map(|draft| draft.points.as_slice())
    }

    /// Last recorded point of an active stroke.
    pub fn last_point(&self, handle: StrokeHandle) -> Option<Point> {
        self.points(handle).and_then(|points| points.last().copied())
    }
}

fn inactive(handle: StrokeHandle) -> BoardError {
    BoardError::InvalidState(format!("stroke handle {} is not active", handle.0))
}
