//! Normalized pointer input.

use serde::{Deserialize, Serialize};

use crate::stroke::Point;

/// Phase of a pointer gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerPhase {
    Start,
    Move,
    End,
    /// Pointer left the surface; finishes the gesture like `End`.
    Leave,
    /// Gesture aborted by the platform; nothing is emitted.
    Cancel,
}

impl PointerPhase {
    /// Whether this phase completes an active gesture.
    pub fn finishes(self) -> bool {
        matches!(self, PointerPhase::End | PointerPhase::Leave)
    }
}

/// A pointer event in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: u64,
    pub phase: PointerPhase,
}

impl InputEvent {
    pub fn new(phase: PointerPhase, x: f64, y: f64, timestamp_ms: u64) -> Self {
        Self { x, y, timestamp_ms, phase }
    }

    pub fn start(x: f64, y: f64, timestamp_ms: u64) -> Self {
        Self::new(PointerPhase::Start, x, y, timestamp_ms)
    }

    pub fn moved(x: f64, y: f64, timestamp_ms: u64) -> Self {
        Self::new(PointerPhase::Move, x, y, timestamp_ms)
    }

    pub fn end(x: f64, y: f64, timestamp_ms: u64) -> Self {
        Self::new(PointerPhase::End, x, y, timestamp_ms)
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y, self.timestamp_ms)
    }
}
