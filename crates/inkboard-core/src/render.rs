//! Render surface abstraction.
//!
//! The board never touches pixels. It emits [`DrawPrimitive`]s in
//! compositing order and asks for a full redraw when earlier output has to
//! be discarded.

use crate::drawing_log::{BoardEvent, LogEntry};
use crate::stroke::{Point, Rgb, Stroke, Tool};

/// A drawing command.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawPrimitive {
    /// Polyline through `points`; a single point is a dot. `color` is
    /// `None` for the eraser, which composites destructively.
    Stroke {
        tool: Tool,
        color: Option<Rgb>,
        width: f64,
        points: Vec<Point>,
    },
    /// Wipe everything drawn so far.
    Clear,
}

impl DrawPrimitive {
    pub fn from_stroke(stroke: &Stroke) -> Self {
        DrawPrimitive::Stroke {
            tool: stroke.tool(),
            color: stroke.color(),
            width: stroke.width(),
            points: stroke.points().to_vec(),
        }
    }

    pub fn from_entry(entry: &LogEntry) -> Self {
        match &entry.event {
            BoardEvent::Stroke(stroke) => Self::from_stroke(stroke),
            BoardEvent::Clear(_) => DrawPrimitive::Clear,
        }
    }
}

/// Destination for board output.
pub trait RenderSurface {
    /// Composite a primitive over what is already drawn.
    fn draw(&mut self, primitive: &DrawPrimitive);

    /// Discard all output; the board follows up with a complete replay.
    fn full_redraw(&mut self);
}

impl<S: RenderSurface + ?Sized> RenderSurface for &mut S {
    fn draw(&mut self, primitive: &DrawPrimitive) {
        (**self).draw(primitive);
    }

    fn full_redraw(&mut self) {
        (**self).full_redraw();
    }
}

/// One visible line segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub tool: Tool,
    pub color: Option<Rgb>,
    pub width: f64,
    pub from: Point,
    pub to: Point,
}

/// What a [`RecordingSurface`] received.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Draw(DrawPrimitive),
    FullRedraw,
}

/// Surface that records its input instead of rasterizing it.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    ops: Vec<SurfaceOp>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    pub fn full_redraws(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, SurfaceOp::FullRedraw)).count()
    }

    /// Forget everything recorded so far.
    pub fn reset(&mut self) {
        self.ops.clear();
    }

    /// Segments currently on screen, in compositing order.
    pub fn visible_segments(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        for op in &self.ops {
            match op {
                SurfaceOp::FullRedraw | SurfaceOp::Draw(DrawPrimitive::Clear) => segments.clear(),
                SurfaceOp::Draw(DrawPrimitive::Stroke { tool, color, width, points }) => {
                    let segment = |from: Point, to: Point| Segment {
                        tool: *tool,
                        color: *color,
                        width: *width,
                        from,
                        to,
                    };
                    if let [only] = points.as_slice() {
                        segments.push(segment(*only, *only));
                    } else {
                        segments.extend(points.windows(2).map(|pair| segment(pair[0], pair[1])));
                    }
                }
            }
        }
        segments
    }
}

impl RenderSurface for RecordingSurface {
    fn draw(&mut self, primitive: &DrawPrimitive) {
        self.ops.push(SurfaceOp::Draw(primitive.clone()));
    }

    fn full_redraw(&mut self) {
        self.ops.push(SurfaceOp::FullRedraw);
    }
}
