//! InkBoard Core Library
//!
//! Platform-agnostic sync engine for a shared whiteboard: strokes, the
//! Lamport-ordered drawing log, the sync channel and the board controller
//! that ties them to input and a render surface.

pub mod channel;
pub mod config;
pub mod controller;
pub mod drawing_log;
pub mod error;
pub mod input;
pub mod protocol;
pub mod render;
pub mod stroke;
pub mod transport;
pub mod wire;

pub use channel::{Incoming, SyncChannel};
pub use config::{BoardConfig, ConfigError, DEFAULT_SERVER_URL};
pub use controller::{BoardController, GestureState, ResyncState};
pub use drawing_log::{Appended, BoardEvent, ClearEvent, ClockVector, DrawingLog, LogEntry, LogPosition, Stamp};
pub use error::{BoardError, BoardResult, TransportError};
pub use input::{InputEvent, PointerPhase};
pub use protocol::{ClientMessage, ConnectionState, ServerMessage};
pub use render::{DrawPrimitive, RecordingSurface, RenderSurface};
pub use stroke::{ParticipantId, Point, Rgb, Stroke, StrokeHandle, StrokeId, StrokeModel, Tool};
pub use transport::{MemoryLink, MemoryTransport, PlatformWebSocket, Transport, TransportEvent};
pub use wire::WireEvent;
