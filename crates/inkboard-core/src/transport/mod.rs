//! Frame transports to the relay server.
//!
//! A transport moves opaque text frames and reports connection changes. It
//! never interprets frames; [`crate::channel::SyncChannel`] does that. All
//! implementations are non-blocking: I/O happens on a background thread
//! (native) or in browser callbacks (WASM), and results are collected with
//! [`Transport::poll_events`].

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod native;

#[cfg(target_arch = "wasm32")]
mod wasm;

pub use memory::{MemoryLink, MemoryTransport};

#[cfg(not(target_arch = "wasm32"))]
pub use native::NativeWebSocket;

#[cfg(target_arch = "wasm32")]
pub use wasm::WasmWebSocket;

use crate::error::TransportError;
use crate::protocol::ConnectionState;

/// Events reported by a transport, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// A text frame from the server.
    Frame(String),
    Error { message: String },
}

/// A bidirectional, unreliable frame pipe.
pub trait Transport {
    /// Start connecting. Completion is reported as [`TransportEvent::Connected`].
    fn connect(&mut self, url: &str) -> Result<(), TransportError>;

    /// Close the connection. Safe to call when already disconnected.
    fn disconnect(&mut self);

    /// Send a text frame.
    fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    /// Get current connection state.
    fn state(&self) -> ConnectionState;

    /// Check if connected.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Apply the state change implied by an event.
pub(crate) fn next_state(state: ConnectionState, event: &TransportEvent) -> ConnectionState {
    match event {
        TransportEvent::Connected => ConnectionState::Connected,
        TransportEvent::Disconnected => ConnectionState::Disconnected,
        TransportEvent::Error { .. } => ConnectionState::Error,
        TransportEvent::Frame(_) => state,
    }
}

/// Platform-specific WebSocket client type.
#[cfg(target_arch = "wasm32")]
pub type PlatformWebSocket = WasmWebSocket;

#[cfg(not(target_arch = "wasm32"))]
pub type PlatformWebSocket = NativeWebSocket;
