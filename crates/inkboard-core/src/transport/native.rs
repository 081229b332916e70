//! WebSocket transport for native platforms.
//!
//! The socket lives on a worker thread. Outgoing frames reach it over one
//! mpsc channel and everything it observes comes back over another, so the
//! owner never blocks on the network.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::ops::ControlFlow;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

use super::{next_state, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::ConnectionState;

/// How long a read may block before the worker checks for outgoing frames.
const READ_SLICE: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Frame(String),
    Close,
}

/// Owner-side ends of a running worker.
struct Link {
    commands: Sender<Command>,
    events: Receiver<TransportEvent>,
    _worker: JoinHandle<()>,
}

struct Worker {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    commands: Receiver<Command>,
    events: Sender<TransportEvent>,
}

impl Worker {
    fn spawn(url: String) -> Link {
        let (command_tx, command_rx) = channel();
        let (event_tx, event_rx) = channel();
        let handle = thread::spawn(move || match tungstenite::connect(url.as_str()) {
            Ok((socket, response)) => {
                log::info!("Connected to {} ({})", url, response.status());
                let _ = event_tx.send(TransportEvent::Connected);
                let mut worker = Worker {
                    socket,
                    commands: command_rx,
                    events: event_tx,
                };
                worker.run();
            }
            Err(e) => {
                log::error!("Connecting to {} failed: {}", url, e);
                let _ = event_tx.send(TransportEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
            }
        });
        Link {
            commands: command_tx,
            events: event_rx,
            _worker: handle,
        }
    }

    fn run(&mut self) {
        if let MaybeTlsStream::Plain(tcp) = self.socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(READ_SLICE));
            let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
        }
        while self.write_pending().is_continue() && self.read_once().is_continue() {}
        log::info!("Socket worker stopped");
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    fn write_pending(&mut self) -> ControlFlow<()> {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Frame(frame)) => {
                    if let Err(e) = self.socket.send(Message::Text(frame)) {
                        log::error!("Socket write failed: {}", e);
                        return ControlFlow::Break(());
                    }
                }
                Ok(Command::Close) => {
                    let _ = self.socket.close(None);
                    return ControlFlow::Break(());
                }
                Err(TryRecvError::Empty) => return ControlFlow::Continue(()),
                Err(TryRecvError::Disconnected) => return ControlFlow::Break(()),
            }
        }
    }

    fn read_once(&mut self) -> ControlFlow<()> {
        match self.socket.read() {
            Ok(Message::Text(frame)) => {
                log::trace!("Received {} bytes", frame.len());
                if self.events.send(TransportEvent::Frame(frame)).is_err() {
                    return ControlFlow::Break(());
                }
            }
            Ok(Message::Close(_)) => return ControlFlow::Break(()),
            // tungstenite queues pong replies itself.
            Ok(_) => {}
            Err(tungstenite::Error::Io(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                log::error!("Socket read failed: {}", e);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

/// WebSocket client backed by a worker thread.
pub struct NativeWebSocket {
    state: ConnectionState,
    link: Option<Link>,
}

impl NativeWebSocket {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            link: None,
        }
    }
}

fn validate_url(url: &str) -> Result<(), TransportError> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    // tungstenite is built without a TLS backend, and the worker's read
    // timeout only applies to plain TCP streams.
    match parsed.scheme() {
        "ws" => Ok(()),
        "wss" => Err(TransportError::InvalidUrl("wss is not supported by the native client".to_string())),
        other => Err(TransportError::InvalidUrl(format!("unsupported scheme {}", other))),
    }
}

impl Transport for NativeWebSocket {
    fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            return Err(TransportError::AlreadyConnected);
        }
        validate_url(url)?;
        self.link = Some(Worker::spawn(url.to_string()));
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.commands.send(Command::Close);
        }
        self.state = ConnectionState::Disconnected;
    }

    fn send(&self, frame: &str) -> Result<(), TransportError> {
        match &self.link {
            Some(link) if self.state == ConnectionState::Connected => link
                .commands
                .send(Command::Frame(frame.to_string()))
                .map_err(|e| TransportError::SendFailed(e.to_string())),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let Some(link) = &self.link else {
            return Vec::new();
        };
        let events: Vec<TransportEvent> = link.events.try_iter().collect();
        for event in &events {
            self.state = next_state(self.state, event);
        }
        events
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

impl Default for NativeWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeWebSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}
