//! In-process transport.
//!
//! [`MemoryTransport`] is the client end; [`MemoryLink`] is the far end,
//! driven by whoever plays the relay (tests, or an embedding host that
//! forwards frames over its own channel).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{next_state, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::{ClientMessage, ConnectionState, ServerMessage};

#[derive(Debug)]
struct LinkState {
    reachable: bool,
    up: bool,
    fail_sends: bool,
    connects: usize,
    sent: Vec<String>,
    inbox: VecDeque<TransportEvent>,
}

/// Far end of a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryLink {
    inner: Rc<RefCell<LinkState>>,
}

impl MemoryLink {
    /// Queue a raw frame for the client.
    pub fn deliver(&self, frame: impl Into<String>) {
        self.inner.borrow_mut().inbox.push_back(TransportEvent::Frame(frame.into()));
    }

    /// Queue a server message for the client.
    pub fn deliver_message(&self, msg: &ServerMessage) -> serde_json::Result<()> {
        self.deliver(serde_json::to_string(msg)?);
        Ok(())
    }

    /// Frames the client sent since the last call.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.borrow_mut().sent)
    }

    /// Client messages sent since the last call. Unparseable frames are skipped.
    pub fn take_client_messages(&self) -> Vec<ClientMessage> {
        self.take_sent()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Sever the connection, as a network drop would.
    pub fn drop_connection(&self) {
        let mut link = self.inner.borrow_mut();
        if link.up {
            link.up = false;
            link.inbox.push_back(TransportEvent::Disconnected);
        }
    }

    /// Whether future connection attempts succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.borrow_mut().reachable = reachable;
    }

    /// Make sends fail while the connection stays up.
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.borrow_mut().fail_sends = fail;
    }

    /// Number of connection attempts made by the client.
    pub fn connect_attempts(&self) -> usize {
        self.inner.borrow().connects
    }

    pub fn is_up(&self) -> bool {
        self.inner.borrow().up
    }
}

/// Client end of an in-process link.
#[derive(Debug)]
pub struct MemoryTransport {
    state: ConnectionState,
    link: MemoryLink,
}

impl MemoryTransport {
    /// Create a connected pair of client transport and far end.
    pub fn pair() -> (Self, MemoryLink) {
        let link = MemoryLink {
            inner: Rc::new(RefCell::new(LinkState {
                reachable: true,
                up: false,
                fail_sends: false,
                connects: 0,
                sent: Vec::new(),
                inbox: VecDeque::new(),
            })),
        };
        let transport = Self {
            state: ConnectionState::Disconnected,
            link: link.clone(),
        };
        (transport, link)
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, _url: &str) -> Result<(), TransportError> {
        let mut link = self.link.inner.borrow_mut();
        if link.up {
            return Err(TransportError::AlreadyConnected);
        }
        link.connects += 1;
        self.state = ConnectionState::Connecting;
        if link.reachable {
            link.up = true;
            link.inbox.push_back(TransportEvent::Connected);
        } else {
            link.inbox.push_back(TransportEvent::Error {
                message: "Connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut link = self.link.inner.borrow_mut();
        link.up = false;
        link.inbox.clear();
        self.state = ConnectionState::Disconnected;
    }

    fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut link = self.link.inner.borrow_mut();
        if self.state != ConnectionState::Connected || !link.up {
            return Err(TransportError::NotConnected);
        }
        if link.fail_sends {
            return Err(TransportError::SendFailed("link refused frame".to_string()));
        }
        link.sent.push(frame.to_string());
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let events: Vec<_> = self.link.inner.borrow_mut().inbox.drain(..).collect();
        for event in &events {
            self.state = next_state(self.state, event);
        }
        events
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}
