//! WebSocket transport for the browser.
//!
//! Socket callbacks push [`TransportEvent`]s onto a shared queue that
//! [`Transport::poll_events`] drains on the owner's next turn.

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BinaryType, CloseEvent, ErrorEvent, MessageEvent, WebSocket};

use super::{next_state, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::ConnectionState;

type EventQueue = Rc<RefCell<Vec<TransportEvent>>>;

/// A live browser socket and the callbacks it references. Dropping the
/// callbacks while the socket can still fire them would trap, so both are
/// torn down together.
struct BrowserSocket {
    ws: WebSocket,
    _callbacks: Vec<Closure<dyn FnMut(JsValue)>>,
}

impl BrowserSocket {
    fn open(url: &str, queue: &EventQueue) -> Result<Self, TransportError> {
        let ws = WebSocket::new(url).map_err(|e| TransportError::ConnectFailed(format!("{:?}", e)))?;
        ws.set_binary_type(BinaryType::Arraybuffer);

        let on_open = listener(queue, |_| Some(TransportEvent::Connected));
        let on_message = listener(queue, |value| {
            let text = value.dyn_into::<MessageEvent>().ok()?.data().as_string()?;
            Some(TransportEvent::Frame(text))
        });
        let on_close = listener(queue, |value| {
            if let Ok(close) = value.dyn_into::<CloseEvent>() {
                log::info!("Socket closed with code {}", close.code());
            }
            Some(TransportEvent::Disconnected)
        });
        let on_error = listener(queue, |value| {
            let message = value
                .dyn_into::<ErrorEvent>()
                .map(|e| e.message())
                .unwrap_or_else(|_| "WebSocket error".to_string());
            Some(TransportEvent::Error { message })
        });

        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        Ok(Self {
            ws,
            _callbacks: vec![on_open, on_message, on_close, on_error],
        })
    }
}

impl Drop for BrowserSocket {
    fn drop(&mut self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onclose(None);
        self.ws.set_onerror(None);
        let _ = self.ws.close();
    }
}

fn listener(
    queue: &EventQueue,
    map: impl Fn(JsValue) -> Option<TransportEvent> + 'static,
) -> Closure<dyn FnMut(JsValue)> {
    let queue = queue.clone();
    Closure::wrap(Box::new(move |value: JsValue| {
        if let Some(event) = map(value) {
            queue.borrow_mut().push(event);
        }
    }) as Box<dyn FnMut(JsValue)>)
}

/// WebSocket client for WASM.
pub struct WasmWebSocket {
    state: ConnectionState,
    queue: EventQueue,
    socket: Option<BrowserSocket>,
}

impl WasmWebSocket {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            queue: Rc::new(RefCell::new(Vec::new())),
            socket: None,
        }
    }
}

impl Transport for WasmWebSocket {
    fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            return Err(TransportError::AlreadyConnected);
        }
        self.socket = None;
        self.queue.borrow_mut().clear();
        self.socket = Some(BrowserSocket::open(url, &self.queue)?);
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.socket = None;
        self.queue.borrow_mut().clear();
        self.state = ConnectionState::Disconnected;
    }

    fn send(&self, frame: &str) -> Result<(), TransportError> {
        match &self.socket {
            Some(socket) if self.state == ConnectionState::Connected => socket
                .ws
                .send_with_str(frame)
                .map_err(|e| TransportError::SendFailed(format!("{:?}", e))),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let events = std::mem::take(&mut *self.queue.borrow_mut());
        for event in &events {
            self.state = next_state(self.state, event);
        }
        events
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

impl Default for WasmWebSocket {
    fn default() -> Self {
        Self::new()
    }
}
