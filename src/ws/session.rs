//! Application sessions on top of a WebSocket connection
//!
//! Socket.IO (over Engine.IO v4) packets are text frames whose leading
//! digits give the packet type:
//!
//! | prefix | meaning                         | handling                  |
//! |--------|---------------------------------|---------------------------|
//! | `0`    | Engine.IO open                  | logged                    |
//! | `2`    | Engine.IO ping                  | answered with `3`         |
//! | `40`   | Socket.IO connect (ack)         | logged                    |
//! | `42`   | Socket.IO event                 | payload dispatched        |
//! | other  |                                 | ignored                   |

use crate::error::WsError;
use crate::ws::client::WsSender;

/// Connection-level callbacks run on the client's driver thread
pub trait SessionHandler: Send {
    fn on_open(&mut self, _sender: &WsSender) -> Result<(), WsError> {
        Ok(())
    }

    fn on_text(&mut self, text: &str, sender: &WsSender) -> Result<(), WsError>;

    /// Runs at least once per second while connected.
    fn on_tick(&mut self, _sender: &WsSender) -> Result<(), WsError> {
        Ok(())
    }

    fn on_close(&mut self) {}
}

/// Consumer of application payloads (JSON text)
pub trait EventDispatcher: Send {
    fn dispatch(&mut self, payload: &str);

    /// Periodic housekeeping while connected
    fn on_tick(&mut self) {}

    fn on_disconnect(&mut self) {}
}

/// Socket.IO envelope handling
pub struct SocketIoSession<D: EventDispatcher> {
    dispatcher: D,
}

impl<D: EventDispatcher> SocketIoSession<D> {
    pub fn new(dispatcher: D) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }
}

impl<D: EventDispatcher> SessionHandler for SocketIoSession<D> {
    fn on_open(&mut self, sender: &WsSender) -> Result<(), WsError> {
        sender.send_text("40")
    }

    fn on_text(&mut self, text: &str, sender: &WsSender) -> Result<(), WsError> {
        if let Some(event) = text.strip_prefix("42") {
            self.dispatcher.dispatch(event);
        } else if let Some(probe) = text.strip_prefix('2') {
            sender.send_text(&format!("3{}", probe))?;
        } else if text.starts_with("40") {
            tracing::debug!("Socket.IO namespace connected");
        } else if let Some(open) = text.strip_prefix('0') {
            tracing::debug!("Engine.IO open: {}", open);
        } else {
            tracing::trace!("Ignoring Socket.IO packet {:?}", text.chars().next());
        }
        Ok(())
    }

    fn on_tick(&mut self, _sender: &WsSender) -> Result<(), WsError> {
        self.dispatcher.on_tick();
        Ok(())
    }

    fn on_close(&mut self) {
        self.dispatcher.on_disconnect();
    }
}

/// Plain text session: optional subscription on open, every text
/// message dispatched unchanged
pub struct PlainSession<D: EventDispatcher> {
    subscribe: Option<String>,
    dispatcher: D,
}

impl<D: EventDispatcher> PlainSession<D> {
    pub fn new(subscribe: Option<String>, dispatcher: D) -> Self {
        Self {
            subscribe,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }
}

impl<D: EventDispatcher> SessionHandler for PlainSession<D> {
    fn on_open(&mut self, sender: &WsSender) -> Result<(), WsError> {
        match &self.subscribe {
            Some(message) => sender.send_text(message),
            None => Ok(()),
        }
    }

    fn on_text(&mut self, text: &str, _sender: &WsSender) -> Result<(), WsError> {
        self.dispatcher.dispatch(text);
        Ok(())
    }

    fn on_tick(&mut self, _sender: &WsSender) -> Result<(), WsError> {
        self.dispatcher.on_tick();
        Ok(())
    }

    fn on_close(&mut self) {
        self.dispatcher.on_disconnect();
    }
}
