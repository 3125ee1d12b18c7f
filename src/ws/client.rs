//! WebSocket connection driver
//!
//! [`WsClient::run`] owns the connect → handshake → read loop → reconnect
//! cycle on its own thread. The live connection sits behind the send lock
//! inside [`WsSender`]; the driver takes the lock for each (short,
//! timeout-bounded) read and other threads take it to write whole frames,
//! so frames from different producers never interleave.

use parking_lot::Mutex;
use std::io::Read;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::MaskMode;
use crate::constants::{
    WOULD_BLOCK_SLEEP, WS_HANDSHAKE_TIMEOUT, WS_INITIAL_BUFFER, WS_MAX_MESSAGE, WS_RECONNECT_DELAY,
};
use crate::error::{NetworkError, WsError};
use crate::network::http::Endpoint;
use crate::network::transport::{is_would_block, write_all, Connector, Transport};
use crate::sync::Shutdown;
use crate::ws::assembler::{Message, MessageAssembler};
use crate::ws::frame::{mask_key, Frame, FrameDecoder, OpCode};
use crate::ws::handshake;
use crate::ws::session::SessionHandler;

/// Session tick period while connected
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Transport read size
const READ_CHUNK: usize = 4096;

/// Connection state of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Handshaking = 2,
    Connected = 3,
    Closing = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Handshaking,
            3 => ConnectionState::Connected,
            4 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Per-client settings
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Label used in log lines
    pub name: String,
    pub url: String,
    pub mask_mode: MaskMode,
    pub reconnect_delay: Duration,
    pub max_message_size: usize,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            name: "ws".to_string(),
            url: String::new(),
            mask_mode: MaskMode::Zero,
            reconnect_delay: WS_RECONNECT_DELAY,
            max_message_size: WS_MAX_MESSAGE,
        }
    }
}

/// Counters readable from other threads
#[derive(Debug, Default)]
pub struct WsStats {
    connects: AtomicU64,
    failures: AtomicU64,
    frames_received: AtomicU64,
    messages_received: AtomicU64,
    frames_sent: AtomicU64,
}

impl WsStats {
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

struct Link {
    conn: Mutex<Option<Box<dyn Transport>>>,
    state: AtomicU8,
    mask_mode: MaskMode,
    shutdown: Arc<Shutdown>,
    stats: Arc<WsStats>,
}

/// Cloneable handle for sending on the current connection
#[derive(Clone)]
pub struct WsSender {
    link: Arc<Link>,
}

impl WsSender {
    fn new(mask_mode: MaskMode, shutdown: Arc<Shutdown>, stats: Arc<WsStats>) -> Self {
        Self {
            link: Arc::new(Link {
                conn: Mutex::new(None),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                mask_mode,
                shutdown,
                stats,
            }),
        }
    }

    /// Snapshot of the driver's connection state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.link.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn send_text(&self, text: &str) -> Result<(), WsError> {
        self.send_frame(&Frame::text(text))
    }

    /// Encode and write one frame under the send lock.
    ///
    /// A failed write leaves a partial frame on the wire, so the
    /// connection is dropped; the driver reconnects.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), WsError> {
        let wire = frame.encode(mask_key(self.link.mask_mode));
        let mut guard = self.link.conn.lock();
        let conn = guard.as_mut().ok_or(WsError::NotConnected)?;

        let deadline = Some(Instant::now() + WS_HANDSHAKE_TIMEOUT);
        match write_all(conn.as_mut(), &wire, &self.link.shutdown, deadline) {
            Ok(()) => {
                self.link.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                if let Some(mut conn) = guard.take() {
                    conn.close();
                }
                Err(e.into())
            }
        }
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.link.state.swap(state as u8, Ordering::AcqRel))
    }

    fn attach(&self, conn: Box<dyn Transport>) {
        *self.link.conn.lock() = Some(conn);
    }

    fn detach(&self) -> Option<Box<dyn Transport>> {
        self.link.conn.lock().take()
    }

    /// One read under the lock. `Ok(None)` means would-block.
    fn read(&self, buf: &mut [u8]) -> Result<Option<usize>, WsError> {
        let mut guard = self.link.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or(WsError::Network(NetworkError::PeerClosed))?;
        match conn.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if is_would_block(&e) => Ok(None),
            Err(e) => Err(NetworkError::ReceiveFailed(e.to_string()).into()),
        }
    }
}

/// WebSocket client driving one session handler
pub struct WsClient<C: Connector, H: SessionHandler> {
    connector: C,
    endpoint: Endpoint,
    config: WsClientConfig,
    handler: H,
    sender: WsSender,
    shutdown: Arc<Shutdown>,
    stats: Arc<WsStats>,
}

impl<C: Connector, H: SessionHandler> WsClient<C, H> {
    pub fn new(
        connector: C,
        config: WsClientConfig,
        handler: H,
        shutdown: Arc<Shutdown>,
    ) -> Result<Self, WsError> {
        let endpoint = Endpoint::parse(&config.url)?;
        let stats = Arc::new(WsStats::default());
        let sender = WsSender::new(config.mask_mode, shutdown.clone(), stats.clone());
        Ok(Self {
            connector,
            endpoint,
            config,
            handler,
            sender,
            shutdown,
            stats,
        })
    }

    pub fn sender(&self) -> WsSender {
        self.sender.clone()
    }

    pub fn stats(&self) -> Arc<WsStats> {
        self.stats.clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.sender.set_state(state);
        if previous != state {
            tracing::info!("[{}] {:?} -> {:?}", self.config.name, previous, state);
        }
    }

    /// Run until shutdown.
    pub fn run(mut self) {
        tracing::info!(
            "[{}] WebSocket client started for {}:{}{}",
            self.config.name,
            self.endpoint.host,
            self.endpoint.port,
            self.endpoint.path
        );

        while !self.shutdown.is_triggered() {
            let result = self.connect().and_then(|_| self.session());

            self.set_state(ConnectionState::Closing);
            if let Some(mut conn) = self.sender.detach() {
                conn.close();
            }
            self.handler.on_close();
            self.set_state(ConnectionState::Disconnected);

            match result {
                Err(e) if e.is_interrupted() => break,
                Err(WsError::Closed) => {
                    tracing::info!("[{}] Closed by server", self.config.name);
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("[{}] Connection lost: {}", self.config.name, e);
                }
                Ok(()) => {}
            }

            self.shutdown.sleep(self.config.reconnect_delay);
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("[{}] WebSocket client stopped", self.config.name);
    }

    fn connect(&mut self) -> Result<(), WsError> {
        self.set_state(ConnectionState::Connecting);
        let mut conn = self.connector.connect(&self.endpoint, &self.shutdown)?;

        self.set_state(ConnectionState::Handshaking);
        if let Err(e) = handshake::perform(&mut conn, &self.endpoint, &self.shutdown) {
            conn.close();
            return Err(e);
        }

        self.sender.attach(Box::new(conn));
        self.stats.connects.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);
        self.handler.on_open(&self.sender)
    }

    /// Read and dispatch frames until the connection ends.
    fn session(&mut self) -> Result<(), WsError> {
        let max = self.config.max_message_size;
        let mut decoder = FrameDecoder::new(max);
        let mut assembler = MessageAssembler::new(WS_INITIAL_BUFFER, max);
        let mut buf = vec![0u8; READ_CHUNK];
        let mut last_tick = Instant::now();

        loop {
            if self.shutdown.is_triggered() {
                return Err(NetworkError::Interrupted.into());
            }
            if last_tick.elapsed() >= TICK_INTERVAL {
                last_tick = Instant::now();
                self.handler.on_tick(&self.sender)?;
            }

            match self.sender.read(&mut buf)? {
                None => {
                    self.shutdown.sleep(WOULD_BLOCK_SLEEP);
                    continue;
                }
                Some(0) => return Err(NetworkError::PeerClosed.into()),
                Some(n) => decoder.push(&buf[..n]),
            }

            while let Some(frame) = decoder.next_frame()? {
                self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                match frame.opcode {
                    OpCode::Ping => {
                        tracing::trace!("[{}] ping ({} bytes)", self.config.name, frame.payload.len());
                        self.sender.send_frame(&Frame::pong(frame.payload))?;
                    }
                    OpCode::Pong => {}
                    OpCode::Close => {
                        let _ = self.sender.send_frame(&Frame::close());
                        return Err(WsError::Closed);
                    }
                    _ => match assembler.push(frame)? {
                        Some(Message::Text(text)) => {
                            self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                            self.handler.on_text(&text, &self.sender)?;
                        }
                        Some(Message::Binary(data)) => {
                            self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                "[{}] ignoring {}-byte binary message",
                                self.config.name,
                                data.len()
                            );
                        }
                        None => {}
                    },
                }
            }
        }
    }
}
