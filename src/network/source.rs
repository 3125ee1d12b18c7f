//! Network → stream ring producer
//!
//! Runs on its own thread: connects, issues the HTTP request and copies
//! the response body into the stream ring until the connection ends,
//! then reconnects. Bytes that arrive together with the response header
//! are pushed before the copy loop starts so nothing is lost.

use std::io::Read;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::StreamConfig;
use crate::constants::{HTTP_HEAD_TIMEOUT, STREAM_YIELD, WOULD_BLOCK_SLEEP};
use crate::error::NetworkError;
use crate::network::http::{self, Endpoint};
use crate::network::transport::{is_would_block, Connector, Transport};
use crate::ring::SharedByteRing;
use crate::sync::Shutdown;

/// Connection state of the stream source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceState {
    Disconnected = 0,
    Connecting = 1,
    Streaming = 2,
}

impl SourceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SourceState::Connecting,
            2 => SourceState::Streaming,
            _ => SourceState::Disconnected,
        }
    }
}

/// Counters readable from other threads
#[derive(Debug, Default)]
pub struct SourceStats {
    state: AtomicU8,
    connects: AtomicU64,
    failures: AtomicU64,
    bytes_received: AtomicU64,
}

impl SourceStats {
    pub fn state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

/// Stream source driving the compressed-byte ring
pub struct StreamSource<C: Connector> {
    connector: C,
    endpoint: Endpoint,
    config: StreamConfig,
    ring: SharedByteRing,
    shutdown: Arc<Shutdown>,
    stats: Arc<SourceStats>,
}

impl<C: Connector> StreamSource<C> {
    pub fn new(
        connector: C,
        config: StreamConfig,
        ring: SharedByteRing,
        shutdown: Arc<Shutdown>,
    ) -> Result<Self, NetworkError> {
        let endpoint = Endpoint::parse(&config.url)?;
        Ok(Self {
            connector,
            endpoint,
            config,
            ring,
            shutdown,
            stats: Arc::new(SourceStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<SourceStats> {
        self.stats.clone()
    }

    fn set_state(&self, state: SourceState) {
        let previous = self.stats.state.swap(state as u8, Ordering::Relaxed);
        if previous != state as u8 {
            tracing::info!(
                "Stream source {:?} -> {:?}",
                SourceState::from_u8(previous),
                state
            );
        }
    }

    /// Run until shutdown. Marks the ring end-of-stream on exit.
    pub fn run(self) {
        tracing::info!(
            "Stream source started for {}:{}{}",
            self.endpoint.host,
            self.endpoint.port,
            self.endpoint.path
        );

        while !self.shutdown.is_triggered() {
            self.set_state(SourceState::Connecting);

            match self.connect() {
                Ok((mut conn, body_start)) => {
                    self.stats.connects.fetch_add(1, Ordering::Relaxed);
                    self.set_state(SourceState::Streaming);

                    let result = self.forward(&body_start).and_then(|_| self.copy_loop(&mut conn));
                    conn.close();

                    match result {
                        Ok(()) => tracing::info!("Stream ended by peer"),
                        Err(e) if e.is_interrupted() => {}
                        Err(e) => {
                            self.stats.failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("Stream connection lost: {}", e);
                        }
                    }
                    self.set_state(SourceState::Disconnected);
                }
                Err(e) if e.is_interrupted() => break,
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Stream connect failed: {}", e);
                    self.set_state(SourceState::Disconnected);
                    self.shutdown.sleep(self.config.connect_retry());
                    continue;
                }
            }

            if !self.shutdown.is_triggered() {
                self.shutdown.sleep(self.config.reconnect_delay());
            }
        }

        self.set_state(SourceState::Disconnected);
        self.ring.set_eof();
        self.ring.wake_all();
        tracing::info!("Stream source stopped");
    }

    /// Connect and consume the response head.
    ///
    /// Returns the open connection and any body bytes already read.
    fn connect(&self) -> Result<(C::Stream, Vec<u8>), NetworkError> {
        let mut conn = self.connector.connect(&self.endpoint, &self.shutdown)?;
        let request = http::stream_request(&self.endpoint, &self.config.user_agent);
        let deadline = Some(Instant::now() + HTTP_HEAD_TIMEOUT);

        match http::request(&mut conn, &request, &self.shutdown, deadline) {
            Ok(response) if (200..300).contains(&response.status) => {
                tracing::debug!(
                    "Stream response {} ({} header bytes, {} body bytes)",
                    response.status,
                    response.head.len(),
                    response.body_start.len()
                );
                Ok((conn, response.body_start))
            }
            Ok(response) => {
                conn.close();
                Err(NetworkError::HttpStatus(response.status))
            }
            Err(e) => {
                conn.close();
                Err(e)
            }
        }
    }

    fn forward(&self, data: &[u8]) -> Result<(), NetworkError> {
        if data.is_empty() {
            return Ok(());
        }
        let pushed = self.ring.push_all(data, &self.shutdown);
        self.stats
            .bytes_received
            .fetch_add(pushed as u64, Ordering::Relaxed);
        if pushed < data.len() {
            return Err(NetworkError::Interrupted);
        }
        Ok(())
    }

    fn copy_loop(&self, conn: &mut C::Stream) -> Result<(), NetworkError> {
        let mut buf = vec![0u8; self.config.chunk_size];
        loop {
            if self.shutdown.is_triggered() {
                return Err(NetworkError::Interrupted);
            }

            match conn.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    self.forward(&buf[..n])?;
                    self.shutdown.sleep(STREAM_YIELD);
                }
                Err(e) if is_would_block(&e) => {
                    tracing::trace!("stream read would block");
                    self.shutdown.sleep(WOULD_BLOCK_SLEEP);
                }
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
            }
        }
    }
}
