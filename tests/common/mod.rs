//! Scripted in-memory transports for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netradio::error::NetworkError;
use netradio::network::{Connector, Endpoint, Transport};
use netradio::sync::Shutdown;

/// One step of a scripted read side
pub enum Step {
    Data(Vec<u8>),
    WouldBlock(usize),
    Eof,
}

/// Stream that replays `steps` and records everything written to it.
///
/// Once the script runs out every read reports would-block, which keeps
/// the connection open until the caller gives up on it.
pub struct ScriptedStream {
    steps: VecDeque<Step>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedStream {
    pub fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            steps: steps.into(),
            written: written.clone(),
        };
        (stream, written)
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Step::Eof) => {
                self.steps.push_front(Step::Eof);
                Ok(0)
            }
            Some(Step::WouldBlock(n)) => {
                if n > 1 {
                    self.steps.push_front(Step::WouldBlock(n - 1));
                }
                Err(io::ErrorKind::WouldBlock.into())
            }
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.steps.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedStream {}

/// Hands out queued streams in order, then refuses to connect
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    streams: Arc<Mutex<VecDeque<ScriptedStream>>>,
    attempts: Arc<Mutex<Vec<Endpoint>>>,
}

impl ScriptedConnector {
    pub fn push(&self, stream: ScriptedStream) {
        self.streams.lock().push_back(stream);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl Connector for ScriptedConnector {
    type Stream = ScriptedStream;

    fn connect(
        &self,
        endpoint: &Endpoint,
        _shutdown: &Shutdown,
    ) -> Result<ScriptedStream, NetworkError> {
        self.attempts.lock().push(endpoint.clone());
        self.streams
            .lock()
            .pop_front()
            .ok_or_else(|| NetworkError::ConnectionFailed("connection refused".into()))
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
