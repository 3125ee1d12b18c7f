//! HTTP Upgrade handshake
//!
//! The response head is read one byte at a time so that no frame bytes
//! following it are consumed. The server's `Sec-WebSocket-Accept` is not
//! checked.

use std::io::{Read, Write};
use std::time::Instant;

use crate::constants::{MAX_HTTP_HEADER, WS_HANDSHAKE_TIMEOUT};
use crate::error::WsError;
use crate::network::http::{parse_status, Endpoint};
use crate::network::transport::{read_exact, write_all};
use crate::sync::Shutdown;

/// Fixed client nonce
pub const WS_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

pub fn upgrade_request(endpoint: &Endpoint) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        endpoint.path,
        endpoint.host_header(),
        WS_KEY
    )
}

/// Matches `\r\n\r\n` over a byte stream.
#[derive(Debug, Default)]
pub struct HeaderTerminator {
    matched: u8,
}

impl HeaderTerminator {
    /// Feed one byte; true once the terminator is complete.
    pub fn feed(&mut self, byte: u8) -> bool {
        self.matched = match (self.matched, byte) {
            (0, b'\r') | (2, b'\r') => self.matched + 1,
            (1, b'\n') | (3, b'\n') => self.matched + 1,
            (_, b'\r') => 1,
            _ => 0,
        };
        self.matched == 4
    }
}

/// Send the upgrade request and consume the response head.
///
/// Returns the raw head; the status must be `101`.
pub fn perform<S: Read + Write + ?Sized>(
    stream: &mut S,
    endpoint: &Endpoint,
    shutdown: &Shutdown,
) -> Result<Vec<u8>, WsError> {
    let request = upgrade_request(endpoint);
    write_all(
        stream,
        request.as_bytes(),
        shutdown,
        Some(Instant::now() + WS_HANDSHAKE_TIMEOUT),
    )?;

    let deadline = Some(Instant::now() + WS_HANDSHAKE_TIMEOUT);
    let mut terminator = HeaderTerminator::default();
    let mut head = Vec::with_capacity(512);
    let mut byte = [0u8; 1];

    loop {
        read_exact(stream, &mut byte, shutdown, deadline)?;
        head.push(byte[0]);
        if terminator.feed(byte[0]) {
            break;
        }
        if head.len() > MAX_HTTP_HEADER {
            return Err(WsError::Handshake("response head too long".into()));
        }
    }

    let status = parse_status(&head).map_err(|e| WsError::Handshake(e.to_string()))?;
    if status != 101 {
        return Err(WsError::Handshake(format!("unexpected status {}", status)));
    }
    Ok(head)
}
