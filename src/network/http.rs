//! Minimal HTTP/1.x client pieces: URL split, request line, response head

use std::io::{Read, Write};
use std::time::Instant;

use crate::constants::MAX_HTTP_HEADER;
use crate::error::NetworkError;
use crate::network::transport::{read_some, write_all};
use crate::sync::Shutdown;

/// Where to connect and what to request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with `/`
    pub path: String,
}

impl Endpoint {
    /// Parse `scheme://host[:port][/path]` for http, https, ws and wss.
    pub fn parse(url: &str) -> Result<Self, NetworkError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| NetworkError::InvalidUrl(url.to_string()))?;

        let (secure, default_port) = match scheme.to_ascii_lowercase().as_str() {
            "https" | "wss" => (true, 443),
            "http" | "ws" => (false, 80),
            _ => return Err(NetworkError::InvalidUrl(format!("unsupported scheme in {}", url))),
        };

        let (authority, path) = match rest.find(['/', '?']) {
            Some(idx) if rest.as_bytes()[idx] == b'/' => (&rest[..idx], rest[idx..].to_string()),
            Some(idx) => (&rest[..idx], format!("/{}", &rest[idx..])),
            None => (rest, "/".to_string()),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !host.starts_with('[') || host.ends_with(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| NetworkError::InvalidUrl(format!("bad port in {}", url)))?;
                (host, port)
            }
            _ => (authority, default_port),
        };

        if host.is_empty() || host.len() > 255 {
            return Err(NetworkError::InvalidUrl(format!("bad host in {}", url)));
        }

        Ok(Self {
            secure,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            path,
        })
    }

    /// Value for the `Host` header
    pub fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// `GET` request for a continuous audio stream
pub fn stream_request(endpoint: &Endpoint, user_agent: &str) -> String {
    format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\n\r\n",
        endpoint.path,
        endpoint.host_header(),
        user_agent
    )
}

/// Offset just past the first `\r\n\r\n`, searching from `from`.
pub fn find_header_end(buf: &[u8], from: usize) -> Option<usize> {
    let start = from.min(buf.len());
    buf[start..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| start + pos + 4)
}

/// Status code from an `HTTP/1.x NNN` or `ICY NNN` status line.
pub fn parse_status(head: &[u8]) -> Result<u16, NetworkError> {
    let line_end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(head.len());
    let line = String::from_utf8_lossy(&head[..line_end]);
    let mut parts = line.split_whitespace();

    let version = parts.next().unwrap_or_default();
    if !(version.starts_with("HTTP/") || version == "ICY") {
        return Err(NetworkError::BadResponse(line.to_string()));
    }
    parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| NetworkError::BadResponse(line.to_string()))
}

/// Response head plus any body bytes that arrived in the same reads
pub struct ResponseHead {
    pub status: u16,
    pub head: Vec<u8>,
    pub body_start: Vec<u8>,
}

/// Send `request` and read until the header terminator.
pub fn request<S: Read + Write + ?Sized>(
    stream: &mut S,
    request: &str,
    shutdown: &Shutdown,
    deadline: Option<Instant>,
) -> Result<ResponseHead, NetworkError> {
    write_all(stream, request.as_bytes(), shutdown, deadline)?;

    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = read_some(stream, &mut chunk, shutdown, deadline)?;
        if n == 0 {
            return Err(NetworkError::PeerClosed);
        }
        let searched = head.len().saturating_sub(3);
        head.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_header_end(&head, searched) {
            let body_start = head.split_off(end);
            let status = parse_status(&head)?;
            return Ok(ResponseHead {
                status,
                head,
                body_start,
            });
        }
        if head.len() > MAX_HTTP_HEADER {
            return Err(NetworkError::BadResponse(format!(
                "no header terminator in {} bytes",
                head.len()
            )));
        }
    }
}
