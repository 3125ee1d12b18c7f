//! Secure byte transport
//!
//! The pipeline only needs a connected byte stream whose reads and writes
//! may report `io::ErrorKind::WouldBlock`. [`Connector`] produces such
//! streams; [`NetConnector`] is the real one (socket2 + rustls), tests
//! substitute scripted in-memory streams.
//!
//! The helpers at the bottom turn would-block results into short,
//! interruptible sleeps so callers never spin and never block past a
//! shutdown request.

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown as NetShutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::WOULD_BLOCK_SLEEP;
use crate::error::NetworkError;
use crate::network::http::Endpoint;
use crate::sync::Shutdown;

/// TCP connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket read timeout once connected; expiry surfaces as would-block
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// TLS handshake would-block retries before giving up
const MAX_HANDSHAKE_RETRIES: u32 = 500;

/// A connected byte stream
pub trait Transport: Read + Write + Send {
    /// Tear the connection down. Dropping also closes it; this variant
    /// lets the peer see an orderly close.
    fn close(&mut self) {}
}

/// Opens transports to an endpoint
pub trait Connector: Send + Sync {
    type Stream: Transport + 'static;

    /// Open a connection. Slow steps give up once `shutdown` triggers.
    fn connect(
        &self,
        endpoint: &Endpoint,
        shutdown: &Shutdown,
    ) -> Result<Self::Stream, NetworkError>;
}

/// Returns true for the transport's "try again" results.
pub fn is_would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// TCP or TLS-over-TCP stream
pub enum NetStream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = match self {
            NetStream::Plain(tcp) => tcp.read(buf),
            NetStream::Tls(tls) => tls.read(buf),
        };
        // Normalize platform differences in read-timeout reporting.
        result.map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                io::Error::from(io::ErrorKind::WouldBlock)
            } else {
                e
            }
        })
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            NetStream::Plain(tcp) => tcp.write(buf),
            NetStream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            NetStream::Plain(tcp) => tcp.flush(),
            NetStream::Tls(tls) => tls.flush(),
        }
    }
}

impl Transport for NetStream {
    fn close(&mut self) {
        match self {
            NetStream::Plain(tcp) => {
                let _ = tcp.shutdown(NetShutdown::Both);
            }
            NetStream::Tls(tls) => {
                tls.conn.send_close_notify();
                let _ = tls.flush();
                let _ = tls.sock.shutdown(NetShutdown::Both);
            }
        }
    }
}

/// Default connector: plain TCP for `http`/`ws`, rustls for `https`/`wss`
#[derive(Clone)]
pub struct NetConnector {
    tls: Arc<ClientConfig>,
}

impl NetConnector {
    pub fn new() -> Result<Self, NetworkError> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| NetworkError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self {
            tls: Arc::new(config),
        })
    }

    fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, NetworkError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::ConnectionFailed(format!("resolve {}: {}", host, e)))?;

        let mut last_err = None;
        for addr in addrs {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
            match socket.connect_timeout(&SockAddr::from(addr), CONNECT_TIMEOUT) {
                Ok(()) => {
                    socket
                        .set_nodelay(true)
                        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
                    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
                    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
                        tracing::debug!("keepalive not applied: {}", e);
                    }
                    socket
                        .set_write_timeout(Some(CONNECT_TIMEOUT))
                        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
                    socket
                        .set_read_timeout(Some(POLL_TIMEOUT))
                        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
                    return Ok(socket.into());
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(NetworkError::ConnectionFailed(match last_err {
            Some(e) => format!("{}:{}: {}", host, port, e),
            None => format!("{}:{}: no addresses", host, port),
        }))
    }

    fn handshake(
        &self,
        host: &str,
        mut tcp: TcpStream,
        shutdown: &Shutdown,
    ) -> Result<StreamOwned<ClientConnection, TcpStream>, NetworkError> {
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| NetworkError::Tls(format!("invalid server name {}: {}", host, e)))?;
        let mut conn = ClientConnection::new(self.tls.clone(), name)
            .map_err(|e| NetworkError::Tls(e.to_string()))?;

        let mut retries = 0;
        while conn.is_handshaking() {
            if shutdown.is_triggered() {
                return Err(NetworkError::Interrupted);
            }
            match conn.complete_io(&mut tcp) {
                Ok(_) => {}
                Err(e) if is_would_block(&e) => {
                    retries += 1;
                    if retries > MAX_HANDSHAKE_RETRIES {
                        return Err(NetworkError::Timeout);
                    }
                    shutdown.sleep(WOULD_BLOCK_SLEEP);
                }
                Err(e) => return Err(NetworkError::Tls(e.to_string())),
            }
        }

        Ok(StreamOwned::new(conn, tcp))
    }
}

impl Connector for NetConnector {
    type Stream = NetStream;

    fn connect(&self, endpoint: &Endpoint, shutdown: &Shutdown) -> Result<NetStream, NetworkError> {
        let tcp = Self::connect_tcp(&endpoint.host, endpoint.port)?;
        if !endpoint.secure {
            return Ok(NetStream::Plain(tcp));
        }
        let tls = self.handshake(&endpoint.host, tcp, shutdown)?;
        tracing::debug!("TLS established with {}:{}", endpoint.host, endpoint.port);
        Ok(NetStream::Tls(Box::new(tls)))
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), NetworkError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(NetworkError::Timeout),
        _ => Ok(()),
    }
}

/// Read whatever is available (at least one byte), retrying would-block.
///
/// Returns `Ok(0)` on orderly peer close.
pub fn read_some<S: Read + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    shutdown: &Shutdown,
    deadline: Option<Instant>,
) -> Result<usize, NetworkError> {
    loop {
        if shutdown.is_triggered() {
            return Err(NetworkError::Interrupted);
        }
        match stream.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if is_would_block(&e) => {
                check_deadline(deadline)?;
                shutdown.sleep(WOULD_BLOCK_SLEEP);
            }
            Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }
}

/// Fill `buf` completely, retrying would-block.
pub fn read_exact<S: Read + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    shutdown: &Shutdown,
    deadline: Option<Instant>,
) -> Result<(), NetworkError> {
    let mut got = 0;
    while got < buf.len() {
        match read_some(stream, &mut buf[got..], shutdown, deadline)? {
            0 => return Err(NetworkError::PeerClosed),
            n => got += n,
        }
    }
    Ok(())
}

/// Write all of `data`, retrying would-block.
pub fn write_all<S: Write + ?Sized>(
    stream: &mut S,
    data: &[u8],
    shutdown: &Shutdown,
    deadline: Option<Instant>,
) -> Result<(), NetworkError> {
    let mut written = 0;
    while written < data.len() {
        if shutdown.is_triggered() {
            return Err(NetworkError::Interrupted);
        }
        match stream.write(&data[written..]) {
            Ok(0) => return Err(NetworkError::PeerClosed),
            Ok(n) => written += n,
            Err(e) if is_would_block(&e) => {
                check_deadline(deadline)?;
                shutdown.sleep(WOULD_BLOCK_SLEEP);
            }
            Err(e) => return Err(NetworkError::SendFailed(e.to_string())),
        }
    }
    loop {
        match stream.flush() {
            Ok(()) => return Ok(()),
            Err(e) if is_would_block(&e) => {
                check_deadline(deadline)?;
                if !shutdown.sleep(WOULD_BLOCK_SLEEP) {
                    return Err(NetworkError::Interrupted);
                }
            }
            Err(e) => return Err(NetworkError::SendFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Yields would-block `stalls` times before each chunk.
    struct Stalling {
        chunks: VecDeque<Vec<u8>>,
        stalls: usize,
        pending: usize,
        written: Vec<u8>,
    }

    impl Stalling {
        fn new(chunks: &[&[u8]], stalls: usize) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                stalls,
                pending: stalls,
                written: Vec::new(),
            }
        }
    }

    impl Read for Stalling {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending > 0 {
                self.pending -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.pending = self.stalls;
            match self.chunks.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk.split_off(n));
                    }
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    impl Write for Stalling {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.pending > 0 {
                self.pending -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.pending = self.stalls;
            // Short writes: at most 3 bytes at a time
            let n = buf.len().min(3);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_exact_across_stalls_and_short_reads() {
        let shutdown = Shutdown::new();
        let mut stream = Stalling::new(&[b"he", b"llo", b" world"], 3);
        let mut buf = [0u8; 8];
        read_exact(&mut stream, &mut buf, &shutdown, None).unwrap();
        assert_eq!(&buf, b"hello wo");
    }

    #[test]
    fn test_read_exact_reports_peer_close() {
        let shutdown = Shutdown::new();
        let mut stream = Stalling::new(&[b"ab"], 0);
        let mut buf = [0u8; 4];
        let err = read_exact(&mut stream, &mut buf, &shutdown, None).unwrap_err();
        assert!(matches!(err, NetworkError::PeerClosed));
    }

    #[test]
    fn test_write_all_handles_short_writes() {
        let shutdown = Shutdown::new();
        let mut stream = Stalling::new(&[], 2);
        write_all(&mut stream, b"GET / HTTP/1.0\r\n\r\n", &shutdown, None).unwrap();
        assert_eq!(stream.written, b"GET / HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn test_deadline_expires_on_endless_would_block() {
        let shutdown = Shutdown::new();
        let mut stream = Stalling::new(&[b"x"], usize::MAX);
        let mut buf = [0u8; 1];
        let deadline = Some(Instant::now() + Duration::from_millis(30));
        let err = read_some(&mut stream, &mut buf, &shutdown, deadline).unwrap_err();
        assert!(matches!(err, NetworkError::Timeout));
    }

    #[test]
    fn test_shutdown_interrupts_read() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut stream = Stalling::new(&[b"x"], 0);
        let mut buf = [0u8; 1];
        let err = read_some(&mut stream, &mut buf, &shutdown, None).unwrap_err();
        assert!(err.is_interrupted());
    }

    #[test]
    fn test_shutdown_interrupts_tls_handshake() {
        // Accepts at the kernel level but never answers the ClientHello
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::parse(&format!("wss://localhost:{}/", port)).unwrap();

        let shutdown = Shutdown::new();
        let trigger = {
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                shutdown.trigger();
            })
        };

        let started = Instant::now();
        let result = NetConnector::new().unwrap().connect(&endpoint, &shutdown);
        trigger.join().unwrap();

        assert!(matches!(result, Err(NetworkError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(listener);
    }
}
