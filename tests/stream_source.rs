//! Stream source against scripted connections

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{wait_until, ScriptedConnector, ScriptedStream, Step};
use netradio::config::StreamConfig;
use netradio::network::{SourceState, StreamSource};
use netradio::ring::ByteRing;
use netradio::sync::Shutdown;

fn config() -> StreamConfig {
    StreamConfig {
        url: "http://radio.test:8000/live.ogg".to_string(),
        user_agent: "netradio-test".to_string(),
        ring_capacity: 64 * 1024,
        chunk_size: 512,
        connect_retry_ms: 10,
        reconnect_delay_ms: 10,
    }
}

fn drain(ring: &ByteRing) -> Vec<u8> {
    let mut out = vec![0u8; ring.available()];
    let n = ring.pop(&mut out);
    out.truncate(n);
    out
}

#[test]
fn test_body_after_stalls_and_header_remainder() {
    let body: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let mut first = b"HTTP/1.0 200 OK\r\nContent-Type: audio/ogg\r\n\r\n".to_vec();
    first.extend_from_slice(&body[..100]);

    let (stream, written) = ScriptedStream::new(vec![
        Step::WouldBlock(50),
        Step::Data(first),
        Step::WouldBlock(3),
        Step::Data(body[100..].to_vec()),
        Step::Eof,
    ]);
    let connector = ScriptedConnector::default();
    connector.push(stream);

    let ring = Arc::new(ByteRing::new(64 * 1024));
    let shutdown = Shutdown::new();
    let source = StreamSource::new(connector.clone(), config(), ring.clone(), shutdown.clone())
        .unwrap();
    let stats = source.stats();
    let handle = thread::spawn(move || source.run());

    assert!(wait_until(Duration::from_secs(5), || ring.available() == body.len()));
    // The script is exhausted, so the source keeps retrying
    assert!(wait_until(Duration::from_secs(5), || stats.failures() >= 1));

    shutdown.trigger();
    handle.join().unwrap();

    assert_eq!(drain(&ring), body);
    assert!(ring.is_eof());
    assert_eq!(stats.connects(), 1);
    assert_eq!(stats.bytes_received(), body.len() as u64);
    assert_eq!(stats.state(), SourceState::Disconnected);

    let request = String::from_utf8(written.lock().clone()).unwrap();
    assert!(request.starts_with("GET /live.ogg HTTP/1.0\r\n"));
    assert!(request.contains("Host: radio.test:8000\r\n"));
    assert!(request.ends_with("\r\n\r\n"));
}

#[test]
fn test_error_status_is_not_streamed() {
    let (stream, _) = ScriptedStream::new(vec![Step::Data(
        b"HTTP/1.1 404 Not Found\r\n\r\nnot here".to_vec(),
    )]);
    let connector = ScriptedConnector::default();
    connector.push(stream);

    let ring = Arc::new(ByteRing::new(4096));
    let shutdown = Shutdown::new();
    let source = StreamSource::new(connector.clone(), config(), ring.clone(), shutdown.clone())
        .unwrap();
    let stats = source.stats();
    let handle = thread::spawn(move || source.run());

    assert!(wait_until(Duration::from_secs(5), || connector.attempts() >= 2));
    shutdown.trigger();
    handle.join().unwrap();

    assert!(ring.is_empty());
    assert_eq!(stats.connects(), 0);
    assert!(stats.failures() >= 2);
}

#[test]
fn test_reconnects_after_clean_end() {
    let connector = ScriptedConnector::default();
    for part in [&b"first"[..], &b"second"[..]] {
        let mut response = b"ICY 200 OK\r\n\r\n".to_vec();
        response.extend_from_slice(part);
        let (stream, _) = ScriptedStream::new(vec![Step::Data(response), Step::Eof]);
        connector.push(stream);
    }

    let ring = Arc::new(ByteRing::new(4096));
    let shutdown = Shutdown::new();
    let source = StreamSource::new(connector.clone(), config(), ring.clone(), shutdown.clone())
        .unwrap();
    let stats = source.stats();
    let handle = thread::spawn(move || source.run());

    assert!(wait_until(Duration::from_secs(5), || stats.connects() == 2));
    assert!(wait_until(Duration::from_secs(5), || ring.available() == 11));
    shutdown.trigger();
    handle.join().unwrap();

    assert_eq!(drain(&ring), b"firstsecond");
}

#[test]
fn test_shutdown_interrupts_stalled_connection() {
    // Header never completes
    let (stream, _) = ScriptedStream::new(vec![Step::Data(b"HTTP/1.0 200 OK\r\n".to_vec())]);
    let connector = ScriptedConnector::default();
    connector.push(stream);

    let ring = Arc::new(ByteRing::new(4096));
    let shutdown = Shutdown::new();
    let source =
        StreamSource::new(connector, config(), ring.clone(), shutdown.clone()).unwrap();
    let handle = thread::spawn(move || source.run());

    thread::sleep(Duration::from_millis(50));
    let started = std::time::Instant::now();
    shutdown.trigger();
    handle.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(ring.is_eof());
}

#[test]
fn test_failed_connect_waits_only_retry_delay() {
    let connector = ScriptedConnector::default();
    let config = StreamConfig {
        connect_retry_ms: 10,
        reconnect_delay_ms: 5_000,
        ..config()
    };

    let ring = Arc::new(ByteRing::new(4096));
    let shutdown = Shutdown::new();
    let source = StreamSource::new(connector.clone(), config, ring, shutdown.clone()).unwrap();
    let stats = source.stats();
    let handle = thread::spawn(move || source.run());

    // Every attempt is refused; none should wait out the reconnect delay
    assert!(wait_until(Duration::from_secs(2), || connector.attempts() >= 3));
    shutdown.trigger();
    handle.join().unwrap();

    assert_eq!(stats.connects(), 0);
    assert!(stats.failures() >= 3);
}
