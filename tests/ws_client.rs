//! WebSocket client lifecycle against scripted servers

mod common;

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{wait_until, ScriptedConnector, ScriptedStream, Step};
use netradio::chat::{ChatActions, ChatDispatcher, ChatProfile, ChatStore};
use netradio::error::WsError;
use netradio::ws::{
    ConnectionState, EventDispatcher, Frame, FrameDecoder, OpCode, PlainSession, SocketIoSession,
    WsClient, WsClientConfig,
};
use netradio::sync::Shutdown;

const SWITCHING: &[u8] =
    b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";

/// Unmasked server frame
fn server_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() < 126);
    let mut out = vec![(fin as u8) << 7 | opcode, payload.len() as u8];
    out.extend_from_slice(payload);
    out
}

/// Frames the client wrote after its upgrade request
fn client_frames(written: &[u8]) -> Vec<Frame> {
    let body = written
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
        .expect("upgrade request");
    let mut decoder = FrameDecoder::new(64 * 1024).accepting_masked();
    decoder.push(&written[body..]);
    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame().unwrap() {
        frames.push(frame);
    }
    frames
}

fn client_config() -> WsClientConfig {
    WsClientConfig {
        name: "test".to_string(),
        url: "ws://chat.test/socket.io/?EIO=4&transport=websocket".to_string(),
        reconnect_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

#[derive(Clone, Default)]
struct Recording(Arc<Mutex<Vec<String>>>);

impl EventDispatcher for Recording {
    fn dispatch(&mut self, payload: &str) {
        self.0.lock().push(payload.to_string());
    }
}

#[test]
fn test_socket_io_session_lifecycle() {
    let mut script = vec![Step::Data(SWITCHING.to_vec())];
    for frame in [
        server_frame(true, 0x1, br#"0{"sid":"abc","pingInterval":25000}"#),
        server_frame(true, 0x1, b"40"),
        server_frame(true, 0x1, b"2"),
        server_frame(true, 0x9, b"hi"),
        server_frame(true, 0x1, br#"42["chat_message",{"id":"7","user":"dj","text":"hello"}]"#),
        server_frame(true, 0x8, b""),
    ] {
        script.push(Step::Data(frame));
    }
    let (first, first_written) = ScriptedStream::new(script);
    let (second, second_written) = ScriptedStream::new(vec![Step::Data(SWITCHING.to_vec())]);

    let connector = ScriptedConnector::default();
    connector.push(first);
    connector.push(second);

    let store = ChatStore::shared();
    let shutdown = Shutdown::new();
    let client = WsClient::new(
        connector,
        client_config(),
        SocketIoSession::new(ChatDispatcher::new(store.clone())),
        shutdown.clone(),
    )
    .unwrap();
    let sender = client.sender();
    let stats = client.stats();
    let handle = thread::spawn(move || client.run());

    assert!(wait_until(Duration::from_secs(5), || stats.connects() == 2));
    // Four replies on the first connection, then "40" on the second
    assert!(wait_until(Duration::from_secs(5), || stats.frames_sent() == 5));
    assert!(sender.is_connected());
    sender.send_text("hello again").unwrap();

    shutdown.trigger();
    handle.join().unwrap();

    let message = store.lock().find("7").cloned().expect("chat message stored");
    assert_eq!(message.user, "dj");
    assert_eq!(message.text, "hello");

    let frames = client_frames(&first_written.lock());
    let summary: Vec<(OpCode, &[u8])> = frames
        .iter()
        .map(|f| (f.opcode, f.payload.as_ref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (OpCode::Text, &b"40"[..]),
            (OpCode::Text, &b"3"[..]),
            (OpCode::Pong, &b"hi"[..]),
            (OpCode::Close, &b""[..]),
        ]
    );

    let second = client_frames(&second_written.lock());
    assert_eq!(second[0].payload.as_ref(), b"40");
    assert_eq!(second[1].payload.as_ref(), b"hello again");

    assert_eq!(sender.state(), ConnectionState::Disconnected);
    assert!(matches!(sender.send_text("late"), Err(WsError::NotConnected)));
}

#[test]
fn test_rejected_handshake_retries_without_opening() {
    let (stream, written) =
        ScriptedStream::new(vec![Step::Data(b"HTTP/1.1 403 Forbidden\r\n\r\n".to_vec())]);
    let connector = ScriptedConnector::default();
    connector.push(stream);

    let events = Recording::default();
    let shutdown = Shutdown::new();
    let client = WsClient::new(
        connector.clone(),
        client_config(),
        PlainSession::new(Some("subscribe".to_string()), events.clone()),
        shutdown.clone(),
    )
    .unwrap();
    let sender = client.sender();
    let stats = client.stats();
    let handle = thread::spawn(move || client.run());

    assert!(wait_until(Duration::from_secs(5), || stats.failures() >= 2));
    assert!(matches!(sender.send_text("x"), Err(WsError::NotConnected)));
    shutdown.trigger();
    handle.join().unwrap();

    assert_eq!(stats.connects(), 0);
    assert!(connector.attempts() >= 2);
    let request = String::from_utf8(written.lock().clone()).unwrap();
    assert!(request.starts_with("GET /socket.io/?EIO=4&transport=websocket HTTP/1.1\r\n"));
    assert!(request.ends_with("\r\n\r\n"));
    assert!(events.0.lock().is_empty());
}

#[test]
fn test_plain_session_subscribes_and_reassembles() {
    let (stream, written) = ScriptedStream::new(vec![
        Step::Data(SWITCHING.to_vec()),
        Step::Data(server_frame(false, 0x1, br#"{"pub":{"song":"#)),
        // Control frames may arrive between fragments
        Step::Data(server_frame(true, 0x9, b"")),
        Step::WouldBlock(2),
        Step::Data(server_frame(true, 0x0, br#"{"title":"Blue"}}}"#)),
    ]);
    let connector = ScriptedConnector::default();
    connector.push(stream);

    let events = Recording::default();
    let shutdown = Shutdown::new();
    let client = WsClient::new(
        connector,
        client_config(),
        PlainSession::new(Some(r#"{"subs":{}}"#.to_string()), events.clone()),
        shutdown.clone(),
    )
    .unwrap();
    let stats = client.stats();
    let handle = thread::spawn(move || client.run());

    assert!(wait_until(Duration::from_secs(5), || stats.messages_received() == 1));
    shutdown.trigger();
    handle.join().unwrap();

    assert_eq!(
        events.0.lock().as_slice(),
        [r#"{"pub":{"song":{"title":"Blue"}}}"#.to_string()]
    );
    let frames = client_frames(&written.lock());
    assert_eq!(frames[0].payload.as_ref(), br#"{"subs":{}}"#);
    assert_eq!(frames[1].opcode, OpCode::Pong);
    assert_eq!(stats.frames_received(), 3);
}

#[test]
fn test_chat_actions_emit_socket_io_events() {
    let (stream, written) = ScriptedStream::new(vec![
        Step::Data(SWITCHING.to_vec()),
        Step::Data(server_frame(true, 0x1, b"40")),
    ]);
    let connector = ScriptedConnector::default();
    connector.push(stream);

    let shutdown = Shutdown::new();
    let client = WsClient::new(
        connector,
        client_config(),
        SocketIoSession::new(ChatDispatcher::new(ChatStore::shared())),
        shutdown.clone(),
    )
    .unwrap();
    let actions = ChatActions::new(
        client.sender(),
        ChatProfile {
            username: "dj".to_string(),
            user_color: "#ff8800".to_string(),
        },
    );
    let stats = client.stats();
    let handle = thread::spawn(move || client.run());

    assert!(wait_until(Duration::from_secs(5), || actions.is_connected()));
    actions.send_typing().unwrap();
    actions.add_reaction("7", "🔥").unwrap();
    assert!(wait_until(Duration::from_secs(5), || stats.frames_sent() >= 3));

    shutdown.trigger();
    handle.join().unwrap();
    assert!(matches!(actions.send_typing(), Err(WsError::NotConnected)));

    let events: Vec<serde_json::Value> = client_frames(&written.lock())
        .iter()
        .filter_map(|f| f.payload.strip_prefix(b"42"))
        .map(|json| serde_json::from_slice(json).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], serde_json::json!(["typing", { "user": "dj" }]));
    assert_eq!(events[1][0], "add_reaction");
    assert_eq!(events[1][1]["messageId"], "7");
    assert_eq!(events[1][1]["emoji"], "🔥");
}
