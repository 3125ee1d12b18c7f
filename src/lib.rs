//! # netradio
//!
//! Internet radio client: streams a compressed audio feed over TLS,
//! decodes it and keeps a hardware output fed in real time, while two
//! WebSocket connections carry live chat and now-playing metadata.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              AUDIO PIPELINE                              │
//! │                                                                          │
//! │  ┌──────────────┐   ┌───────────────┐   ┌─────────────┐   ┌───────────┐  │
//! │  │ StreamSource │──▶│ ByteRing      │──▶│ DecodePump  │──▶│ ByteRing  │  │
//! │  │ (TLS + HTTP) │   │ (Ogg bytes)   │   │ (Ogg/Opus)  │   │ (PCM i16) │  │
//! │  └──────────────┘   └───────────────┘   └─────────────┘   └─────┬─────┘  │
//! │    stream-source          512 KB           decoder          192 KB│      │
//! │                                                                   ▼      │
//! │                                         ┌──────────────────────────────┐ │
//! │                                         │ AudioFeeder ─▶ slots ─▶ cpal │ │
//! │                                         └──────────────────────────────┘ │
//! │                                                  audio-feeder            │
//! └──────────────────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               WEBSOCKETS                                 │
//! │  ┌──────────┐  frames  ┌───────────────┐  text  ┌───────────────────────┐ │
//! │  │ WsClient │─────────▶│ SocketIo/Plain│───────▶│ ChatStore / NowPlaying│ │
//! │  │ (TLS)    │◀─────────│ session       │        └───────────────────────┘ │
//! │  └──────────┘  WsSender└───────────────┘                                 │
//! │    chat-ws, metadata-ws                                                  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every thread polls one [`sync::Shutdown`] flag; triggering it wakes all
//! registered wait primitives so the threads exit promptly.

pub mod audio;
pub mod chat;
pub mod codec;
pub mod config;
pub mod error;
pub mod metadata;
pub mod network;
pub mod player;
pub mod ring;
pub mod sync;
pub mod ws;

pub use error::{Error, Result};
pub use player::Radio;

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Output sample rate (Opus always decodes at 48 kHz)
    pub const SAMPLE_RATE: u32 = 48000;

    /// Output channel count (interleaved stereo)
    pub const CHANNELS: u16 = 2;

    /// Bytes per interleaved sample frame (stereo i16)
    pub const BYTES_PER_FRAME: usize = CHANNELS as usize * 2;

    /// Compressed stream ring capacity
    pub const STREAM_RING_CAPACITY: usize = 512 * 1024;

    /// Decoded PCM ring capacity
    pub const PCM_RING_CAPACITY: usize = 192 * 1024;

    /// Network read chunk size
    pub const NET_CHUNK_SIZE: usize = 4096;

    /// Largest Opus packet duration in frames (120 ms at 48 kHz)
    pub const MAX_DECODE_FRAMES: usize = 5760;

    /// Number of hardware playback slots
    pub const PLAYBACK_SLOTS: usize = 3;

    /// Frames per playback slot (40 ms at 48 kHz)
    pub const SLOT_FRAMES: usize = 1920;

    /// Bounded feeder wait so the quit flag is observed without a signal
    pub const FEEDER_WAIT: Duration = Duration::from_millis(100);

    /// Delay before reconnecting after a failed connect
    pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

    /// Delay before reconnecting after a clean end of stream
    pub const STREAM_RECONNECT_DELAY: Duration = Duration::from_millis(100);

    /// Yield after each ring push so sibling network threads get a turn
    pub const STREAM_YIELD: Duration = Duration::from_millis(1);

    /// Sleep between retries of a would-block transport call
    pub const WOULD_BLOCK_SLEEP: Duration = Duration::from_millis(5);

    /// Sleep between decode retries
    pub const DECODE_RETRY_DELAY: Duration = Duration::from_millis(10);

    /// Upper bound for HTTP response headers
    pub const MAX_HTTP_HEADER: usize = 16 * 1024;

    /// Time allowed to send the stream request and receive its header
    pub const HTTP_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

    /// WebSocket message accumulation buffer, initial size
    pub const WS_INITIAL_BUFFER: usize = 32 * 1024;

    /// WebSocket message accumulation buffer, hard ceiling
    pub const WS_MAX_MESSAGE: usize = 128 * 1024;

    /// Handshake write/read timeout
    pub const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Delay before re-running the full WebSocket handshake
    pub const WS_RECONNECT_DELAY: Duration = Duration::from_secs(1);

    /// Maximum chat history kept
    pub const MAX_CHAT_MESSAGES: usize = 500;

    /// Metadata reconnect interval
    pub const METADATA_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
}
