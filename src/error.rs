//! Error types for the radio client

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Slot {0} is not available")]
    SlotBusy(usize),

    #[error("Output device closed")]
    Closed,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Unsupported stream: {0}")]
    Unsupported(String),

    #[error("Output buffer too small: {0} samples")]
    BufferTooSmall(usize),

    #[error("Decoder interrupted by shutdown")]
    Interrupted,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection closed by peer")]
    PeerClosed,

    #[error("Malformed HTTP response: {0}")]
    BadResponse(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Timeout")]
    Timeout,

    #[error("Interrupted by shutdown")]
    Interrupted,
}

/// WebSocket protocol and connection errors
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Reserved or unknown opcode: {0:#x}")]
    BadOpcode(u8),

    #[error("Server sent a masked frame")]
    MaskedServerFrame,

    #[error("Unsupported frame length: {0}")]
    LengthUnsupported(u64),

    #[error("Message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Connection closed by server")]
    Closed,

    #[error("Not connected")]
    NotConnected,
}

impl NetworkError {
    /// True when the operation was abandoned because shutdown was requested.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, NetworkError::Interrupted)
    }
}

impl WsError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, WsError::Network(e) if e.is_interrupted())
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
