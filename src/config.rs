//! Application configuration
//!
//! Loaded once from a TOML file in the platform config directory and
//! handed to each subsystem at start-up. Missing keys fall back to the
//! defaults below.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub decoder: DecoderConfig,
    pub playback: PlaybackConfig,
    pub chat: ChatConfig,
    pub metadata: MetadataConfig,
}

/// Audio stream source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// `https://host[:port]/path` of the Ogg/Opus stream
    pub url: String,
    pub user_agent: String,
    pub ring_capacity: usize,
    pub chunk_size: usize,
    pub connect_retry_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "https://radio.blueberry.coffee/3ds.ogg".to_string(),
            user_agent: concat!("netradio/", env!("CARGO_PKG_VERSION")).to_string(),
            ring_capacity: STREAM_RING_CAPACITY,
            chunk_size: NET_CHUNK_SIZE,
            connect_retry_ms: CONNECT_RETRY_DELAY.as_millis() as u64,
            reconnect_delay_ms: STREAM_RECONNECT_DELAY.as_millis() as u64,
        }
    }
}

impl StreamConfig {
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Decoder stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub pcm_ring_capacity: usize,
    pub retry_delay_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            pcm_ring_capacity: PCM_RING_CAPACITY,
            retry_delay_ms: DECODE_RETRY_DELAY.as_millis() as u64,
        }
    }
}

/// Hardware playback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device id as reported by `audio::device::list_output_devices`;
    /// `None` picks the default output
    pub device_id: Option<String>,
    pub slot_count: usize,
    pub slot_frames: usize,
    pub wait_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            slot_count: PLAYBACK_SLOTS,
            slot_frames: SLOT_FRAMES,
            wait_timeout_ms: FEEDER_WAIT.as_millis() as u64,
        }
    }
}

/// Masking key policy for outbound WebSocket frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    /// All-zero key: mask bit set, payload unchanged on the wire
    #[default]
    Zero,
    /// Fresh random key per frame
    Random,
}

/// Chat WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub enabled: bool,
    /// `wss://host/path` of the Socket.IO endpoint
    pub url: String,
    /// Display name; generated when empty
    pub username: String,
    pub user_color: String,
    pub mask_mode: MaskMode,
    pub reconnect_delay_ms: u64,
    pub max_message_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "wss://tripletail-socket.blueberry.coffee/socket.io/?EIO=4&transport=websocket"
                .to_string(),
            username: String::new(),
            user_color: "#00ffff".to_string(),
            mask_mode: MaskMode::Zero,
            reconnect_delay_ms: WS_RECONNECT_DELAY.as_millis() as u64,
            max_message_size: WS_MAX_MESSAGE,
        }
    }
}

/// Now-playing WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub enabled: bool,
    pub url: String,
    /// Station short name used in the subscription message
    pub station: String,
    pub mask_mode: MaskMode,
    pub refresh_interval_ms: u64,
    pub max_message_size: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "wss://tripletaildash.blueberry.coffee/api/live/nowplaying/websocket".to_string(),
            station: "tripletail".to_string(),
            mask_mode: MaskMode::Zero,
            refresh_interval_ms: METADATA_REFRESH_INTERVAL.as_millis() as u64,
            max_message_size: WS_MAX_MESSAGE,
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("coffee", "blueberry", "netradio")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from the default location.
    pub fn load_default() -> Result<Self, Error> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.stream.ring_capacity == 0 || self.decoder.pcm_ring_capacity == 0 {
            return Err(Error::Config("ring capacities must be non-zero".into()));
        }
        if self.stream.chunk_size == 0 {
            return Err(Error::Config("stream.chunk_size must be non-zero".into()));
        }
        if self.playback.slot_count == 0 || self.playback.slot_frames == 0 {
            return Err(Error::Config("playback slots must be non-empty".into()));
        }
        let slot_bytes = self.playback.slot_frames * BYTES_PER_FRAME;
        if slot_bytes > self.decoder.pcm_ring_capacity {
            return Err(Error::Config(format!(
                "playback slot ({} bytes) larger than PCM ring ({} bytes)",
                slot_bytes, self.decoder.pcm_ring_capacity
            )));
        }
        // The pump waits for room for a worst-case chunk while the feeder
        // waits for a full slot; both must fit at once.
        let chunk_bytes = MAX_DECODE_FRAMES * BYTES_PER_FRAME;
        if slot_bytes + chunk_bytes > self.decoder.pcm_ring_capacity {
            return Err(Error::Config(format!(
                "PCM ring ({} bytes) must hold a playback slot ({} bytes) plus a decode chunk ({} bytes)",
                self.decoder.pcm_ring_capacity, slot_bytes, chunk_bytes
            )));
        }
        Ok(())
    }
}
