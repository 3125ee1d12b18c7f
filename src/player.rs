//! Radio orchestration
//!
//! [`Radio`] allocates the two rings, wires every wait primitive into
//! the shared [`Shutdown`] and starts one named thread per role. Roles
//! are started most latency-sensitive first; shutdown joins producers
//! before their consumers.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioFeeder, AudioOutput, CpalOutput, FeederStats, SlotCompleter, SlotPool};
use crate::chat::{generate_username, ChatActions, ChatDispatcher, ChatProfile, ChatStore, SharedChatStore};
use crate::codec::{stream_decoder, DecodePump, PumpStats, RingReader};
use crate::config::{AppConfig, PlaybackConfig};
use crate::error::{AudioError, Error, Result};
use crate::metadata::{subscribe_message, MetadataDispatcher, NowPlaying, NowPlayingState};
use crate::network::source::SourceStats;
use crate::network::{Connector, NetConnector, SourceState, StreamSource};
use crate::ring::{ByteRing, SharedByteRing};
use crate::sync::{Event, Shutdown};
use crate::ws::{ConnectionState, PlainSession, SocketIoSession, WsClient, WsClientConfig, WsSender};

/// Pipeline thread roles, most latency-sensitive first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreadRole {
    AudioFeeder,
    Decoder,
    StreamSource,
    ChatWs,
    MetadataWs,
}

impl ThreadRole {
    /// Start order
    pub const ALL: [ThreadRole; 5] = [
        ThreadRole::AudioFeeder,
        ThreadRole::Decoder,
        ThreadRole::StreamSource,
        ThreadRole::ChatWs,
        ThreadRole::MetadataWs,
    ];

    /// Join order: producers before consumers
    pub const SHUTDOWN_ORDER: [ThreadRole; 5] = [
        ThreadRole::StreamSource,
        ThreadRole::Decoder,
        ThreadRole::AudioFeeder,
        ThreadRole::ChatWs,
        ThreadRole::MetadataWs,
    ];

    pub fn thread_name(self) -> &'static str {
        match self {
            ThreadRole::AudioFeeder => "audio-feeder",
            ThreadRole::Decoder => "decoder",
            ThreadRole::StreamSource => "stream-source",
            ThreadRole::ChatWs => "chat-ws",
            ThreadRole::MetadataWs => "metadata-ws",
        }
    }

    /// Relative scheduling priority (higher is more urgent)
    pub fn rank(self) -> u8 {
        match self {
            ThreadRole::AudioFeeder => 4,
            ThreadRole::Decoder => 3,
            ThreadRole::StreamSource => 2,
            ThreadRole::ChatWs | ThreadRole::MetadataWs => 1,
        }
    }
}

/// Point-in-time view of the pipeline
#[derive(Debug, Clone)]
pub struct RadioStatus {
    pub source_state: SourceState,
    pub bytes_received: u64,
    pub stream_fill: f32,
    pub pcm_fill: f32,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub slots_submitted: u64,
    pub chat_state: Option<ConnectionState>,
    pub metadata_state: Option<ConnectionState>,
}

/// Running radio client
pub struct Radio {
    shutdown: Arc<Shutdown>,
    stream_ring: SharedByteRing,
    pcm_ring: SharedByteRing,
    threads: Vec<(ThreadRole, JoinHandle<()>)>,
    source_stats: Arc<SourceStats>,
    pump_stats: Arc<PumpStats>,
    feeder_stats: Arc<FeederStats>,
    chat_store: SharedChatStore,
    chat: Option<ChatActions>,
    metadata_sender: Option<WsSender>,
    now_playing: Arc<NowPlayingState>,
}

impl Radio {
    /// Start with the network connector and the cpal output.
    pub fn start(config: AppConfig) -> Result<Self> {
        let connector = NetConnector::new()?;
        Self::start_with(config, connector, CpalOutput::open)
    }

    /// Start with a custom connector and output factory.
    ///
    /// The output is opened on the feeder thread; if that fails only
    /// playback stops.
    pub fn start_with<C, O, F>(config: AppConfig, connector: C, open_output: F) -> Result<Self>
    where
        C: Connector + Clone + 'static,
        O: AudioOutput + 'static,
        F: FnOnce(&PlaybackConfig, SlotCompleter) -> std::result::Result<O, AudioError>
            + Send
            + 'static,
    {
        config.validate()?;
        let shutdown = Shutdown::new();

        let stream_ring = Arc::new(allocate_ring(
            config.stream.ring_capacity,
            Arc::new(Event::new()),
            Arc::new(Event::new()),
        )?);
        // The feeder wakes on new PCM and on slot completion alike
        let feeder_wake = Arc::new(Event::new());
        let pcm_ring = Arc::new(allocate_ring(
            config.decoder.pcm_ring_capacity,
            feeder_wake.clone(),
            Arc::new(Event::new()),
        )?);
        for ring in [&stream_ring, &pcm_ring] {
            shutdown.register(ring.readable_event().clone());
            shutdown.register(ring.writable_event().clone());
        }

        let source = StreamSource::new(
            connector.clone(),
            config.stream.clone(),
            stream_ring.clone(),
            shutdown.clone(),
        )?;
        let decoder = stream_decoder(RingReader::new(stream_ring.clone(), shutdown.clone()))?;
        let pump = DecodePump::new(
            decoder,
            pcm_ring.clone(),
            shutdown.clone(),
            Duration::from_millis(config.decoder.retry_delay_ms),
        );
        let slots = SlotPool::new(config.playback.slot_count, feeder_wake);

        let now_playing = NowPlayingState::new();
        let chat_store = Arc::new(parking_lot::Mutex::new(ChatStore::default()));

        let mut radio = Self {
            shutdown: shutdown.clone(),
            stream_ring: stream_ring.clone(),
            pcm_ring: pcm_ring.clone(),
            threads: Vec::new(),
            source_stats: source.stats(),
            pump_stats: pump.stats(),
            feeder_stats: Arc::new(FeederStats::default()),
            chat_store: chat_store.clone(),
            chat: None,
            metadata_sender: None,
            now_playing: now_playing.clone(),
        };

        // audio-feeder
        {
            let playback = config.playback.clone();
            let pcm = pcm_ring.clone();
            let shutdown = shutdown.clone();
            let stats = radio.feeder_stats.clone();
            radio.spawn(ThreadRole::AudioFeeder, move || {
                let output = match open_output(&playback, slots.completer()) {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::error!("Audio output unavailable: {}", e);
                        return;
                    }
                };
                AudioFeeder::new(
                    output,
                    pcm,
                    slots,
                    playback.slot_frames,
                    Duration::from_millis(playback.wait_timeout_ms),
                    shutdown,
                )
                .with_stats(stats)
                .run();
            })?;
        }

        radio.spawn(ThreadRole::Decoder, move || pump.run())?;
        radio.spawn(ThreadRole::StreamSource, move || source.run())?;

        if config.chat.enabled {
            let chat = &config.chat;
            let username = if chat.username.is_empty() {
                generate_username()
            } else {
                chat.username.clone()
            };
            let client = WsClient::new(
                connector.clone(),
                WsClientConfig {
                    name: "chat".to_string(),
                    url: chat.url.clone(),
                    mask_mode: chat.mask_mode,
                    reconnect_delay: Duration::from_millis(chat.reconnect_delay_ms),
                    max_message_size: chat.max_message_size,
                },
                SocketIoSession::new(ChatDispatcher::new(chat_store)),
                shutdown.clone(),
            )?;
            radio.chat = Some(ChatActions::new(
                client.sender(),
                ChatProfile {
                    username,
                    user_color: chat.user_color.clone(),
                },
            ));
            radio.spawn(ThreadRole::ChatWs, move || client.run())?;
        }

        if config.metadata.enabled {
            let metadata = &config.metadata;
            let client = WsClient::new(
                connector,
                WsClientConfig {
                    name: "metadata".to_string(),
                    url: metadata.url.clone(),
                    mask_mode: metadata.mask_mode,
                    reconnect_delay: Duration::from_millis(metadata.refresh_interval_ms),
                    max_message_size: metadata.max_message_size,
                },
                PlainSession::new(
                    Some(subscribe_message(&metadata.station)),
                    MetadataDispatcher::new(now_playing),
                ),
                shutdown,
            )?;
            radio.metadata_sender = Some(client.sender());
            radio.spawn(ThreadRole::MetadataWs, move || client.run())?;
        }

        tracing::info!("Radio started with {} threads", radio.threads.len());
        Ok(radio)
    }

    fn spawn<F>(&mut self, role: ThreadRole, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(role.thread_name().to_string())
            .spawn(body)?;
        tracing::debug!("Spawned {} (rank {})", role.thread_name(), role.rank());
        self.threads.push((role, handle));
        Ok(())
    }

    pub fn chat(&self) -> Option<&ChatActions> {
        self.chat.as_ref()
    }

    pub fn chat_store(&self) -> SharedChatStore {
        self.chat_store.clone()
    }

    pub fn now_playing(&self) -> NowPlaying {
        self.now_playing.get()
    }

    pub fn now_playing_state(&self) -> Arc<NowPlayingState> {
        self.now_playing.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_triggered()
    }

    pub fn status(&self) -> RadioStatus {
        RadioStatus {
            source_state: self.source_stats.state(),
            bytes_received: self.source_stats.bytes_received(),
            stream_fill: self.stream_ring.fill_level(),
            pcm_fill: self.pcm_ring.fill_level(),
            frames_decoded: self.pump_stats.frames(),
            decode_errors: self.pump_stats.errors(),
            slots_submitted: self.feeder_stats.slots_submitted(),
            chat_state: self.chat.as_ref().map(|c| c.connection_state()),
            metadata_state: self.metadata_sender.as_ref().map(WsSender::state),
        }
    }

    /// Stop every thread. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        tracing::info!("Shutting down");
        self.shutdown.trigger();
        self.stream_ring.set_eof();
        self.stream_ring.wake_all();
        self.pcm_ring.wake_all();

        for role in ThreadRole::SHUTDOWN_ORDER {
            while let Some(pos) = self.threads.iter().position(|(r, _)| *r == role) {
                let (_, handle) = self.threads.remove(pos);
                if handle.join().is_err() {
                    tracing::error!("{} thread panicked", role.thread_name());
                } else {
                    tracing::debug!("Joined {}", role.thread_name());
                }
            }
        }
        tracing::info!("Shutdown complete");
    }
}

impl Drop for Radio {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn allocate_ring(capacity: usize, readable: Arc<Event>, writable: Arc<Event>) -> Result<ByteRing> {
    ByteRing::try_with_events(capacity, readable, writable).map_err(|e| {
        tracing::error!("Cannot allocate {}-byte ring: {}", capacity, e);
        Error::Audio(AudioError::StreamError(format!("ring allocation failed: {}", e)))
    })
}
