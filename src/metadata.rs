//! Now-playing metadata
//!
//! The metadata connection is a plain WebSocket that pushes station
//! state as JSON. The first `song` object in a push carries the track
//! shown to the listener.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::sync::Event;
use crate::ws::session::EventDispatcher;

/// Current track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    /// Cover art URL; may be empty
    pub art: String,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self {
            title: "Loading...".to_string(),
            artist: "Tripletail FM".to_string(),
            art: String::new(),
        }
    }
}

/// Shared now-playing state with change notification
pub struct NowPlayingState {
    current: Mutex<(NowPlaying, u64)>,
    changed: Arc<Event>,
}

impl Default for NowPlayingState {
    fn default() -> Self {
        Self {
            current: Mutex::new((NowPlaying::default(), 0)),
            changed: Arc::new(Event::new()),
        }
    }
}

impl NowPlayingState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self) -> NowPlaying {
        self.current.lock().0.clone()
    }

    /// Number of updates applied so far
    pub fn revision(&self) -> u64 {
        self.current.lock().1
    }

    /// Signaled after every update
    pub fn changed_event(&self) -> &Arc<Event> {
        &self.changed
    }

    /// Wait for the next update; `None` on timeout.
    pub fn wait_change(&self, timeout: Duration) -> Option<NowPlaying> {
        self.changed.wait_timeout(timeout).then(|| self.get())
    }

    fn update(&self, track: NowPlaying) -> bool {
        let mut current = self.current.lock();
        if current.0 == track {
            return false;
        }
        current.0 = track;
        current.1 += 1;
        drop(current);
        self.changed.signal();
        true
    }
}

/// Subscription sent when the metadata socket opens
pub fn subscribe_message(station: &str) -> String {
    let channel = format!("station:{}", station);
    json!({ "subs": { channel: { "recover": true } } }).to_string()
}

/// Depth-first search for the first object-valued `song` field
fn find_song(value: &Value) -> Option<&serde_json::Map<String, Value>> {
    match value {
        Value::Object(fields) => {
            if let Some(Value::Object(song)) = fields.get("song") {
                return Some(song);
            }
            fields.values().find_map(find_song)
        }
        Value::Array(items) => items.iter().find_map(find_song),
        _ => None,
    }
}

/// Extract the track from a metadata push; `None` without a titled song.
pub fn parse_now_playing(payload: &str) -> Option<NowPlaying> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let song = find_song(&value)?;
    let field = |name: &str| {
        song.get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let title = field("title");
    if title.is_empty() {
        return None;
    }
    Some(NowPlaying {
        title,
        artist: field("artist"),
        art: field("art"),
    })
}

/// Applies metadata pushes to [`NowPlayingState`]
pub struct MetadataDispatcher {
    state: Arc<NowPlayingState>,
}

impl MetadataDispatcher {
    pub fn new(state: Arc<NowPlayingState>) -> Self {
        Self { state }
    }
}

impl EventDispatcher for MetadataDispatcher {
    fn dispatch(&mut self, payload: &str) {
        let Some(track) = parse_now_playing(payload) else {
            tracing::trace!("Metadata push without a song ({} bytes)", payload.len());
            return;
        };
        let label = format!("{} - {}", track.artist, track.title);
        if self.state.update(track) {
            tracing::info!("Now playing: {}", label);
        }
    }
}
