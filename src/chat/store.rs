//! Chat history, reactions and typing indicators

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::MAX_CHAT_MESSAGES;

/// Reactions kept per message
pub const MAX_REACTIONS: usize = 8;

/// Users recorded per reaction
pub const MAX_REACTION_USERS: usize = 5;

/// Concurrent typing indicators
pub const MAX_TYPERS: usize = 10;

/// A typing indicator expires after this long without a refresh
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// Display colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const CYAN: Rgb = Rgb(0, 255, 255);

    /// Parse `#rrggbb` / `rrggbb`; anything else is cyan.
    pub fn parse(color: &str) -> Rgb {
        let hex = color.strip_prefix('#').unwrap_or(color);
        if hex.len() < 6 || !hex.is_char_boundary(6) {
            return Rgb::CYAN;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        match (channel(0..2), channel(2..4), channel(4..6)) {
            (Some(r), Some(g), Some(b)) => Rgb(r, g, b),
            _ => Rgb::CYAN,
        }
    }
}

/// Parse an ISO-8601 timestamp; `None` if unusable.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let head = text.get(..19)?;
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reaction {
    pub emoji: String,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Local, monotonically increasing
    pub uid: u64,
    /// Server id; may be empty
    pub id: String,
    pub user: String,
    pub text: String,
    pub user_color: String,
    pub color: Rgb,
    pub reply_to: Option<String>,
    pub received_at: DateTime<Utc>,
    pub reactions: Vec<Reaction>,
    pub deleted: bool,
}

impl ChatMessage {
    pub fn new(id: &str, user: &str, text: &str) -> Self {
        Self {
            uid: 0,
            id: id.to_string(),
            user: user.to_string(),
            text: text.to_string(),
            user_color: String::new(),
            color: Rgb::CYAN,
            reply_to: None,
            received_at: Utc::now(),
            reactions: Vec::new(),
            deleted: false,
        }
    }

    /// Count of users behind `emoji`
    pub fn reaction_count(&self, emoji: &str) -> usize {
        self.reactions
            .iter()
            .find(|r| r.emoji == emoji)
            .map(|r| r.users.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
struct Typer {
    user: String,
    last_typed: Instant,
}

/// Bounded chat state owned by the chat subsystem
pub struct ChatStore {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
    next_uid: u64,
    typers: Vec<Typer>,
    revision: u64,
}

pub type SharedChatStore = Arc<Mutex<ChatStore>>;

impl Default for ChatStore {
    fn default() -> Self {
        Self::new(MAX_CHAT_MESSAGES)
    }
}

impl ChatStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_uid: 1,
            typers: Vec::new(),
            revision: 0,
        }
    }

    pub fn shared() -> SharedChatStore {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Oldest first
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Bumped on every visible change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn find(&self, id: &str) -> Option<&ChatMessage> {
        if id.is_empty() {
            return None;
        }
        self.messages.iter().find(|m| m.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        if id.is_empty() {
            return None;
        }
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Append a message, evicting the oldest when full.
    ///
    /// Returns `false` for a duplicate id.
    pub fn add(&mut self, mut message: ChatMessage) -> bool {
        if self.find(&message.id).is_some() {
            return false;
        }
        if self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        message.uid = self.next_uid;
        self.next_uid += 1;
        self.messages.push_back(message);
        self.revision += 1;
        true
    }

    /// Stable sort by `received_at`.
    pub fn sort_by_time(&mut self) {
        self.messages
            .make_contiguous()
            .sort_by_key(|m| m.received_at);
        self.revision += 1;
    }

    pub fn mark_deleted(&mut self, id: &str) -> bool {
        let Some(message) = self.find_mut(id) else {
            return false;
        };
        message.deleted = true;
        self.revision += 1;
        true
    }

    /// Add or remove `user`'s `emoji` reaction on message `id`.
    pub fn apply_reaction(&mut self, id: &str, emoji: &str, user: &str, added: bool) -> bool {
        let Some(message) = self.find_mut(id) else {
            return false;
        };
        let index = message.reactions.iter().position(|r| r.emoji == emoji);

        let changed = if added {
            let index = match index {
                Some(i) => Some(i),
                None if message.reactions.len() < MAX_REACTIONS => {
                    message.reactions.push(Reaction {
                        emoji: emoji.to_string(),
                        users: Vec::new(),
                    });
                    Some(message.reactions.len() - 1)
                }
                None => None,
            };
            match index {
                Some(i) => {
                    let users = &mut message.reactions[i].users;
                    if !users.iter().any(|u| u == user) && users.len() < MAX_REACTION_USERS {
                        users.push(user.to_string());
                    }
                    true
                }
                None => false,
            }
        } else {
            match index {
                Some(i) => {
                    message.reactions[i].users.retain(|u| u != user);
                    if message.reactions[i].users.is_empty() {
                        message.reactions.remove(i);
                    }
                    true
                }
                None => false,
            }
        };

        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Record (or refresh) a typing indicator.
    pub fn typing(&mut self, user: &str, now: Instant) {
        if user.is_empty() {
            return;
        }
        if let Some(typer) = self.typers.iter_mut().find(|t| t.user == user) {
            typer.last_typed = now;
            return;
        }
        if self.typers.len() < MAX_TYPERS {
            self.typers.push(Typer {
                user: user.to_string(),
                last_typed: now,
            });
            self.revision += 1;
        }
    }

    /// Drop typing indicators older than [`TYPING_TIMEOUT`].
    pub fn expire_typers(&mut self, now: Instant) -> usize {
        let before = self.typers.len();
        self.typers
            .retain(|t| now.saturating_duration_since(t.last_typed) <= TYPING_TIMEOUT);
        let removed = before - self.typers.len();
        if removed > 0 {
            self.revision += 1;
        }
        removed
    }

    pub fn clear_typers(&mut self) {
        if !self.typers.is_empty() {
            self.typers.clear();
            self.revision += 1;
        }
    }

    /// Users currently typing, oldest indicator first
    pub fn typers(&self) -> Vec<&str> {
        self.typers.iter().map(|t| t.user.as_str()).collect()
    }
}
