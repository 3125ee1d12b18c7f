//! Inbound chat events
//!
//! Socket.IO event payloads arrive as `["event_name", data]` arrays and
//! are applied to the shared [`ChatStore`].

use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use crate::chat::store::{parse_timestamp, ChatMessage, Rgb, SharedChatStore};
use crate::ws::session::EventDispatcher;

/// Only the newest messages of a history replay are ingested
pub const RECENT_MESSAGES_KEPT: usize = 20;

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    user: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    user_color: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default, rename = "replyTo")]
    reply_to: Value,
}

#[derive(Debug, Deserialize)]
struct ReactionUpdate {
    #[serde(default, rename = "messageId")]
    message_id: Value,
    #[serde(default)]
    emoji: String,
    #[serde(default)]
    user: String,
}

#[derive(Debug, Deserialize)]
struct TypingUpdate {
    #[serde(default)]
    user: String,
}

/// String or number id as text; empty otherwise
fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

impl IncomingMessage {
    fn into_message(self) -> ChatMessage {
        let received_at = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(chrono::Utc::now);
        let reply_to = Some(id_text(&self.reply_to)).filter(|id| !id.is_empty());

        let mut message = ChatMessage::new(&id_text(&self.id), &self.user, &self.text);
        message.color = Rgb::parse(&self.user_color);
        message.user_color = self.user_color;
        message.reply_to = reply_to;
        message.received_at = received_at;
        message
    }
}

/// Applies chat events to the store
pub struct ChatDispatcher {
    store: SharedChatStore,
    events_handled: u64,
    events_ignored: u64,
}

impl ChatDispatcher {
    pub fn new(store: SharedChatStore) -> Self {
        Self {
            store,
            events_handled: 0,
            events_ignored: 0,
        }
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled
    }

    pub fn events_ignored(&self) -> u64 {
        self.events_ignored
    }

    fn handle(&mut self, event: &str, data: Value) -> bool {
        match event {
            "chat_message" => {
                let Ok(incoming) = serde_json::from_value::<IncomingMessage>(data) else {
                    return false;
                };
                self.store.lock().add(incoming.into_message());
            }
            "recent_messages" => {
                let Value::Array(items) = data else {
                    return false;
                };
                let skip = items.len().saturating_sub(RECENT_MESSAGES_KEPT);
                let mut store = self.store.lock();
                for item in items.into_iter().skip(skip) {
                    if let Ok(incoming) = serde_json::from_value::<IncomingMessage>(item) {
                        store.add(incoming.into_message());
                    }
                }
                store.sort_by_time();
            }
            "message_deleted" => {
                let id = match &data {
                    Value::Object(fields) => fields.get("id").map(id_text).unwrap_or_default(),
                    other => id_text(other),
                };
                self.store.lock().mark_deleted(&id);
            }
            "reaction_added" | "reaction_removed" => {
                let Ok(update) = serde_json::from_value::<ReactionUpdate>(data) else {
                    return false;
                };
                self.store.lock().apply_reaction(
                    &id_text(&update.message_id),
                    &update.emoji,
                    &update.user,
                    event == "reaction_added",
                );
            }
            "typing" => {
                let Ok(update) = serde_json::from_value::<TypingUpdate>(data) else {
                    return false;
                };
                self.store.lock().typing(&update.user, Instant::now());
            }
            _ => return false,
        }
        true
    }
}

impl EventDispatcher for ChatDispatcher {
    fn dispatch(&mut self, payload: &str) {
        let parsed: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Unparseable chat event: {}", e);
                self.events_ignored += 1;
                return;
            }
        };

        let Value::Array(mut parts) = parsed else {
            self.events_ignored += 1;
            return;
        };
        if parts.len() < 2 {
            self.events_ignored += 1;
            return;
        }
        let data = parts.swap_remove(1);
        let Some(event) = parts[0].as_str().map(str::to_owned) else {
            self.events_ignored += 1;
            return;
        };

        if self.handle(&event, data) {
            self.events_handled += 1;
        } else {
            tracing::trace!("Ignored chat event {}", event);
            self.events_ignored += 1;
        }
    }

    fn on_tick(&mut self) {
        self.store.lock().expire_typers(Instant::now());
    }

    fn on_disconnect(&mut self) {
        self.store.lock().clear_typers();
    }
}
