//! Outbound chat actions

use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;

use crate::error::WsError;
use crate::ws::client::{ConnectionState, WsSender};

/// Longest accepted username
pub const MAX_USERNAME_CHARS: usize = 31;

/// Random `Listener###` name
pub fn generate_username() -> String {
    let id = uuid::Uuid::new_v4();
    let bytes = id.as_bytes();
    let n = u16::from_le_bytes([bytes[0], bytes[1]]) % 1000;
    format!("Listener{:03}", n)
}

/// Trim and clamp a requested username; `None` if nothing is left.
pub fn sanitize_username(name: &str) -> Option<String> {
    let clean: String = name
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_USERNAME_CHARS)
        .collect();
    (!clean.is_empty()).then_some(clean)
}

/// Identity attached to outgoing events
#[derive(Debug, Clone)]
pub struct ChatProfile {
    pub username: String,
    pub user_color: String,
}

/// Serializes user actions into Socket.IO events on the chat connection
#[derive(Clone)]
pub struct ChatActions {
    sender: WsSender,
    profile: Arc<RwLock<ChatProfile>>,
}

impl ChatActions {
    pub fn new(sender: WsSender, profile: ChatProfile) -> Self {
        Self {
            sender,
            profile: Arc::new(RwLock::new(profile)),
        }
    }

    pub fn username(&self) -> String {
        self.profile.read().username.clone()
    }

    /// Change the username; returns the name actually applied.
    pub fn set_username(&self, name: &str) -> Option<String> {
        let clean = sanitize_username(name)?;
        self.profile.write().username = clean.clone();
        Some(clean)
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.sender.state()
    }

    pub fn send_message(&self, text: &str, reply_to: Option<&str>) -> Result<(), WsError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let profile = self.profile.read().clone();
        self.emit(
            "chat_message",
            json!({
                "user": profile.username,
                "text": text,
                "user_color": profile.user_color,
                "replyTo": reply_to,
            }),
        )
    }

    pub fn send_typing(&self) -> Result<(), WsError> {
        let user = self.username();
        self.emit("typing", json!({ "user": user }))
    }

    pub fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<(), WsError> {
        self.reaction("add_reaction", message_id, emoji)
    }

    pub fn remove_reaction(&self, message_id: &str, emoji: &str) -> Result<(), WsError> {
        self.reaction("remove_reaction", message_id, emoji)
    }

    fn reaction(&self, event: &str, message_id: &str, emoji: &str) -> Result<(), WsError> {
        let user = self.username();
        self.emit(
            event,
            json!({ "messageId": message_id, "emoji": emoji, "user": user }),
        )
    }

    fn emit(&self, event: &str, data: serde_json::Value) -> Result<(), WsError> {
        self.sender.send_text(&event_packet(event, &data))
    }
}

/// Encode a Socket.IO event packet
pub fn event_packet(event: &str, data: &serde_json::Value) -> String {
    format!("42{}", json!([event, data]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_username_shape() {
        let name = generate_username();
        assert!(name.starts_with("Listener"));
        assert_eq!(name.len(), "Listener".len() + 3);
        assert!(name["Listener".len()..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_sanitize_username() {
        assert_eq!(sanitize_username("  dj  ").as_deref(), Some("dj"));
        assert_eq!(sanitize_username("   "), None);
        assert_eq!(sanitize_username(&"x".repeat(40)).unwrap().chars().count(), 31);
    }

    #[test]
    fn test_event_packet_escapes_text() {
        let packet = event_packet(
            "chat_message",
            &json!({ "user": "a", "text": "say \"hi\" \\o/", "replyTo": null }),
        );
        assert!(packet.starts_with("42[\"chat_message\",{"));
        let parsed: serde_json::Value = serde_json::from_str(&packet[2..]).unwrap();
        assert_eq!(parsed[1]["text"], "say \"hi\" \\o/");
        assert!(parsed[1]["replyTo"].is_null());
    }
}
