//! Live chat over Socket.IO

pub mod actions;
pub mod events;
pub mod store;

pub use actions::{generate_username, sanitize_username, ChatActions, ChatProfile};
pub use events::ChatDispatcher;
pub use store::{ChatMessage, ChatStore, Reaction, Rgb, SharedChatStore};
