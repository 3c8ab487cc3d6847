//! Conversation module for Localchat
//!
//! Holds the ordered message log of a chat session and its on-disk form.

mod message;
mod store;

pub use message::{is_summary_message, Message, Role, SUMMARY_PREFIX};
pub use store::Conversation;
