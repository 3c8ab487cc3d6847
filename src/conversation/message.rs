//! Chat messages exchanged with the inference server

use serde::{Deserialize, Serialize};
use std::fmt;

/// Approximate bytes per token for context estimation
pub(crate) const APPROX_BYTES_PER_TOKEN: usize = 4;

/// Marker that opens every summary message. Lives in the text itself so a
/// summary is still recognizable after a save/load round trip.
pub const SUMMARY_PREFIX: &str = "Summary of the earlier conversation:";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Get role name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        f.write_str(name)
    }
}

/// A single message of the conversation.
///
/// Field names match the chat completions wire format, which is also the
/// format of saved conversation files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Build a summary message from the text the model produced
    pub fn summary(text: &str) -> Self {
        Self::system(format!("{}\n{}", SUMMARY_PREFIX, text.trim()))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Check if this message was produced by the summarizer
    pub fn is_summary(&self) -> bool {
        self.role == Role::System && is_summary_message(&self.content)
    }

    /// Estimate token count for this message
    pub fn estimate_tokens(&self) -> usize {
        self.content.len() / APPROX_BYTES_PER_TOKEN
    }
}

/// Check if a message body is a summary
pub fn is_summary_message(content: &str) -> bool {
    content.starts_with(SUMMARY_PREFIX)
}
