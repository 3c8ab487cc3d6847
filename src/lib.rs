//! Localchat - terminal chat client for a local LLM server
//!
//! A small agent loop around a locally running inference service:
//! - Forward each prompt together with the conversation so far
//! - Save and resume conversations from disk
//! - Keep context bounded by summarizing older turns

pub mod client;
pub mod command;
pub mod config;
pub mod conversation;
pub mod logging;
pub mod session;
pub mod summarizer;

pub use client::{ChatBackend, Completion, OllamaClient};
pub use command::{Command, Input};
pub use config::LocalChatConfig;
pub use conversation::{Conversation, Message, Role};
pub use session::{Session, SessionState};
pub use summarizer::{SummaryPolicy, Summarizer};

/// Result type for Localchat operations
pub type Result<T> = std::result::Result<T, LocalChatError>;

/// Errors that can occur in Localchat
#[derive(Debug, thiserror::Error)]
pub enum LocalChatError {
    #[error("Could not reach the inference server: {0}")]
    Connection(String),

    #[error("Inference server did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Inference server error {status}: {detail}")]
    Service { status: u16, detail: String },

    #[error("Malformed conversation file: {0}")]
    Format(String),

    #[error("Cannot replace {count} messages of a {len}-message conversation")]
    Range { count: usize, len: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LocalChatError {
    /// Whether the error came from talking to the inference server
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Service { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(LocalChatError::Connection("refused".into()).is_transport());
        assert!(LocalChatError::Timeout(std::time::Duration::from_secs(1)).is_transport());
        assert!(LocalChatError::Service {
            status: 500,
            detail: "boom".into()
        }
        .is_transport());
        assert!(!LocalChatError::Range { count: 3, len: 1 }.is_transport());
    }

    #[test]
    fn test_range_message() {
        let err = LocalChatError::Range { count: 3, len: 1 };
        assert_eq!(
            err.to_string(),
            "Cannot replace 3 messages of a 1-message conversation"
        );
    }
}
