//! In-memory conversation log and its JSON file format.
//!
//! A saved conversation is a plain JSON array of `{"role", "content"}`
//! objects, oldest first. The file is opened, written and closed within a
//! single call; there is no partial-write protection.

use super::message::Message;
use crate::{LocalChatError, Result};
use std::ops::Range;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Ordered message log of one chat session (oldest first)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation seeded with a system message
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Add a message at the end
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Estimate total token usage of the conversation
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }

    /// Replace the first `count` messages with `summary`.
    ///
    /// Fails without touching the conversation when `count` exceeds its length.
    pub fn replace_prefix(&mut self, count: usize, summary: Message) -> Result<()> {
        self.replace_span(0..count, summary)
    }

    /// Replace the messages in `span` with `summary`, keeping those before it
    pub fn replace_span(&mut self, span: Range<usize>, summary: Message) -> Result<()> {
        if span.start > span.end || span.end > self.messages.len() {
            return Err(LocalChatError::Range {
                count: span.end,
                len: self.messages.len(),
            });
        }
        self.messages.splice(span, std::iter::once(summary));
        Ok(())
    }

    /// Render the conversation in its persisted form
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.messages)?)
    }

    /// Parse a persisted conversation
    pub fn deserialize(content: &str) -> Result<Self> {
        let messages: Vec<Message> =
            serde_json::from_str(content).map_err(|e| LocalChatError::Format(e.to_string()))?;
        Ok(Self { messages })
    }

    /// Write the conversation to `path`, creating parent directories if needed
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = self.serialize()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        debug!("Saved {} messages to {:?}", self.messages.len(), path);
        Ok(())
    }

    /// Read a conversation previously written by [`Conversation::save`]
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let conversation = Self::deserialize(&content)?;
        info!("Loaded {} messages from {:?}", conversation.len(), path);
        Ok(conversation)
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
