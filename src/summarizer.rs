//! Prefix summarization for Localchat.
//!
//! When the conversation grows past the policy threshold:
//!   1. Keep a leading system instruction and the last `keep_turns` turns
//!   2. Render everything in between (including a previous summary) as a
//!      transcript
//!   3. Ask the model to condense it
//!   4. Replace that span with a single summary message
//!
//! Summarization is best-effort. A failed model call leaves the conversation
//! exactly as it was.

use crate::client::ChatBackend;
use crate::conversation::{Conversation, Message, Role};
use crate::{LocalChatError, Result};
use serde::Deserialize;
use std::ops::Range;
use tracing::{debug, info};

/// Instruction sent ahead of the transcript being summarized
pub const SUMMARIZATION_PROMPT: &str = r#"Summarize the following conversation between a user and an assistant so that it can replace the original messages.

Include:
- The topics discussed and any conclusions reached
- Facts, names, preferences or constraints the user mentioned
- Open questions or tasks that are still pending

Write in the third person, be concise, and do not add anything that was not said."#;

/// When and how much to summarize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SummaryPolicy {
    /// Summarize once the conversation holds more than this many messages
    pub max_messages: usize,
    /// Also summarize once the estimated token count exceeds this
    pub max_tokens: Option<usize>,
    /// Most recent turns (a user message and its replies) never summarized
    pub keep_turns: usize,
    /// Fewest non-summary messages worth a summarization call
    pub min_prefix: usize,
}

impl Default for SummaryPolicy {
    fn default() -> Self {
        Self {
            max_messages: 10,
            max_tokens: None,
            keep_turns: 2,
            min_prefix: 2,
        }
    }
}

impl SummaryPolicy {
    /// Whether the automatic trigger fires for this conversation
    pub fn should_summarize(&self, conversation: &Conversation) -> bool {
        if conversation.len() > self.max_messages {
            return true;
        }
        self.max_tokens
            .is_some_and(|limit| conversation.estimated_tokens() > limit)
    }

    /// Span of messages to fold into a summary, or `None` if not worth it.
    ///
    /// A leading system instruction stays pinned ahead of the span, and the
    /// span ends where the `keep_turns`-th most recent turn begins.
    pub fn plan(&self, conversation: &Conversation) -> Option<Range<usize>> {
        let messages = conversation.messages();
        let start = match messages.first() {
            Some(first) if first.role() == Role::System && !first.is_summary() => 1,
            _ => 0,
        };
        let end = self.kept_turns_start(messages).max(start);
        let fresh = messages[start..end]
            .iter()
            .filter(|m| !m.is_summary())
            .count();

        if fresh < self.min_prefix.max(1) {
            debug!(
                "Nothing to summarize ({} messages, {} eligible)",
                messages.len(),
                fresh
            );
            return None;
        }
        Some(start..end)
    }

    /// Index of the user message that opens the oldest kept turn
    fn kept_turns_start(&self, messages: &[Message]) -> usize {
        if self.keep_turns == 0 {
            return messages.len();
        }
        messages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| m.role() == Role::User)
            .nth(self.keep_turns - 1)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/// Condenses old conversation prefixes through the chat backend
pub struct Summarizer {
    policy: SummaryPolicy,
}

impl Summarizer {
    pub fn new(policy: SummaryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SummaryPolicy {
        &self.policy
    }

    /// Produce a summary of the planned span without modifying the
    /// conversation. Returns the span alongside the summary.
    pub async fn summarize<B: ChatBackend>(
        &self,
        backend: &B,
        conversation: &Conversation,
    ) -> Result<Option<(Range<usize>, Message)>> {
        let Some(span) = self.policy.plan(conversation) else {
            return Ok(None);
        };

        let prompt = build_summary_prompt(&conversation.messages()[span.clone()]);
        let completion = backend.complete(&[Message::user(prompt)]).await?;

        if completion.content.trim().is_empty() {
            return Err(LocalChatError::Service {
                status: 200,
                detail: "model returned an empty summary".to_string(),
            });
        }

        Ok(Some((span, Message::summary(&completion.content))))
    }

    /// Summarize and apply the result to the conversation.
    ///
    /// Unless `force` is set, nothing happens below the policy threshold.
    /// Returns `Ok(true)` if the conversation was compacted.
    pub async fn compact<B: ChatBackend>(
        &self,
        backend: &B,
        conversation: &mut Conversation,
        force: bool,
    ) -> Result<bool> {
        if !force && !self.policy.should_summarize(conversation) {
            return Ok(false);
        }

        let Some((span, summary)) = self.summarize(backend, conversation).await? else {
            return Ok(false);
        };

        let old_len = conversation.len();
        let old_tokens = conversation.estimated_tokens();
        conversation.replace_span(span, summary)?;

        info!(
            "Conversation summarized: {} messages -> {}, ~{} tokens -> ~{}",
            old_len,
            conversation.len(),
            old_tokens,
            conversation.estimated_tokens()
        );
        Ok(true)
    }
}

/// Build the model prompt for a run of messages
fn build_summary_prompt(messages: &[Message]) -> String {
    let transcript = messages
        .iter()
        .map(|m| {
            let label = if m.is_summary() {
                "Earlier summary"
            } else {
                m.role().display_name()
            };
            format!("[{}] {}", label, m.content())
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{}\n\n=== CONVERSATION TO SUMMARIZE ===\n{}\n\n=== YOUR SUMMARY ===",
        SUMMARIZATION_PROMPT, transcript
    )
}
