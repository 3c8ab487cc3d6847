//! Interactive chat session
//!
//! A `Session` owns everything one chat needs: the backend, the conversation,
//! the summarizer and the save/load defaults. The loop is strictly serial:
//!
//! ```text
//! AwaitingInput -> Sending -> AwaitingReply -> (Summarizing) -> AwaitingInput
//! ```
//!
//! `Ended` is terminal and reached on `exit`, end of input, or a failure of the
//! terminal streams themselves.

use crate::client::ChatBackend;
use crate::command::{help_text, parse_input, Command, Input};
use crate::config::LocalChatConfig;
use crate::conversation::{Conversation, Message};
use crate::summarizer::Summarizer;
use crate::{LocalChatError, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where the session loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInput,
    Sending,
    AwaitingReply,
    Summarizing,
    Ended,
}

/// Result of handling one line of input, rendered for the user by `Display`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Blank line, nothing to do
    Nothing,
    Reply { text: String, summarized: bool },
    /// The model call failed; the user's message stays in the conversation
    TurnFailed(String),
    Saved(PathBuf),
    Loaded { path: PathBuf, messages: usize },
    Summarized,
    NothingToSummarize,
    SummaryFailed(String),
    Cleared,
    Status(String),
    Help(String),
    /// A command was rejected or failed
    Error(String),
    Exit,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Nothing => Ok(()),
            Outcome::Reply { text, summarized } => {
                write!(f, "\nAssistant: {}", text)?;
                if *summarized {
                    write!(f, "\n\n(Conversation automatically summarized)")?;
                }
                Ok(())
            }
            Outcome::TurnFailed(e) => write!(f, "Sorry, something went wrong: {}", e),
            Outcome::Saved(path) => write!(f, "Conversation saved to {}", path.display()),
            Outcome::Loaded { path, messages } => write!(
                f,
                "Conversation loaded from {} ({} messages)",
                path.display(),
                messages
            ),
            Outcome::Summarized => write!(f, "Conversation summarized!"),
            Outcome::NothingToSummarize => write!(f, "Nothing to summarize yet."),
            Outcome::SummaryFailed(e) => {
                write!(f, "Summarization failed, conversation unchanged: {}", e)
            }
            Outcome::Cleared => write!(f, "Started a fresh conversation."),
            Outcome::Status(s) | Outcome::Help(s) => write!(f, "{}", s.trim_end()),
            Outcome::Error(e) => write!(f, "Error: {}", e),
            Outcome::Exit => write!(f, "Goodbye! 👋"),
        }
    }
}

/// One chat session with a local model
pub struct Session<B: ChatBackend> {
    id: Uuid,
    started_at: DateTime<Local>,
    backend: B,
    conversation: Conversation,
    summarizer: Summarizer,
    conversation_file: PathBuf,
    system_prompt: Option<String>,
    autosave: bool,
    state: SessionState,
}

impl<B: ChatBackend> Session<B> {
    /// Start a session with a fresh conversation
    pub fn new(backend: B, config: &LocalChatConfig) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            started_at: Local::now(),
            backend,
            conversation: Conversation::new(),
            summarizer: Summarizer::new(config.summary),
            conversation_file: config.conversation_file.clone(),
            system_prompt: config.system_prompt.clone(),
            autosave: config.autosave,
            state: SessionState::AwaitingInput,
        };
        session.with_conversation(None)
    }

    /// Replace the starting conversation; `None` means a fresh seeded one
    pub fn with_conversation(mut self, conversation: Option<Conversation>) -> Self {
        self.conversation = conversation.unwrap_or_else(|| self.fresh_conversation());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn conversation_file(&self) -> &Path {
        &self.conversation_file
    }

    fn fresh_conversation(&self) -> Conversation {
        match &self.system_prompt {
            Some(prompt) => Conversation::with_system_prompt(prompt.clone()),
            None => Conversation::new(),
        }
    }

    /// Send one chat message and append the reply.
    ///
    /// On failure the user's message stays, no assistant message is added,
    /// and the session is ready for the next input.
    pub async fn send(&mut self, text: &str) -> Result<String> {
        self.state = SessionState::Sending;
        info!(
            session_id = %self.id,
            model = %self.backend.model(),
            event = "user_input",
            user_input = text,
            "User input"
        );
        self.conversation.append(Message::user(text));

        self.state = SessionState::AwaitingReply;
        let started = Instant::now();
        let result = self.backend.complete(self.conversation.messages()).await;
        self.state = SessionState::AwaitingInput;

        let result = result.and_then(|completion| {
            if completion.content.trim().is_empty() {
                Err(LocalChatError::Service {
                    status: 200,
                    detail: "model returned an empty reply".to_string(),
                })
            } else {
                Ok(completion)
            }
        });

        match result {
            Ok(completion) => {
                info!(
                    session_id = %self.id,
                    model = %self.backend.model(),
                    event = "model_response",
                    response_content = completion.content.as_str(),
                    response_time_ms = started.elapsed().as_millis() as u64,
                    tokens_used = completion.total_tokens,
                    "Model response"
                );
                self.conversation
                    .append(Message::assistant(completion.content.clone()));
                Ok(completion.content)
            }
            Err(e) => {
                error!(
                    session_id = %self.id,
                    model = %self.backend.model(),
                    event = "exception",
                    error_message = %e,
                    "Model request failed"
                );
                Err(e)
            }
        }
    }

    /// Summarize if the conversation is over the policy threshold.
    ///
    /// Failures are logged and swallowed. Returns whether it compacted.
    pub async fn summarize_if_needed(&mut self) -> bool {
        if !self.summarizer.policy().should_summarize(&self.conversation) {
            return false;
        }
        match self.run_summarizer(false).await {
            Ok(done) => done,
            Err(e) => {
                warn!("Automatic summarization failed: {}", e);
                false
            }
        }
    }

    /// Summarize right away, regardless of the threshold
    pub async fn summarize_now(&mut self) -> Result<bool> {
        self.run_summarizer(true).await
    }

    async fn run_summarizer(&mut self, force: bool) -> Result<bool> {
        self.state = SessionState::Summarizing;
        let result = self
            .summarizer
            .compact(&self.backend, &mut self.conversation, force)
            .await;
        self.state = SessionState::AwaitingInput;
        result
    }

    /// Save to `path`, or the configured conversation file
    pub async fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path.unwrap_or(&self.conversation_file).to_path_buf();
        self.conversation.save(&path).await?;
        Ok(path)
    }

    /// Load from `path`, or the configured conversation file.
    ///
    /// The current conversation is only replaced when loading succeeds.
    pub async fn load(&mut self, path: Option<&Path>) -> Result<(PathBuf, usize)> {
        let path = path.unwrap_or(&self.conversation_file).to_path_buf();
        let conversation = Conversation::load(&path).await?;
        let count = conversation.len();
        self.conversation = conversation;
        Ok((path, count))
    }

    /// Drop the conversation and start over
    pub fn clear(&mut self) {
        self.conversation = self.fresh_conversation();
        debug!("Conversation cleared");
    }

    pub fn status(&self) -> String {
        let policy = self.summarizer.policy();
        let summaries = self.conversation.iter().filter(|m| m.is_summary()).count();
        let mut out = format!(
            "Session ID: {}\nStarted: {}\nModel: {}\nMessages: {} ({} summary)\nEstimated tokens: ~{}\n",
            self.id,
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.backend.model(),
            self.conversation.len(),
            summaries,
            self.conversation.estimated_tokens(),
        );
        out.push_str(&format!(
            "Auto-summary: after {} messages, keeping the last {} turns",
            policy.max_messages, policy.keep_turns
        ));
        if let Some(limit) = policy.max_tokens {
            out.push_str(&format!(" (or ~{} tokens)", limit));
        }
        out.push_str(&format!("\nConversation file: {}", self.conversation_file.display()));
        out
    }

    /// Handle one classified input
    pub async fn handle(&mut self, input: Input) -> Outcome {
        match input {
            Input::Empty => Outcome::Nothing,
            Input::Invalid(msg) => Outcome::Error(msg),
            Input::Chat(text) => match self.send(&text).await {
                Ok(reply) => {
                    let summarized = self.summarize_if_needed().await;
                    Outcome::Reply {
                        text: reply,
                        summarized,
                    }
                }
                Err(e) => Outcome::TurnFailed(e.to_string()),
            },
            Input::Command(cmd) => self.dispatch(cmd).await,
        }
    }

    async fn dispatch(&mut self, cmd: Command) -> Outcome {
        debug!("Command {}", cmd.name());
        match cmd {
            Command::Save(path) => match self.save(path.as_deref()).await {
                Ok(path) => Outcome::Saved(path),
                Err(e) => Outcome::Error(e.to_string()),
            },
            Command::Load(path) => match self.load(path.as_deref()).await {
                Ok((path, messages)) => Outcome::Loaded { path, messages },
                Err(e) => Outcome::Error(e.to_string()),
            },
            Command::Summarize => match self.summarize_now().await {
                Ok(true) => Outcome::Summarized,
                Ok(false) => Outcome::NothingToSummarize,
                Err(e) => {
                    warn!("Summarization failed: {}", e);
                    Outcome::SummaryFailed(e.to_string())
                }
            },
            Command::Status => Outcome::Status(self.status()),
            Command::Clear => {
                self.clear();
                Outcome::Cleared
            }
            Command::Help => Outcome::Help(help_text()),
            Command::Exit => Outcome::Exit,
        }
    }

    /// Tear the session down, saving first when autosave is on
    pub async fn end(&mut self) -> Result<()> {
        if self.state == SessionState::Ended {
            return Ok(());
        }
        self.state = SessionState::Ended;
        if self.autosave {
            let path = self.save(None).await?;
            info!("Autosaved conversation to {:?}", path);
        }
        info!(session_id = %self.id, "Session ended");
        Ok(())
    }

    /// Drive the session over a line-oriented input and an output stream
    /// until `exit` or end of input.
    ///
    /// The session is torn down (and autosaved) even when a stream fails; the
    /// stream error is returned afterwards.
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let loop_result = self.read_loop(input, output).await;
        let end_result = self.end().await;

        match (loop_result, end_result) {
            (Err(e), end) => {
                if let Err(save_err) = end {
                    error!("Autosave failed after stream error: {}", save_err);
                }
                Err(e)
            }
            (Ok(()), Err(e)) => {
                output
                    .write_all(format!("Autosave failed: {}\n", e).as_bytes())
                    .await?;
                output.flush().await?;
                Err(e)
            }
            (Ok(()), Ok(())) => {
                output.flush().await?;
                Ok(())
            }
        }
    }

    async fn read_loop<R, W>(&mut self, mut input: R, output: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();

        loop {
            output.write_all(b"\nYou: ").await?;
            output.flush().await?;

            buf.clear();
            if input.read_until(b'\n', &mut buf).await? == 0 {
                debug!("End of input");
                output.write_all(b"\n").await?;
                return Ok(());
            }

            let outcome = match std::str::from_utf8(&buf) {
                Ok(line) => self.handle(parse_input(line)).await,
                Err(e) => {
                    warn!("Rejected input line: {}", e);
                    Outcome::Error("input is not valid UTF-8, line ignored".to_string())
                }
            };
            if outcome != Outcome::Nothing {
                output.write_all(format!("{}\n", outcome).as_bytes()).await?;
            }
            if outcome == Outcome::Exit {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Completion;
    use crate::conversation::Role;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays canned results and records what it was sent
    struct Scripted {
        replies: Mutex<VecDeque<Result<Completion>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Completion>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChatBackend for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[Message]) -> Result<Completion> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LocalChatError::Connection("script exhausted".into())))
        }
    }

    fn bare_config() -> LocalChatConfig {
        LocalChatConfig::default().with_system_prompt(None)
    }

    #[tokio::test]
    async fn test_turn_appends_reply() {
        let backend = Scripted::new(vec![Ok(Completion::new("hello"))]);
        let mut session = Session::new(backend, &bare_config());

        let reply = session.send("hi").await.unwrap();

        assert_eq!(reply, "hello");
        assert_eq!(
            session.conversation().messages(),
            &[Message::user("hi"), Message::assistant("hello")]
        );
        assert_eq!(session.state(), SessionState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_only_user_message() {
        let backend = Scripted::new(vec![Err(LocalChatError::Connection("refused".into()))]);
        let mut session = Session::new(backend, &bare_config());

        let outcome = session.handle(Input::Chat("hi".into())).await;

        assert!(matches!(outcome, Outcome::TurnFailed(ref e) if e.contains("refused")));
        assert_eq!(session.conversation().messages(), &[Message::user("hi")]);
        assert_eq!(session.state(), SessionState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_fresh_session_is_seeded() {
        let session = Session::new(Scripted::new(vec![]), &LocalChatConfig::default());
        assert_eq!(
            session.conversation().messages(),
            &[Message::system("Hello, how can I help you today?")]
        );
    }

    #[tokio::test]
    async fn test_backend_sees_full_history() {
        let backend = Scripted::new(vec![Ok(Completion::new("one")), Ok(Completion::new("two"))]);
        let mut session = Session::new(backend, &LocalChatConfig::default());

        session.send("first").await.unwrap();
        session.send("second").await.unwrap();

        let seen = session.backend().seen.lock().unwrap();
        assert_eq!(seen[1].len(), 4);
        assert_eq!(seen[1][3], Message::user("second"));
    }

    #[tokio::test]
    async fn test_auto_summary_after_threshold() {
        let mut replies: Vec<Result<Completion>> = (0..6)
            .map(|i| Ok(Completion::new(format!("reply {i}"))))
            .collect();
        replies.push(Ok(Completion::new("they chatted a lot")));
        let mut session = Session::new(Scripted::new(replies), &bare_config());

        let mut summarized_at = None;
        for i in 0..6 {
            if let Outcome::Reply { summarized: true, .. } =
                session.handle(Input::Chat(format!("msg {i}"))).await
            {
                summarized_at = Some(i);
            }
        }

        // 12 messages > 10 after the sixth turn; keep the last two turns
        assert_eq!(summarized_at, Some(5));
        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 5);
        assert!(messages[0].is_summary());
        assert!(messages[0].content().contains("they chatted a lot"));
        assert_eq!(messages[1].role(), Role::User);
        assert_eq!(messages[1], Message::user("msg 4"));
        assert_eq!(messages[4], Message::assistant("reply 5"));
    }

    #[tokio::test]
    async fn test_auto_summary_keeps_greeting() {
        let mut replies: Vec<Result<Completion>> = (0..5)
            .map(|i| Ok(Completion::new(format!("reply {i}"))))
            .collect();
        replies.push(Ok(Completion::new("small talk")));
        let mut session = Session::new(Scripted::new(replies), &LocalChatConfig::default());

        for i in 0..5 {
            session.handle(Input::Chat(format!("msg {i}"))).await;
        }

        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0], Message::system("Hello, how can I help you today?"));
        assert!(messages[1].is_summary());
        assert_eq!(messages[2], Message::user("msg 3"));

        // The summarization request covered the turns, not the greeting
        let seen = session.backend().seen.lock().unwrap();
        let prompt = seen.last().unwrap()[0].content().to_string();
        assert!(!prompt.contains("Hello, how can I help you today?"));
        assert!(prompt.contains("[User] msg 0"));
    }

    #[tokio::test]
    async fn test_empty_reply_is_turn_failure() {
        let backend = Scripted::new(vec![Ok(Completion::new("  \n"))]);
        let mut session = Session::new(backend, &bare_config());

        let outcome = session.handle(Input::Chat("hi".into())).await;

        assert!(matches!(outcome, Outcome::TurnFailed(ref e) if e.contains("empty reply")));
        assert_eq!(session.conversation().messages(), &[Message::user("hi")]);
        assert_eq!(session.state(), SessionState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_failed_summary_leaves_conversation() {
        let mut conversation = Conversation::new();
        for i in 0..8 {
            conversation.append(Message::user(format!("m{i}")));
        }
        let backend = Scripted::new(vec![Err(LocalChatError::Service {
            status: 500,
            detail: "oom".into(),
        })]);
        let mut session =
            Session::new(backend, &bare_config()).with_conversation(Some(conversation.clone()));

        let outcome = session.handle(Input::Command(Command::Summarize)).await;

        assert!(matches!(outcome, Outcome::SummaryFailed(_)));
        assert_eq!(session.conversation(), &conversation);
        assert_eq!(session.state(), SessionState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_manual_summary_below_minimum() {
        let backend = Scripted::new(vec![]);
        let mut session = Session::new(backend, &LocalChatConfig::default());
        let outcome = session.handle(Input::Command(Command::Summarize)).await;
        assert_eq!(outcome, Outcome::NothingToSummarize);
        assert!(session.backend().seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_status() {
        let backend = Scripted::new(vec![Ok(Completion::new("hello"))]);
        let mut session = Session::new(backend, &LocalChatConfig::default());
        session.send("hi").await.unwrap();

        let status = session.status();
        assert!(status.contains("Model: scripted"));
        assert!(status.contains("Messages: 3"));

        assert_eq!(session.handle(Input::Command(Command::Clear)).await, Outcome::Cleared);
        assert_eq!(session.conversation().len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_exit() {
        let backend = Scripted::new(vec![Ok(Completion::new("hello"))]);
        let mut session = Session::new(backend, &bare_config());
        let input = tokio_test::io::Builder::new().read(b"hi\n\nexit\nignored\n").build();
        let mut output: Vec<u8> = Vec::new();

        session
            .run(tokio::io::BufReader::new(input), &mut output)
            .await
            .unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Assistant: hello"));
        assert!(output.contains("Goodbye!"));
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(session.conversation().len(), 2);
    }

    #[test]
    fn test_outcome_rendering() {
        let reply = Outcome::Reply {
            text: "hey".into(),
            summarized: true,
        };
        assert_eq!(
            reply.to_string(),
            "\nAssistant: hey\n\n(Conversation automatically summarized)"
        );
        assert_eq!(
            Outcome::TurnFailed("boom".into()).to_string(),
            "Sorry, something went wrong: boom"
        );
        assert_eq!(Outcome::Nothing.to_string(), "");
    }
}
