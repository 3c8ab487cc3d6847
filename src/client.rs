//! Transport to the local inference server
//!
//! Talks to an OpenAI-compatible Chat Completions endpoint, which is what
//! Ollama serves under `/v1`. One request per call, no retries: the session
//! loop decides what to do with a failure.

use crate::conversation::Message;
use crate::{LocalChatError, Result};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Ollama's OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
/// Ollama ignores the key but the header must be present
const DUMMY_API_KEY: &str = "ollama";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_DETAIL_CHARS: usize = 500;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think regex"));

/// Something that can turn a conversation into the next assistant reply
#[allow(async_fn_in_trait)]
pub trait ChatBackend {
    /// Model name reported in logs and status output
    fn model(&self) -> &str;

    /// Generate a reply to the given messages (oldest first)
    async fn complete(&self, messages: &[Message]) -> Result<Completion>;
}

/// A generated reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Reply text with any reasoning block removed
    pub content: String,
    /// Total tokens reported by the server, if any
    pub total_tokens: Option<u64>,
}

impl Completion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            total_tokens: None,
        }
    }
}

// ─── Chat Completions API types ─────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: Option<u64>,
}

// ─── Client ─────────────────────────────────────────────────────────

/// HTTP client for a local Ollama (or any OpenAI-compatible) server
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a client for `model` served at `base_url`.
    ///
    /// `timeout` bounds the whole request, including reading the reply.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            // The server is local; never route it through a system proxy
            .no_proxy()
            .user_agent(concat!("localchat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LocalChatError::Config(format!("cannot build HTTP client: {e}")))?;

        info!(
            "Inference client: model={}, base_url={}, timeout={:?}",
            model, base_url, timeout
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_chat_completions_request(&self, messages: &[Message]) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(DUMMY_API_KEY)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let response = Self::check_response_status(response).await?;
        let status = response.status().as_u16();

        let body = response
            .text()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        let chat_response: ChatResponse =
            serde_json::from_str(&body).map_err(|e| LocalChatError::Service {
                status,
                detail: format!("unreadable reply: {e}"),
            })?;

        let raw = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LocalChatError::Service {
                status,
                detail: "reply contained no choices".to_string(),
            })?;

        debug!("Inference reply received in {:?}", started.elapsed());

        Ok(Completion {
            content: strip_think_blocks(&raw),
            total_tokens: chat_response.usage.and_then(|u| u.total_tokens),
        })
    }

    async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = truncate_error_detail(&extract_error_detail(&body), MAX_ERROR_DETAIL_CHARS);
        let detail = if detail.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("no detail")
                .to_string()
        } else {
            detail
        };
        Err(LocalChatError::Service {
            status: status.as_u16(),
            detail,
        })
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> LocalChatError {
        if e.is_timeout() {
            LocalChatError::Timeout(self.timeout)
        } else {
            LocalChatError::Connection(e.to_string())
        }
    }
}

impl ChatBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        debug!("Sending {} messages to {}", messages.len(), self.base_url);
        self.send_chat_completions_request(messages).await
    }
}

/// Remove `<think>...</think>` reasoning blocks some local models emit
pub fn strip_think_blocks(content: &str) -> String {
    if let Some(caps) = THINK_BLOCK.captures(content) {
        if let Some(thinking) = caps.get(1) {
            debug!("Model thinking: {}", thinking.as_str().trim());
        }
        THINK_BLOCK.replace_all(content, "").trim().to_string()
    } else if content.trim_start().starts_with("<think>") {
        // Unterminated block: the model never got to an answer
        String::new()
    } else {
        content.trim().to_string()
    }
}

fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("error").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    trimmed.to_string()
}

fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
    if detail.chars().count() <= max_chars {
        return detail.to_string();
    }

    let mut truncated = detail.chars().take(max_chars).collect::<String>();
    truncated.push_str("... [truncated]");
    truncated
}
