//! Configuration for Localchat
//!
//! Resolution, lowest to highest precedence:
//!   1. built-in defaults
//!   2. `config.toml` (`--config`, else `<config dir>/localchat/config.toml`)
//!   3. environment: `LOCALCHAT_MODEL`, `LOCALCHAT_BASE_URL`, `OLLAMA_HOST`
//!   4. command-line flags (applied by the binary through the `with_*` setters)

use crate::client::DEFAULT_BASE_URL;
use crate::summarizer::SummaryPolicy;
use crate::{LocalChatError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default model, must be pulled in the local Ollama instance
pub const DEFAULT_MODEL: &str = "llama3.2";
/// Greeting that opens a fresh conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "Hello, how can I help you today?";
const DEFAULT_CONVERSATION_FILE: &str = "conversation.json";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Partial config.toml; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigToml {
    model: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    conversation_file: Option<PathBuf>,
    /// Empty string disables the greeting
    system_prompt: Option<String>,
    autosave: Option<bool>,
    summary: Option<SummaryPolicy>,
}

/// Configuration for a chat session
#[derive(Debug, Clone, PartialEq)]
pub struct LocalChatConfig {
    /// Model name passed to the inference server
    pub model: String,

    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    /// Bound on a single request to the server
    pub timeout: Duration,

    /// Default file for save/load
    pub conversation_file: PathBuf,

    /// System message seeding a fresh conversation
    pub system_prompt: Option<String>,

    /// Save the conversation when the session ends
    pub autosave: bool,

    /// When and how much to summarize
    pub summary: SummaryPolicy,
}

impl Default for LocalChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            conversation_file: PathBuf::from(DEFAULT_CONVERSATION_FILE),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            autosave: false,
            summary: SummaryPolicy::default(),
        }
    }
}

impl LocalChatConfig {
    /// Load defaults, the config file and the process environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    LocalChatError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                config.apply_toml(&content)?;
            }
            None => {
                if let Some(path) = default_config_path().filter(|p| p.exists()) {
                    debug!("Using config file {:?}", path);
                    let content = std::fs::read_to_string(&path)?;
                    config.apply_toml(&content)?;
                }
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from a config.toml document
    pub fn apply_toml(&mut self, content: &str) -> Result<()> {
        let file: ConfigToml =
            toml::from_str(content).map_err(|e| LocalChatError::Config(e.to_string()))?;

        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(base_url) = file.base_url {
            self.base_url = base_url;
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(path) = file.conversation_file {
            self.conversation_file = path;
        }
        if let Some(prompt) = file.system_prompt {
            self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        }
        if let Some(autosave) = file.autosave {
            self.autosave = autosave;
        }
        if let Some(summary) = file.summary {
            self.summary = summary;
        }
        Ok(())
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("LOCALCHAT_MODEL").filter(|v| !v.is_empty()) {
            self.model = model;
        }
        if let Some(url) = lookup("LOCALCHAT_BASE_URL").filter(|v| !v.is_empty()) {
            self.base_url = url;
        } else if let Some(host) = lookup("OLLAMA_HOST").filter(|v| !v.is_empty()) {
            self.base_url = base_url_from_ollama_host(&host);
        }
    }

    /// Reject settings no session could run with
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LocalChatError::Config("model must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(LocalChatError::Config("timeout must be positive".into()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(LocalChatError::Config(format!(
                "base URL must be http(s): {}",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_conversation_file(mut self, path: PathBuf) -> Self {
        self.conversation_file = path;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn with_summary_policy(mut self, policy: SummaryPolicy) -> Self {
        self.summary = policy;
        self
    }
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("localchat").join("config.toml"))
}

/// Turn an `OLLAMA_HOST` value (`host:port` or a URL) into an API base URL
fn base_url_from_ollama_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}/v1", host)
    } else {
        format!("http://{}/v1", host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = LocalChatConfig::default();
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.conversation_file, PathBuf::from("conversation.json"));
        assert_eq!(config.summary.max_messages, 10);
        assert_eq!(config.summary.keep_turns, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_toml() {
        let mut config = LocalChatConfig::default();
        config
            .apply_toml(
                r#"
                model = "qwen2.5:7b"
                timeout_secs = 30
                system_prompt = ""
                autosave = true

                [summary]
                max_messages = 20
                max_tokens = 4000
                "#,
            )
            .unwrap();

        assert_eq!(config.model, "qwen2.5:7b");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.system_prompt, None);
        assert!(config.autosave);
        assert_eq!(config.summary.max_messages, 20);
        assert_eq!(config.summary.max_tokens, Some(4000));
        // Unset summary keys keep their defaults
        assert_eq!(config.summary.keep_turns, 2);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_apply_toml_rejects_garbage() {
        let mut config = LocalChatConfig::default();
        assert!(matches!(
            config.apply_toml("model = ["),
            Err(LocalChatError::Config(_))
        ));
        assert!(matches!(
            config.apply_toml("modle = \"typo\""),
            Err(LocalChatError::Config(_))
        ));
        assert!(matches!(
            config.apply_toml("[summary]\nkeep_recent = 5"),
            Err(LocalChatError::Config(_))
        ));
        assert_eq!(config.summary, SummaryPolicy::default());
    }

    #[test]
    fn test_apply_env() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LOCALCHAT_MODEL", "mistral"),
            ("OLLAMA_HOST", "127.0.0.1:9999"),
        ]);
        let mut config = LocalChatConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model, "mistral");
        assert_eq!(config.base_url, "http://127.0.0.1:9999/v1");
    }

    #[test]
    fn test_explicit_base_url_beats_ollama_host() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LOCALCHAT_BASE_URL", "http://gpu-box:8080/v1"),
            ("OLLAMA_HOST", "http://ignored:1"),
        ]);
        let mut config = LocalChatConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.base_url, "http://gpu-box:8080/v1");
    }

    #[test]
    fn test_validate() {
        assert!(LocalChatConfig::default().with_model("  ").validate().is_err());
        assert!(LocalChatConfig::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(LocalChatConfig::default()
            .with_base_url("localhost:11434")
            .validate()
            .is_err());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let err = LocalChatConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, LocalChatError::Config(_)));
    }
}
