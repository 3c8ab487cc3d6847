//! Localchat CLI
//!
//! Chat with a model served by a local Ollama instance, save and resume
//! conversations, and keep the context short by summarizing old turns.

use clap::Parser;
use localchat::command::help_text;
use localchat::{LocalChatConfig, OllamaClient, Session, SummaryPolicy};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Localchat - chat with a local LLM from the terminal
#[derive(Parser, Debug)]
#[command(name = "localchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model to chat with
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long)]
    base_url: Option<String>,

    /// Conversation file used by save/load
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Summarize once the conversation holds more than this many messages
    #[arg(long)]
    summarize_after: Option<usize>,

    /// Also summarize once the estimated token count exceeds this
    #[arg(long)]
    summarize_tokens: Option<usize>,

    /// Recent turns never folded into a summary
    #[arg(long)]
    keep_turns: Option<usize>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// System message for a fresh conversation ("" for none)
    #[arg(long)]
    system: Option<String>,

    /// Load the conversation file before the first prompt
    #[arg(short, long)]
    resume: bool,

    /// Save the conversation when the session ends
    #[arg(long)]
    autosave: bool,

    /// Path to config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append JSON session logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Verbose output on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Layer command-line flags over the loaded configuration
    fn apply(&self, mut config: LocalChatConfig) -> LocalChatConfig {
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(file) = &self.file {
            config = config.with_conversation_file(file.clone());
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(system) = &self.system {
            config = config.with_system_prompt(Some(system.clone()));
        }
        if self.autosave {
            config = config.with_autosave(true);
        }

        let mut policy: SummaryPolicy = config.summary;
        if let Some(n) = self.summarize_after {
            policy.max_messages = n;
        }
        if let Some(n) = self.summarize_tokens {
            policy.max_tokens = Some(n);
        }
        if let Some(n) = self.keep_turns {
            policy.keep_turns = n;
        }
        config.with_summary_policy(policy)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    localchat::logging::init(cli.verbose, cli.log_file.as_deref())?;

    let config = cli.apply(LocalChatConfig::load(cli.config.as_deref())?);
    config.validate()?;

    let client = OllamaClient::new(&config.base_url, &config.model, config.timeout)?;
    let mut session = Session::new(client, &config);

    info!("Starting Localchat session {}", session.id());

    if cli.resume {
        match session.load(None).await {
            Ok((path, count)) => println!("Resumed {} messages from {}", count, path.display()),
            Err(e) => {
                warn!("Could not resume conversation: {}", e);
                println!(
                    "No conversation resumed from {}: {}",
                    session.conversation_file().display(),
                    e
                );
            }
        }
    }

    println!("\n=== Chat Session Started ===");
    println!("Model: {}", config.model);
    println!("Type 'exit' to end the conversation");
    println!("Session ID: {}\n", session.id());
    print!("{}", help_text());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    session.run(stdin, &mut stdout).await?;

    Ok(())
}
