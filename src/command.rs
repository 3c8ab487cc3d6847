//! Session command parsing
//!
//! - `save`, `load`, `summary`, `exit` typed alone on a line are commands
//! - `/save [path]`, `/load [path]` etc. accept arguments
//! - everything else is chat content

use std::fmt;
use std::path::PathBuf;

/// Names of the commands the session understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    Save,
    Load,
    Summary,
    Status,
    Clear,
    Help,
    Exit,
}

impl CommandName {
    pub fn all() -> &'static [CommandName] {
        &[
            CommandName::Save,
            CommandName::Load,
            CommandName::Summary,
            CommandName::Status,
            CommandName::Clear,
            CommandName::Help,
            CommandName::Exit,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandName::Save => "save",
            CommandName::Load => "load",
            CommandName::Summary => "summary",
            CommandName::Status => "status",
            CommandName::Clear => "clear",
            CommandName::Help => "help",
            CommandName::Exit => "exit",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            CommandName::Summary => &["summarize"],
            CommandName::Exit => &["quit"],
            _ => &[],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CommandName::Save => "save the conversation (optional path)",
            CommandName::Load => "load a saved conversation (optional path)",
            CommandName::Summary => "summarize older messages now",
            CommandName::Status => "show session info and context size",
            CommandName::Clear => "start over with a fresh conversation",
            CommandName::Help => "list commands",
            CommandName::Exit => "end the session",
        }
    }

    pub fn takes_path(&self) -> bool {
        matches!(self, CommandName::Save | CommandName::Load)
    }

    pub fn parse(name: &str) -> Option<CommandName> {
        let name = name.to_lowercase();
        Self::all()
            .iter()
            .find(|cmd| cmd.name() == name || cmd.aliases().contains(&name.as_str()))
            .copied()
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// A validated session command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Save to the given path, or the configured conversation file
    Save(Option<PathBuf>),
    /// Load from the given path, or the configured conversation file
    Load(Option<PathBuf>),
    Summarize,
    Status,
    Clear,
    Help,
    Exit,
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Command::Save(_) => CommandName::Save,
            Command::Load(_) => CommandName::Load,
            Command::Summarize => CommandName::Summary,
            Command::Status => CommandName::Status,
            Command::Clear => CommandName::Clear,
            Command::Help => CommandName::Help,
            Command::Exit => CommandName::Exit,
        }
    }

    fn build(name: CommandName, args: &str) -> Result<Command, String> {
        let path = (!args.is_empty()).then(|| PathBuf::from(args));
        if path.is_some() && !name.takes_path() {
            return Err(format!("{} takes no arguments", name));
        }
        Ok(match name {
            CommandName::Save => Command::Save(path),
            CommandName::Load => Command::Load(path),
            CommandName::Summary => Command::Summarize,
            CommandName::Status => Command::Status,
            CommandName::Clear => Command::Clear,
            CommandName::Help => Command::Help,
            CommandName::Exit => Command::Exit,
        })
    }
}

/// One line of user input, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Blank line
    Empty,
    /// Text to send to the model
    Chat(String),
    Command(Command),
    /// Slash command that failed validation
    Invalid(String),
}

/// Classify a line of user input
pub fn parse_input(line: &str) -> Input {
    let input = line.trim();
    if input.is_empty() {
        return Input::Empty;
    }

    if let Some(rest) = input.strip_prefix('/') {
        let (cmd_name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        return match CommandName::parse(cmd_name) {
            Some(name) => match Command::build(name, args) {
                Ok(cmd) => Input::Command(cmd),
                Err(msg) => Input::Invalid(msg),
            },
            None => Input::Invalid(format!("unknown command /{}", cmd_name)),
        };
    }

    // A bare command word must be the whole line
    if !input.contains(char::is_whitespace) {
        if let Some(name) = CommandName::parse(input) {
            if let Ok(cmd) = Command::build(name, "") {
                return Input::Command(cmd);
            }
        }
    }

    Input::Chat(input.to_string())
}

/// Help text listing every command
pub fn help_text() -> String {
    let mut out = String::from("Available commands:\n");
    for cmd in CommandName::all() {
        let usage = if cmd.takes_path() {
            format!("{} [path]", cmd)
        } else {
            cmd.to_string()
        };
        out.push_str(&format!("  {:<16} {}\n", usage, cmd.description()));
    }
    out
}
