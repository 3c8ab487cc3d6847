//! Tracing setup
//!
//! Human-readable lines go to stderr so they never mix with the chat on
//! stdout. With a log file, every session event is also appended as one JSON
//! object per line.

use crate::{LocalChatError, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter for the JSON log file, independent of `RUST_LOG`
const FILE_FILTER: &str = "localchat=info";

fn console_directives(verbose: bool) -> &'static str {
    if verbose {
        "localchat=debug,warn"
    } else {
        "warn"
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the console level.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(verbose)));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .with_current_span(false)
                    .with_filter(EnvFilter::new(FILE_FILTER)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| LocalChatError::Config(format!("cannot install logger: {e}")))
}
