//! tracing setup for the console binary.
//!
//! Log lines go to stderr, or to `[assistant] log_file` when one is
//! configured so they do not interleave with the conversation on stdout.

use std::fs::{self, OpenOptions};
use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::AppError;

/// Install the global subscriber. Fails if one is already installed.
///
/// `level` is a plain level (`"info"`) or a full directive list
/// (`"murmur=debug,reqwest=warn"`). A `-v` flag on the command line sets
/// `level_wins`, so the flag beats `RUST_LOG`; otherwise `RUST_LOG` beats
/// the configured level.
pub fn init(level: &str, level_wins: bool, log_file: Option<&Path>) -> Result<(), AppError> {
    let filter = build_filter(level, level_wins)?;
    let writer = match log_file {
        Some(path) => open_writer(path)?,
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

fn build_filter(level: &str, level_wins: bool) -> Result<EnvFilter, AppError> {
    if !level_wins {
        return EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")));
    }
    EnvFilter::try_new(level).or_else(|level_err| {
        EnvFilter::try_from_default_env().map_err(|env_err| {
            AppError::Logger(format!("invalid log level '{level}' ({level_err}) and no usable RUST_LOG ({env_err})"))
        })
    })
}

// Append mode; the parent directory is created on first use.
fn open_writer(path: &Path) -> Result<BoxMakeWriter, AppError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::Logger(format!("cannot create log dir '{}': {e}", dir.display())))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::Logger(format!("cannot open log file '{}': {e}", path.display())))?;
    Ok(BoxMakeWriter::new(file))
}

/// Strict single-level parse (`error` .. `trace`, or `off`).
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
