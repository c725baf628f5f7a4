//! Error taxonomy shared by the control engine.
//!
//! The daemon layers (configuration manager, coordinator, services) work with
//! `anyhow`; everything below them reports one of these variants so callers
//! can tell a configuration mistake from a transient hardware failure.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors produced by the engine components.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration. Fatal at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// File or process I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Malformed data read from the system.
    #[error("parse error: {0}")]
    Parse(String),

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    /// An external command was cancelled after exceeding its timeout.
    #[error("command `{command}` cancelled after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// A file glob matched zero or several files.
    #[error("expected 1 file but found {found}: {pattern:?}")]
    NotFound { pattern: String, found: usize },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// True for errors that are fixed by editing the configuration file.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
