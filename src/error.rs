//! Error types for imap-engine

use crate::response::{ResponseCode, ResponseKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error ({host}): {message}")]
    Tls { host: String, message: String },

    /// The server stream disagreed with RFC 3501. The connection is torn
    /// down before this is returned.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered a command with a tagged NO or BAD. The
    /// connection remains usable.
    #[error("{command} failed: {kind} {text}")]
    Command {
        command: String,
        kind: ResponseKind,
        codes: Vec<ResponseCode>,
        text: String,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Operation requires the {0} capability")]
    NotSupported(&'static str),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    Argument(String),
}

impl Error {
    /// Whether this error implies the connection has been torn down.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls { .. } | Self::Protocol(_) | Self::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
