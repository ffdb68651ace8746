//! Error types for kmod-core.
//!
//! Every failure inside the library is a [`KmodError`]. At the RPC boundary
//! each error is translated into exactly one named [`ReplyError`], so a client
//! never sees a raw status code.

use crate::ipc::ReplyError;
use crate::marshal::ParameterError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kmod-core.
#[derive(Debug, Error)]
pub enum KmodError {
    // Provider errors
    #[error("Module not found: {name}")]
    ModuleNotFound { name: String },

    #[error("No info available for module {name}: {reason}")]
    NoInfoAvailable { name: String, reason: String },

    #[error("Module provider failure: {message}")]
    Provider { message: String },

    #[error("Malformed module parameter record: {0}")]
    MalformedParameter(#[from] ParameterError),

    #[error("ELF error: {0}")]
    Elf(#[from] goblin::error::Error),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid address {address:?}: {message}")]
    Address { address: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for kmod-core operations.
pub type Result<T> = std::result::Result<T, KmodError>;

impl From<std::io::Error> for KmodError {
    fn from(err: std::io::Error) -> Self {
        KmodError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for KmodError {
    fn from(err: serde_json::Error) -> Self {
        KmodError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl KmodError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        KmodError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Translate into the named error sent back to the client.
    ///
    /// Resolution and data errors have dedicated names. Everything else
    /// (provider enumeration, serialization, I/O) collapses into
    /// `org.kernel.kmod.InternalError`.
    pub fn to_reply_error(&self) -> ReplyError {
        match self {
            KmodError::ModuleNotFound { .. } => ReplyError::UnknownModule,
            KmodError::NoInfoAvailable { .. } | KmodError::Elf(_) => ReplyError::NoInfoAvailable,
            KmodError::MalformedParameter(_) => ReplyError::MalformedParameter,
            _ => ReplyError::InternalError,
        }
    }

    /// Whether this error only means the peer went away.
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            KmodError::Io {
                source: Some(err), ..
            } => matches!(
                err.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
