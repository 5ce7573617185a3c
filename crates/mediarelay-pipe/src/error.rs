//! Error types for pipe endpoints

use std::io;
use thiserror::Error;

use crate::endpoint::{ConnectionState, PipeDirection};

/// Failure to create the OS object backing a pipe endpoint
#[derive(Debug, Error)]
pub enum PipeCreationError {
    /// Another pipe with the same name already exists
    #[error("Pipe name already in use: {name}")]
    Collision { name: String },

    /// The OS refused to create the pipe
    #[error("Permission denied creating pipe {name}: {source}")]
    PermissionDenied {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Out of file descriptors, handles or disk quota
    #[error("Out of resources creating pipe {name}: {source}")]
    ResourceExhausted {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Name is empty, too long or contains a path separator
    #[error("Invalid pipe name: {name:?}")]
    InvalidName { name: String },

    /// Any other OS failure
    #[error("Failed to create pipe {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced to the stream caller
#[derive(Debug, Error)]
pub enum PipeError {
    #[error(transparent)]
    Creation(#[from] PipeCreationError),

    /// Write after the reading side went away
    #[error("Broken pipe: {name}")]
    BrokenPipe { name: String },

    /// The endpoint was closed, possibly while an operation was pending
    #[error("Pipe closed: {name}")]
    Closed { name: String },

    /// The endpoint is not in a state that allows the operation
    #[error("Pipe {name} is {state}")]
    InvalidState {
        name: String,
        state: ConnectionState,
    },

    /// A reader was requested from an outbound pipe or vice versa
    #[error("Pipe {name} is {direction}, not {requested}")]
    WrongDirection {
        name: String,
        direction: PipeDirection,
        requested: PipeDirection,
    },

    /// `reconnect` on an endpoint opened without reconnect support
    #[error("Reconnect not allowed for pipe {name}")]
    ReconnectNotAllowed { name: String },

    /// Unexpected OS error during connect or transfer
    #[error("Pipe I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The non-pipe side of a copy failed
    #[error("Stream error while relaying pipe {name}: {source}")]
    Downstream {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl PipeError {
    /// Whether the error means the peer disconnected
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, PipeError::BrokenPipe { .. })
    }

    /// Whether the error was caused by a local `close`
    pub fn is_closed(&self) -> bool {
        matches!(self, PipeError::Closed { .. })
    }
}

/// Result type for pipe operations
pub type Result<T> = std::result::Result<T, PipeError>;
