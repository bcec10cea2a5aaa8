//! Error types for the transport module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur on the frame sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The underlying channel is broken or the peer went away.
    #[error("Sink disconnected: {0}")]
    Disconnected(#[source] std::io::Error),

    /// Write attempted after `close`.
    #[error("Sink closed")]
    Closed,

    /// Opening the transport device failed.
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SinkError {
    /// Returns true if the session using this sink cannot continue.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Closed)
    }
}
