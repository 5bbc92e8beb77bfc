//! Error types for channels

use thiserror::Error;

/// Channel operation errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer is gone or the channel was closed locally
    #[error("Channel closed")]
    Closed,

    /// The inbound stream was already handed out
    #[error("Inbound stream already taken")]
    AlreadyListening,

    /// A value could not be encoded or decoded for the wire
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
