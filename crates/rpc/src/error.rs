//! Error types for the RPC layer.

use crate::envelope::CallId;
use std::time::Duration;
use thiserror::Error;
use webview_channel::ChannelError;

/// Result type alias for setup and host-side operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for remote calls.
pub type InvokeResult<T> = std::result::Result<T, InvokeError>;

/// Errors from setting up or driving a dispatcher or invoker.
#[derive(Debug, Error)]
pub enum Error {
    /// Channel-level failure.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A value could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Why a remote call failed.
///
/// Connectivity problems never show up here: a call whose envelope could not be
/// delivered simply times out.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    /// The host ran the method and it failed.
    #[error("{message}")]
    Remote {
        /// Method the call was addressed to.
        channel: String,
        /// Description produced by the host.
        message: String,
    },

    /// No response arrived within the timeout window.
    #[error("Call {id} to '{channel}' timed out after {after:?}")]
    Timeout {
        /// Method the call was addressed to.
        channel: String,
        /// Correlation id of the call.
        id: CallId,
        /// Timeout window that elapsed.
        after: Duration,
    },

    /// Arguments could not be encoded, or the result could not be decoded into
    /// the requested type.
    #[error("Codec error: {0}")]
    Codec(String),
}

impl InvokeError {
    /// Whether this is a protocol timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Why an inbound value is not a valid envelope.
///
/// Only ever logged; malformed messages are dropped.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The value is not a JSON object.
    #[error("expected a JSON object")]
    NotAnObject,

    /// The value does not have the envelope's shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Correlation ids start at 1.
    #[error("invalid correlation id 0")]
    ZeroId,
}
