//! Wire envelopes.
//!
//! Request: `{ id, channel, args }`.
//! Response: `{ id, channel, status, body?, error? }`.
//! Notification: `{ id: <topic>, body? }`, where `id` is a string.

use crate::error::{EnvelopeError, InvokeError, InvokeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id pairing a response with its request.
pub type CallId = u64;

/// One remote invocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Correlation id, allocated by the invoker.
    pub id: CallId,
    /// Name of the method being invoked.
    pub channel: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallEnvelope {
    /// Read a call envelope out of a raw channel message.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` or `channel` is missing or has the wrong type,
    /// or if `args` is present but not an array.
    pub fn parse(message: Value) -> Result<Self, EnvelopeError> {
        if !message.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }

        let envelope: Self = serde_json::from_value(message)?;
        if envelope.id == 0 {
            return Err(EnvelopeError::ZeroId);
        }

        Ok(envelope)
    }
}

/// Outcome of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The method returned normally.
    Success,
    /// The method failed.
    Error,
}

/// Terminal result of one call, carrying the request's identity fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlation id copied from the request.
    pub id: CallId,
    /// Method name copied from the request.
    pub channel: String,
    /// Whether the call succeeded.
    pub status: Status,
    /// Return value when `status` is `success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Failure description when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Successful response.
    #[must_use]
    pub const fn success(id: CallId, channel: String, body: Value) -> Self {
        Self {
            id,
            channel,
            status: Status::Success,
            body: Some(body),
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub const fn error(id: CallId, channel: String, error: String) -> Self {
        Self {
            id,
            channel,
            status: Status::Error,
            body: None,
            error: Some(error),
        }
    }

    /// Read a response envelope out of a raw channel message.
    ///
    /// # Errors
    ///
    /// Returns an error if `id`, `channel` or `status` is missing or invalid.
    pub fn parse(message: Value) -> Result<Self, EnvelopeError> {
        if !message.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }

        let envelope: Self = serde_json::from_value(message)?;
        if envelope.id == 0 {
            return Err(EnvelopeError::ZeroId);
        }

        Ok(envelope)
    }

    /// Convert into what the caller of `invoke` observes.
    ///
    /// A success without a body settles with `null`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Remote`] for an `error` response.
    pub fn into_result(self) -> InvokeResult<Value> {
        match self.status {
            Status::Success => Ok(self.body.unwrap_or(Value::Null)),
            Status::Error => Err(InvokeError::Remote {
                message: self.error.unwrap_or_else(|| {
                    format!("Call to {} failed without a description", self.channel)
                }),
                channel: self.channel,
            }),
        }
    }
}

/// Host-initiated push message, not correlated with any call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Topic the notification is published on.
    pub id: String,
    /// Payload.
    #[serde(default)]
    pub body: Value,
}

impl Notification {
    /// Read a notification out of a raw channel message.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is missing or not a string.
    pub fn parse(message: Value) -> Result<Self, EnvelopeError> {
        if !message.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }

        Ok(serde_json::from_value(message)?)
    }
}

/// Anything the client side can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Settles a pending call.
    Response(ResponseEnvelope),
    /// Goes to topic subscribers.
    Notification(Notification),
}

impl Inbound {
    /// Classify a raw channel message.
    ///
    /// A string `id` marks a notification; anything else must be a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the message matches neither shape.
    pub fn parse(message: Value) -> Result<Self, EnvelopeError> {
        match message.get("id") {
            Some(Value::String(_)) => Notification::parse(message).map(Self::Notification),
            _ => ResponseEnvelope::parse(message).map(Self::Response),
        }
    }
}
