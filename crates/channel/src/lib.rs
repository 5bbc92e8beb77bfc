//! Opaque message channel abstraction
//!
//! This crate defines the bidirectional, unordered, JSON-only channel that the
//! RPC layer runs on top of. It has no notion of requests or responses: one side
//! posts a value, the other side eventually sees it on its inbound stream.
//!
//! Concrete channels (in-memory pairs, byte streams, a webview bridge) live in
//! separate crates.

pub mod error;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

pub use error::ChannelError;
pub use error::ChannelError as Error;

/// Inbound half of a channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// Channel trait for posting and receiving structured messages
///
/// Both ends assume a single logical peer and a single inbound consumer:
/// [`Channel::incoming`] hands out the inbound stream once.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Post one value to the peer.
    async fn post_message(&self, message: Value) -> Result<(), ChannelError>;

    /// Take the stream of values posted by the peer.
    ///
    /// Returns [`ChannelError::AlreadyListening`] if the stream was already taken.
    fn incoming(&self) -> Result<MessageStream, ChannelError>;
}

#[async_trait]
impl<C: Channel> Channel for std::sync::Arc<C> {
    async fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        (**self).post_message(message).await
    }

    fn incoming(&self) -> Result<MessageStream, ChannelError> {
        (**self).incoming()
    }
}
