//! In-memory channel implementation for testing
//!
//! [`MemoryChannel::pair`] returns two connected ends within the same process,
//! standing in for the webview bridge between a host and its sandboxed UI.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, trace};
use uuid::Uuid;
use webview_channel::{Channel, ChannelError, MessageStream};

/// One end of an in-memory channel pair
pub struct MemoryChannel {
    id: Uuid,
    sender: Mutex<Option<flume::Sender<Value>>>,
    receiver: Mutex<Option<flume::Receiver<Value>>>,
}

impl MemoryChannel {
    /// Create two connected ends.
    ///
    /// Whatever one end posts shows up on the other end's inbound stream.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (host_tx, client_rx) = flume::unbounded();
        let (client_tx, host_rx) = flume::unbounded();

        let host = Self::new(host_tx, host_rx);
        let client = Self::new(client_tx, client_rx);

        debug!("Created memory channel pair {} <-> {}", host.id, client.id);

        (host, client)
    }

    fn new(sender: flume::Sender<Value>, receiver: flume::Receiver<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Stop posting from this end.
    ///
    /// The peer's inbound stream ends once it has drained what was already
    /// posted. Later posts from this end fail with [`ChannelError::Closed`].
    pub fn close(&self) {
        if self.sender.lock().take().is_some() {
            debug!("Closed memory channel {}", self.id);
        }
    }
}

impl Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("closed", &self.sender.lock().is_none())
            .finish()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        let sender = self.sender.lock().clone().ok_or(ChannelError::Closed)?;

        trace!("Memory channel {} posting {}", self.id, message);

        sender
            .send_async(message)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    fn incoming(&self) -> Result<MessageStream, ChannelError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(ChannelError::AlreadyListening)?;

        Ok(Box::pin(receiver.into_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_is_bidirectional() {
        let _ = tracing_subscriber::fmt::try_init();

        let (host, client) = MemoryChannel::pair();
        let mut host_in = host.incoming().unwrap();
        let mut client_in = client.incoming().unwrap();

        client.post_message(json!({"hello": "host"})).await.unwrap();
        host.post_message(json!({"hello": "client"})).await.unwrap();

        assert_eq!(host_in.next().await, Some(json!({"hello": "host"})));
        assert_eq!(client_in.next().await, Some(json!({"hello": "client"})));
    }

    #[tokio::test]
    async fn test_incoming_can_only_be_taken_once() {
        let (host, _client) = MemoryChannel::pair();

        assert!(host.incoming().is_ok());
        assert!(matches!(
            host.incoming(),
            Err(ChannelError::AlreadyListening)
        ));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (host, client) = MemoryChannel::pair();
        let mut host_in = host.incoming().unwrap();

        client.post_message(json!(1)).await.unwrap();
        client.close();

        assert!(matches!(
            client.post_message(json!(2)).await,
            Err(ChannelError::Closed)
        ));
        assert_eq!(host_in.next().await, Some(json!(1)));
        assert_eq!(host_in.next().await, None);
    }
}
