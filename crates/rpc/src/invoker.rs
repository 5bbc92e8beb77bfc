//! Client-side invoker.

use crate::config::{CallOptions, InvokerConfig};
use crate::envelope::{CallEnvelope, CallId, Inbound, Notification, ResponseEnvelope};
use crate::error::{InvokeError, InvokeResult, Result};
use crate::proxy::Proxy;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use webview_channel::Channel;

type PendingTable = DashMap<CallId, oneshot::Sender<InvokeResult<Value>>>;
type SubscriberTable = DashMap<u64, Subscriber>;

struct Subscriber {
    topic: String,
    sender: flume::Sender<Value>,
}

/// Issues calls over a channel and settles them when responses come back.
///
/// Each call gets a fresh correlation id and a pending entry that is settled
/// exactly once: by the matching response, or by the timeout.
pub struct Invoker<C: Channel> {
    channel: Arc<C>,
    config: InvokerConfig,
    next_id: AtomicU64,
    pending: PendingTable,
    subscribers: Arc<SubscriberTable>,
    next_subscription: AtomicU64,
}

/// Removes a call's pending entry when the call ends, however it ends.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl<C: Channel> Invoker<C> {
    /// Create an invoker with the default configuration.
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, InvokerConfig::default())
    }

    /// Create an invoker with a custom configuration.
    pub fn with_config(channel: C, config: InvokerConfig) -> Self {
        Self {
            channel: Arc::new(channel),
            config,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            subscribers: Arc::new(DashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// The invoker's configuration.
    #[must_use]
    pub const fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// The channel calls are posted on.
    #[must_use]
    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    /// Number of calls still waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Call `channel` with positional `args` and wait for the result.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Remote`] if the host reports a failure and
    /// [`InvokeError::Timeout`] if no response arrives in time.
    pub async fn invoke(&self, channel: &str, args: Vec<Value>) -> InvokeResult<Value> {
        self.invoke_with_options(channel, args, CallOptions::default())
            .await
    }

    /// Call `channel` with per-call options.
    ///
    /// # Errors
    ///
    /// Same as [`invoke`](Self::invoke).
    #[instrument(skip(self, args, options), fields(arg_count = args.len()))]
    pub async fn invoke_with_options(
        &self,
        channel: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> InvokeResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let after = options.timeout.unwrap_or(self.config.timeout);

        let message = serde_json::to_value(CallEnvelope {
            id,
            channel: channel.to_string(),
            args,
        })
        .map_err(|e| InvokeError::Codec(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        debug!(
            "Registered pending call {id} (total: {})",
            self.pending.len()
        );

        let exchange = async {
            if let Err(e) = self.channel.post_message(message).await {
                warn!("Failed to post call {id} to '{channel}': {e}");
            }
            rx.await
        };

        match timeout(after, exchange).await {
            Ok(Ok(result)) => result,
            // The sender only goes away without settling if the entry was
            // removed out from under us; nothing else will arrive.
            Ok(Err(_)) | Err(_) => {
                debug!("Call {id} to '{channel}' timed out after {after:?}");
                Err(InvokeError::Timeout {
                    channel: channel.to_string(),
                    id,
                    after,
                })
            }
        }
    }

    /// Handle one raw message from the channel.
    ///
    /// Responses settle their pending call; notifications go to subscribers.
    /// Anything else is logged and dropped.
    pub fn handle_message(&self, message: Value) {
        match Inbound::parse(message) {
            Ok(Inbound::Response(response)) => self.settle(response),
            Ok(Inbound::Notification(notification)) => self.publish(notification),
            Err(e) => warn!("Dropping malformed inbound message: {e}"),
        }
    }

    fn settle(&self, response: ResponseEnvelope) {
        let id = response.id;

        // Removal is the settlement point: a duplicate or late response finds
        // nothing here.
        let Some((_, sender)) = self.pending.remove(&id) else {
            warn!(
                "Dropping response for unknown call {id} on '{}'",
                response.channel
            );
            return;
        };

        debug!("Settling call {id} with status {:?}", response.status);

        if sender.send(response.into_result()).is_err() {
            debug!("Caller of {id} went away before settlement");
        }
    }

    fn publish(&self, notification: Notification) {
        let Notification { id: topic, body } = notification;

        let mut delivered = 0;
        for subscriber in self.subscribers.iter() {
            if subscriber.topic != topic {
                continue;
            }

            match subscriber.sender.try_send(body.clone()) {
                Ok(()) => delivered += 1,
                Err(flume::TrySendError::Full(_)) => warn!(
                    "Subscription {} on '{topic}' is full, dropping notification",
                    subscriber.key()
                ),
                Err(flume::TrySendError::Disconnected(_)) => {}
            }
        }

        if delivered == 0 {
            debug!("No subscribers for notification on '{topic}'");
        } else {
            debug!("Delivered notification on '{topic}' to {delivered} subscribers");
        }
    }

    /// Receive notification bodies published on `topic`.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = flume::bounded(self.config.subscription_capacity.max(1));

        self.subscribers.insert(
            id,
            Subscriber {
                topic: topic.clone(),
                sender,
            },
        );

        debug!("Subscription {id} attached to '{topic}'");

        Subscription {
            id,
            topic,
            receiver,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Start receiving responses and notifications from the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel's inbound stream was already taken.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut inbound = self.channel.incoming()?;
        let invoker = Arc::clone(self);

        info!("Invoker listening for responses");

        Ok(tokio::spawn(async move {
            while let Some(message) = inbound.next().await {
                invoker.handle_message(message);
            }

            info!(
                "Invoker inbound stream ended with {} calls pending",
                invoker.pending_calls()
            );
        }))
    }

    /// Dynamic proxy over this invoker.
    #[must_use]
    pub fn proxy(self: &Arc<Self>) -> Proxy<C> {
        Proxy::new(Arc::clone(self))
    }
}

/// Stream of notification bodies for one topic.
///
/// Buffers up to [`InvokerConfig::subscription_capacity`] unread bodies;
/// notifications arriving while the buffer is full are dropped for this
/// subscription only. Detaches from the invoker when dropped.
pub struct Subscription {
    id: u64,
    topic: String,
    receiver: flume::Receiver<Value>,
    subscribers: Weak<SubscriberTable>,
}

impl Subscription {
    /// Topic this subscription listens on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next notification body.
    ///
    /// Returns `None` once the invoker is gone and everything buffered has
    /// been received.
    pub async fn recv(&self) -> Option<Value> {
        self.receiver.recv_async().await.ok()
    }

    /// Take a buffered notification body without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving notifications.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(&self.id);
            debug!("Subscription {} detached from '{}'", self.id, self.topic);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_test::traced_test;
    use webview_channel::{ChannelError, MessageStream};

    #[derive(Default)]
    struct Recorder {
        posted: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Channel for Recorder {
        async fn post_message(&self, message: Value) -> std::result::Result<(), ChannelError> {
            self.posted.lock().unwrap().push(message);
            Ok(())
        }

        fn incoming(&self) -> std::result::Result<MessageStream, ChannelError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn posted(invoker: &Invoker<Recorder>) -> Vec<Value> {
        invoker.channel().posted.lock().unwrap().clone()
    }

    /// Wait until the invoker has posted `count` messages.
    async fn wait_posted(invoker: &Invoker<Recorder>, count: usize) {
        while posted(invoker).len() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let invoker = Arc::new(Invoker::new(Recorder::default()));

        let first = tokio::spawn({
            let invoker = Arc::clone(&invoker);
            async move { invoker.invoke("a", vec![]).await }
        });
        wait_posted(&invoker, 1).await;

        let second = tokio::spawn({
            let invoker = Arc::clone(&invoker);
            async move { invoker.invoke("b", vec![json!(1)]).await }
        });
        wait_posted(&invoker, 2).await;

        let posted = posted(&invoker);
        assert_eq!(posted[0], json!({"id": 1, "channel": "a", "args": []}));
        assert_eq!(posted[1], json!({"id": 2, "channel": "b", "args": [1]}));
        assert_eq!(invoker.pending_calls(), 2);

        invoker.handle_message(json!({"id": 2, "channel": "b", "status": "success", "body": "B"}));
        invoker.handle_message(json!({"id": 1, "channel": "a", "status": "success", "body": "A"}));

        assert_eq!(second.await.unwrap(), Ok(json!("B")));
        assert_eq!(first.await.unwrap(), Ok(json!("A")));
        assert_eq!(invoker.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_error_response_rejects() {
        let invoker = Arc::new(Invoker::new(Recorder::default()));

        let call = tokio::spawn({
            let invoker = Arc::clone(&invoker);
            async move { invoker.invoke("boom", vec![]).await }
        });
        wait_posted(&invoker, 1).await;

        invoker.handle_message(json!({
            "id": 1,
            "channel": "boom",
            "status": "error",
            "error": "Something went wrong on channel boom: nope"
        }));

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Something went wrong on channel boom: nope");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_pending_entry() {
        let invoker = Invoker::with_config(
            Recorder::default(),
            InvokerConfig::default().with_timeout(Duration::from_millis(100)),
        );

        let err = invoker.invoke("silent", vec![]).await.unwrap_err();

        assert_eq!(
            err,
            InvokeError::Timeout {
                channel: "silent".to_string(),
                id: 1,
                after: Duration::from_millis(100),
            }
        );
        assert!(err.is_timeout());
        assert_eq!(invoker.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_timeout_overrides_config() {
        let invoker = Invoker::new(Recorder::default());

        let err = invoker
            .invoke_with_options(
                "silent",
                vec![],
                CallOptions::default().with_timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Timeout { after, .. } if after == Duration::from_secs(1)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_and_malformed_messages_are_dropped() {
        let invoker = Invoker::new(Recorder::default());

        invoker.handle_message(json!({"id": 42, "channel": "ghost", "status": "success"}));
        invoker.handle_message(json!({"status": "success"}));

        assert_eq!(invoker.pending_calls(), 0);
        assert!(logs_contain("Dropping response for unknown call 42"));
        assert!(logs_contain("Dropping malformed inbound message"));
    }

    #[tokio::test]
    async fn test_subscription_receives_topic_only() {
        let invoker = Invoker::new(Recorder::default());
        let models = invoker.subscribe("models-updated");
        let other = invoker.subscribe("settings-changed");

        invoker.handle_message(json!({"id": "models-updated", "body": ["llama"]}));

        assert_eq!(models.topic(), "models-updated");
        assert_eq!(models.recv().await, Some(json!(["llama"])));
        assert_eq!(other.try_recv(), None);
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches() {
        let invoker = Invoker::new(Recorder::default());
        let first = invoker.subscribe("tick");
        let second = invoker.subscribe("tick");

        first.unsubscribe();
        invoker.handle_message(json!({"id": "tick", "body": 1}));

        assert_eq!(second.try_recv(), Some(json!(1)));
        assert_eq!(invoker.subscribers.len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_full_subscription_drops_newer_notifications() {
        let invoker = Invoker::with_config(
            Recorder::default(),
            InvokerConfig::default().with_subscription_capacity(2),
        );
        let idle = invoker.subscribe("tick");
        let reader = invoker.subscribe("tick");

        for n in 1..=3 {
            invoker.handle_message(json!({"id": "tick", "body": n}));
            assert_eq!(reader.try_recv(), Some(json!(n)));
        }

        assert_eq!(idle.try_recv(), Some(json!(1)));
        assert_eq!(idle.try_recv(), Some(json!(2)));
        assert_eq!(idle.try_recv(), None);
        assert!(logs_contain("is full, dropping notification"));
    }
}
