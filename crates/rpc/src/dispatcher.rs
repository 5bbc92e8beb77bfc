//! Host-side dispatcher.

use crate::config::DispatcherConfig;
use crate::envelope::{CallEnvelope, Notification, ResponseEnvelope};
use crate::error::Result;
use crate::handler::{self, BoxedHandler, Handler, HandlerResult, MethodTable};
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use webview_channel::Channel;

/// Executes registered methods on behalf of calls arriving over a channel.
///
/// Every well-formed call to a registered method gets exactly one response
/// envelope. Malformed messages and calls to unregistered methods are logged and
/// dropped (see [`DispatcherConfig::reply_to_unregistered`]).
pub struct Dispatcher<C: Channel> {
    channel: Arc<C>,
    methods: DashMap<String, BoxedHandler>,
    config: DispatcherConfig,
}

impl<C: Channel> Dispatcher<C> {
    /// Create a dispatcher with the default configuration.
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, DispatcherConfig::default())
    }

    /// Create a dispatcher with a custom configuration.
    pub fn with_config(channel: C, config: DispatcherConfig) -> Self {
        Self {
            channel: Arc::new(channel),
            methods: DashMap::new(),
            config,
        }
    }

    /// Register a method, replacing any earlier registration under `name`.
    pub fn register<Args, H>(&self, name: impl Into<String>, handler: H)
    where
        H: Handler<Args>,
    {
        self.insert(name.into(), handler::boxed(handler));
    }

    /// Register a method that receives all of its arguments as one `Vec<T>`.
    pub fn register_variadic<T, F, Fut, R>(&self, name: impl Into<String>, handler: F)
    where
        T: DeserializeOwned,
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.insert(name.into(), handler::boxed_variadic(handler));
    }

    /// Register every method of a table, typically one bound to a service
    /// instance. Returns the number of methods registered.
    pub fn register_instance(&self, table: MethodTable) -> usize {
        let entries = table.into_entries();
        let count = entries.len();

        for (name, handler) in entries {
            self.insert(name, handler);
        }

        info!("Registered {count} methods from method table");
        count
    }

    fn insert(&self, name: String, handler: BoxedHandler) {
        if self.methods.insert(name.clone(), handler).is_some() {
            warn!("Replaced existing registration for channel '{name}'");
        } else {
            debug!("Registered channel '{name}'");
        }
    }

    /// Whether a method is registered under `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// The channel this dispatcher answers on.
    #[must_use]
    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    /// Push a notification to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be serialized or the channel rejects
    /// the message.
    #[instrument(skip(self, body))]
    pub async fn notify<T: Serialize>(&self, topic: &str, body: T) -> Result<()> {
        let notification = Notification {
            id: topic.to_string(),
            body: serde_json::to_value(body)?,
        };

        self.channel
            .post_message(serde_json::to_value(notification)?)
            .await?;

        debug!("Posted notification on topic '{topic}'");
        Ok(())
    }

    /// Handle one raw message from the channel.
    ///
    /// Posts the response, if any, before returning.
    pub async fn handle_message(&self, message: Value) {
        let call = match CallEnvelope::parse(message) {
            Ok(call) => call,
            Err(e) => {
                warn!("Dropping malformed call envelope: {e}");
                return;
            }
        };

        let CallEnvelope { id, channel, args } = call;

        // Clone out of the map so no shard lock is held across the await
        let handler = self.methods.get(&channel).map(|entry| Arc::clone(entry.value()));
        let Some(handler) = handler else {
            warn!("No method registered for channel '{channel}', dropping call {id}");
            if self.config.reply_to_unregistered {
                let error = format!("No method registered for channel {channel}");
                self.post_response(ResponseEnvelope::error(id, channel, error))
                    .await;
            }
            return;
        };

        debug!("Dispatching call {id} to '{channel}' with {} args", args.len());

        let outcome = AssertUnwindSafe(async move { handler(args).await })
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(body)) => ResponseEnvelope::success(id, channel, body),
            Ok(Err(e)) => {
                let error = format!("Something went wrong on channel {channel}: {e:#}");
                debug!("Call {id} failed: {error}");
                ResponseEnvelope::error(id, channel, error)
            }
            Err(panic) => {
                let error = format!(
                    "Something went wrong on channel {channel}: handler panicked: {}",
                    panic_message(panic.as_ref())
                );
                error!("Call {id} panicked: {error}");
                ResponseEnvelope::error(id, channel, error)
            }
        };

        self.post_response(response).await;
    }

    async fn post_response(&self, response: ResponseEnvelope) {
        let id = response.id;

        let message = match serde_json::to_value(&response) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to serialize response for call {id}: {e}");
                return;
            }
        };

        if let Err(e) = self.channel.post_message(message).await {
            error!("Failed to post response for call {id}: {e}");
        }
    }

    /// Start dispatching messages from the channel.
    ///
    /// Takes the channel's inbound stream and handles each message in its own
    /// task, so a slow method never holds up unrelated calls. The returned task
    /// ends when the inbound stream does.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel's inbound stream was already taken.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut inbound = self.channel.incoming()?;
        let dispatcher = Arc::clone(self);

        info!(
            "Dispatcher listening with {} registered methods",
            self.methods.len()
        );

        Ok(tokio::spawn(async move {
            while let Some(message) = inbound.next().await {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { dispatcher.handle_message(message).await });
            }

            info!("Dispatcher inbound stream ended");
        }))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tracing_test::traced_test;
    use webview_channel::{ChannelError, MessageStream};

    /// Captures every posted message.
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

    fn posted(dispatcher: &Dispatcher<Recorder>) -> Vec<Value> {
        dispatcher.channel().posted.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_success_response() {
        let dispatcher = Dispatcher::new(Recorder::default());
        dispatcher.register("ping", || async { anyhow::Ok("pong") });

        dispatcher
            .handle_message(json!({"id": 1, "channel": "ping", "args": []}))
            .await;

        assert_eq!(
            posted(&dispatcher),
            vec![json!({"id": 1, "channel": "ping", "status": "success", "body": "pong"})]
        );
    }

    #[tokio::test]
    async fn test_error_response_names_channel() {
        let dispatcher = Dispatcher::new(Recorder::default());
        dispatcher.register("explode", || async {
            Err::<(), _>(anyhow::anyhow!("disk on fire"))
        });

        dispatcher
            .handle_message(json!({"id": 2, "channel": "explode", "args": []}))
            .await;

        let posted = posted(&dispatcher);
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0]["status"], "error");
        assert!(posted[0].get("body").is_none());

        let error = posted[0]["error"].as_str().unwrap();
        assert!(error.contains("explode"));
        assert!(error.contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_panic_becomes_error_response() {
        let dispatcher = Dispatcher::new(Recorder::default());
        dispatcher.register("crash", || async {
            if true {
                panic!("handler bug");
            }
            anyhow::Ok(())
        });

        dispatcher
            .handle_message(json!({"id": 3, "channel": "crash", "args": []}))
            .await;

        let posted = posted(&dispatcher);
        assert_eq!(posted.len(), 1);
        let error = posted[0]["error"].as_str().unwrap();
        assert!(error.contains("crash"));
        assert!(error.contains("handler bug"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_message_is_dropped() {
        let dispatcher = Dispatcher::new(Recorder::default());
        dispatcher.register("ping", || async { anyhow::Ok("pong") });

        dispatcher.handle_message(json!({"channel": "ping"})).await;
        dispatcher.handle_message(json!({"id": 1})).await;
        dispatcher.handle_message(json!("ping")).await;

        assert!(posted(&dispatcher).is_empty());
        assert!(logs_contain("Dropping malformed call envelope"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unregistered_channel_is_dropped() {
        let dispatcher = Dispatcher::new(Recorder::default());

        dispatcher
            .handle_message(json!({"id": 5, "channel": "nope", "args": []}))
            .await;

        assert!(posted(&dispatcher).is_empty());
        assert!(logs_contain("No method registered for channel 'nope'"));
    }

    #[tokio::test]
    async fn test_unregistered_channel_reply_when_configured() {
        let dispatcher = Dispatcher::with_config(
            Recorder::default(),
            DispatcherConfig::default().reply_to_unregistered(),
        );

        dispatcher
            .handle_message(json!({"id": 5, "channel": "nope", "args": []}))
            .await;

        let posted = posted(&dispatcher);
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0]["id"], 5);
        assert_eq!(posted[0]["status"], "error");
        assert!(posted[0]["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let dispatcher = Dispatcher::new(Recorder::default());
        dispatcher.register("version", || async { anyhow::Ok(1) });
        dispatcher.register("version", || async { anyhow::Ok(2) });

        dispatcher
            .handle_message(json!({"id": 1, "channel": "version"}))
            .await;

        assert_eq!(posted(&dispatcher)[0]["body"], 2);
        assert_eq!(dispatcher.methods(), vec!["version".to_string()]);
    }

    #[tokio::test]
    async fn test_register_instance() {
        let dispatcher = Dispatcher::new(Recorder::default());
        let table = MethodTable::new()
            .method("ping", || async { anyhow::Ok("pong") })
            .method("double", |x: i64| async move { anyhow::Ok(x * 2) });

        assert_eq!(dispatcher.register_instance(table), 2);
        assert!(dispatcher.is_registered("ping"));
        assert!(dispatcher.is_registered("double"));
        assert!(!dispatcher.is_registered("triple"));
    }

    #[tokio::test]
    async fn test_notify() {
        let dispatcher = Dispatcher::new(Recorder::default());

        dispatcher
            .notify("models-updated", vec!["llama", "granite"])
            .await
            .unwrap();

        assert_eq!(
            posted(&dispatcher),
            vec![json!({"id": "models-updated", "body": ["llama", "granite"]})]
        );
    }
}
