//! Typed RPC over an opaque message channel.
//!
//! This crate lets a sandboxed UI call methods on a privileged host process
//! over a channel that only moves JSON values back and forth, with no built-in
//! request/response pairing.
//!
//! # Roles
//!
//! - [`Dispatcher`]: host side. Owns the method registry, runs the matching
//!   implementation for each inbound call and posts exactly one response.
//! - [`Invoker`]: client side. Allocates correlation ids, keeps the pending-call
//!   table, settles calls on response or timeout, and routes push notifications
//!   to [`Subscription`]s.
//! - [`Proxy`] / [`remote_api!`]: method-call syntax on top of the invoker.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webview_channel_memory::MemoryChannel;
//! use webview_rpc::{Dispatcher, Invoker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (host, ui) = MemoryChannel::pair();
//!
//! let dispatcher = Arc::new(Dispatcher::new(host));
//! dispatcher.register("double", |x: i64| async move { anyhow::Ok(x * 2) });
//! dispatcher.start()?;
//!
//! let invoker = Arc::new(Invoker::new(ui));
//! invoker.start()?;
//!
//! let doubled: i64 = invoker.proxy().method("double").call((4,)).await?;
//! assert_eq!(doubled, 8);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod invoker;
mod macros;
pub mod proxy;

// Re-export commonly used types
pub use config::{CallOptions, DispatcherConfig, InvokerConfig};
pub use dispatcher::Dispatcher;
pub use envelope::{CallEnvelope, CallId, Inbound, Notification, ResponseEnvelope, Status};
pub use error::{EnvelopeError, Error, InvokeError, InvokeResult, Result};
pub use handler::{BoxFuture, Handler, HandlerResult, MethodTable};
pub use invoker::{Invoker, Subscription};
pub use proxy::{IntoArgs, Proxy, RemoteMethod};

// Re-export dependencies that are part of our public API
pub use serde_json::Value;
pub use webview_channel::{Channel, ChannelError};

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;
}
